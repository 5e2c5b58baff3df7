//! Playback event publisher.
//!
//! A single ordered broadcast of [`PlayerEvent`]s. The latest event is kept
//! and replayed to every new subscriber, so a UI attaching late still learns
//! the current state.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use podwall_types::{PlayerEvent, TrackId};

const EVENT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PlayerEvent>,
    latest: Arc<Mutex<PlayerEvent>>,
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher {
    /// Create a publisher whose initial state is `Stopped`.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sender,
            latest: Arc::new(Mutex::new(PlayerEvent::Stopped)),
        }
    }

    /// Publish an event to all subscribers.
    ///
    /// Sends happen under the `latest` lock so concurrent publishers cannot
    /// reorder the stream relative to the replayed value.
    pub fn publish(&self, event: PlayerEvent) {
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        tracing::debug!(?event, "player event");
        *latest = event.clone();
        let _ = self.sender.send(event);
    }

    /// Subscribe; the first received event is the latest one published.
    pub fn subscribe(&self) -> EventSubscription {
        let latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        EventSubscription {
            replay: Some(latest.clone()),
            receiver: self.sender.subscribe(),
        }
    }

    pub fn latest(&self) -> PlayerEvent {
        self.latest.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn playing(&self, track_id: TrackId) {
        self.publish(PlayerEvent::Playing { track_id });
    }

    pub fn paused(&self) {
        self.publish(PlayerEvent::Paused);
    }

    pub fn stopped(&self) {
        self.publish(PlayerEvent::Stopped);
    }

    pub fn progress(&self, track_id: TrackId, piece_id: u32, is_last: bool) {
        self.publish(PlayerEvent::Progress {
            track_id,
            piece_id,
            is_last,
        });
    }

    pub fn error(
        &self,
        track_id: Option<TrackId>,
        piece_id: Option<u32>,
        cause: impl Into<String>,
        terminal: bool,
    ) {
        self.publish(PlayerEvent::Error {
            track_id,
            piece_id,
            cause: cause.into(),
            terminal,
        });
    }
}

/// Receiving end of the event stream.
pub struct EventSubscription {
    replay: Option<PlayerEvent>,
    receiver: broadcast::Receiver<PlayerEvent>,
}

impl EventSubscription {
    /// Next event, or `None` once the publisher is gone.
    ///
    /// A subscriber that falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<PlayerEvent> {
        if let Some(event) = self.replay.take() {
            return Some(event);
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<PlayerEvent> {
        if let Some(event) = self.replay.take() {
            return Some(event);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<PlayerEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_subscriber_sees_stopped_first() {
        let publisher = EventPublisher::new();
        let mut sub = publisher.subscribe();
        assert_eq!(sub.try_recv(), Some(PlayerEvent::Stopped));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn late_subscriber_gets_latest_then_live_events() {
        let publisher = EventPublisher::new();
        publisher.progress(1, 0, false);
        publisher.playing(1);

        let mut sub = publisher.subscribe();
        publisher.paused();

        assert_eq!(
            sub.drain(),
            vec![PlayerEvent::Playing { track_id: 1 }, PlayerEvent::Paused]
        );
        assert_eq!(publisher.latest(), PlayerEvent::Paused);
    }

    #[test]
    fn events_arrive_in_publish_order() {
        let publisher = EventPublisher::new();
        let mut sub = publisher.subscribe();
        for piece in 0..5 {
            publisher.progress(3, piece, piece == 4);
        }
        publisher.error(Some(3), None, "boom", true);

        let events = sub.drain();
        assert_eq!(events[0], PlayerEvent::Stopped);
        let pieces: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                PlayerEvent::Progress { piece_id, .. } => Some(*piece_id),
                _ => None,
            })
            .collect();
        assert_eq!(pieces, vec![0, 1, 2, 3, 4]);
        assert!(matches!(
            events.last(),
            Some(PlayerEvent::Error { terminal: true, .. })
        ));
    }

    #[tokio::test]
    async fn recv_ends_when_publisher_dropped() {
        let publisher = EventPublisher::new();
        let mut sub = publisher.subscribe();
        drop(publisher);
        assert_eq!(sub.recv().await, Some(PlayerEvent::Stopped));
        assert_eq!(sub.recv().await, None);
    }
}
