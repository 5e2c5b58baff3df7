//! Playback session.
//!
//! Owns one coordinator together with the tasks that feed it: the fetch
//! message pump and the output signal loop. Everything the session started is
//! torn down by [`PlaybackSession::shutdown`] (or when it is dropped).

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{FetchConfig, PlaybackConfig};
use crate::coordinator::{Coordinator, CoordinatorParts};
use crate::decode::AudioDecoder;
use crate::events::{EventPublisher, EventSubscription};
use crate::fetcher::ChunkFetcher;
use crate::http::RangeClient;
use crate::output::{AudioOutput, OutputSignal};
use crate::resolver::SourceResolver;
use crate::telemetry::Telemetry;

/// Buffered fetch messages across all tracks.
const FETCH_CHANNEL_CAPACITY: usize = 64;

pub struct SessionParts {
    pub client: Arc<dyn RangeClient>,
    pub decoder: Arc<dyn AudioDecoder>,
    pub resolver: Arc<dyn SourceResolver>,
    pub telemetry: Arc<dyn Telemetry>,
    pub output: Arc<dyn AudioOutput>,
    /// Receiving end of the channel the output reports on.
    pub output_signals: mpsc::UnboundedReceiver<OutputSignal>,
    pub fetch: FetchConfig,
    pub playback: PlaybackConfig,
}

pub struct PlaybackSession {
    coordinator: Arc<Coordinator>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl PlaybackSession {
    /// Build the coordinator and spawn its pumps. Must run inside a Tokio runtime.
    pub fn start(parts: SessionParts) -> Self {
        let shutdown = CancellationToken::new();
        let (fetch_tx, fetch_rx) = mpsc::channel(FETCH_CHANNEL_CAPACITY);
        let coordinator = Coordinator::new(CoordinatorParts {
            fetcher: ChunkFetcher::new(parts.client, parts.fetch),
            decoder: parts.decoder,
            resolver: parts.resolver,
            telemetry: parts.telemetry,
            output: parts.output,
            publisher: EventPublisher::new(),
            playback: parts.playback,
            fetch_tx,
            shutdown: shutdown.clone(),
        });

        let tasks = vec![
            tokio::spawn(coordinator.clone().pump_fetch_messages(fetch_rx)),
            tokio::spawn(pump_output_signals(
                coordinator.clone(),
                parts.output_signals,
                shutdown.clone(),
            )),
        ];
        tracing::debug!("playback session started");
        Self {
            coordinator,
            shutdown,
            tasks,
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.coordinator.subscribe()
    }

    /// Stop playback, cancel every download and wait for the session tasks.
    pub async fn shutdown(mut self) {
        self.coordinator.shutdown();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "session task failed");
            }
        }
        tracing::debug!("playback session closed");
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            self.coordinator.shutdown();
        }
    }
}

async fn pump_output_signals(
    coordinator: Arc<Coordinator>,
    mut rx: mpsc::UnboundedReceiver<OutputSignal>,
    shutdown: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            _ = shutdown.cancelled() => break,
            signal = rx.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };
        tracing::debug!(?signal, "output signal");
        coordinator.on_output_signal(signal).await;
    }
}
