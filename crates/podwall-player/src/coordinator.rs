//! Playback queue coordinator.
//!
//! Owns the queue and the live per-track pipelines (fetch + assembler), and
//! is the only component that drives the audio output. All state sits behind
//! one lock that is never held across an await; events are published while
//! it is held so subscribers see transitions in the order they happened.
//!
//! Asynchronous hand-offs (waiting for a buffer, then playing it) capture an
//! epoch and give up if anything else took over the output meanwhile.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use podwall_types::{AudioLocator, PlayerEvent, QueueEntry, QueueEntryState, TrackId};

use crate::assembler::{PollOutcome, TrackAssembler};
use crate::config::PlaybackConfig;
use crate::decode::{AudioDecoder, DecodedAudio};
use crate::error::{OutputError, PlayError, ResolveError};
use crate::events::{EventPublisher, EventSubscription};
use crate::fetcher::{ChunkFetcher, FetchHandle, FetchMessage};
use crate::output::{AudioOutput, OutputSignal, PlayableBuffer};
use crate::queue::PlaybackQueue;
use crate::resolver::SourceResolver;
use crate::telemetry::Telemetry;

/// Everything the coordinator needs from its session.
pub struct CoordinatorParts {
    pub fetcher: ChunkFetcher,
    pub decoder: Arc<dyn AudioDecoder>,
    pub resolver: Arc<dyn SourceResolver>,
    pub telemetry: Arc<dyn Telemetry>,
    pub output: Arc<dyn AudioOutput>,
    pub publisher: EventPublisher,
    pub playback: PlaybackConfig,
    pub fetch_tx: mpsc::Sender<FetchMessage>,
    pub shutdown: CancellationToken,
}

struct LiveTrack {
    assembler: Arc<TrackAssembler>,
    fetch: FetchHandle,
}

impl LiveTrack {
    fn teardown(self) {
        self.fetch.cancel();
        self.assembler.close();
    }
}

#[derive(Default)]
struct CoordinatorState {
    queue: PlaybackQueue,
    live: HashMap<TrackId, LiveTrack>,
    /// A hand-off is waiting for the first playable buffer while idle.
    starting: bool,
    /// Bumped whenever something else takes over the output.
    epoch: u64,
}

enum TrackOutcome {
    Playable(PlayableBuffer),
    /// Played to the end, evicted, or no longer live.
    Unavailable,
}

pub struct Coordinator {
    state: Mutex<CoordinatorState>,
    fetcher: ChunkFetcher,
    decoder: Arc<dyn AudioDecoder>,
    resolver: Arc<dyn SourceResolver>,
    telemetry: Arc<dyn Telemetry>,
    output: Arc<dyn AudioOutput>,
    publisher: EventPublisher,
    playback: PlaybackConfig,
    fetch_tx: mpsc::Sender<FetchMessage>,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(parts: CoordinatorParts) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CoordinatorState::default()),
            fetcher: parts.fetcher,
            decoder: parts.decoder,
            resolver: parts.resolver,
            telemetry: parts.telemetry,
            output: parts.output,
            publisher: parts.publisher,
            playback: parts.playback,
            fetch_tx: parts.fetch_tx,
            shutdown: parts.shutdown,
        })
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.publisher.subscribe()
    }

    pub fn queue_snapshot(&self) -> Vec<QueueEntry> {
        self.lock().queue.entries().to_vec()
    }

    pub fn state_of(&self, track_id: TrackId) -> Option<QueueEntryState> {
        self.lock().queue.state_of(track_id)
    }

    /// Any entry still waiting to play.
    pub fn has_queued(&self) -> bool {
        self.lock().queue.has_pending()
    }

    /// Resolve `track_id`, queue it and start downloading.
    ///
    /// Starts playback as soon as audio is decoded when nothing else is
    /// playing. A track that is already live is left alone; a historic one is
    /// downloaded again.
    pub async fn play_or_queue(
        self: &Arc<Self>,
        track_id: TrackId,
    ) -> Result<QueueEntryState, PlayError> {
        if let Some(state) = self.live_state(track_id) {
            return Ok(state);
        }
        if self.shutdown.is_cancelled() {
            return Err(PlayError::Closed);
        }

        let url = match self.resolver.resolve(track_id).await {
            Ok(AudioLocator::Ready { url }) => url,
            Ok(AudioLocator::Uploading) => {
                return Err(self.resolve_failed(ResolveError::Uploading(track_id)));
            }
            Err(err) => return Err(self.resolve_failed(err)),
        };

        let mut st = self.lock();
        if self.shutdown.is_cancelled() {
            return Err(PlayError::Closed);
        }
        if st.live.contains_key(&track_id) {
            if let Some(state) = st.queue.state_of(track_id) {
                return Ok(state);
            }
        }

        let (mut entry, mut created) = st.queue.enqueue(track_id);
        if entry.state == QueueEntryState::Historic && st.queue.requeue(track_id) {
            entry.state = QueueEntryState::OnQueue;
            created = true;
        }
        if created {
            self.publisher.publish(PlayerEvent::Queued { track_id });
        }
        let assembler = Arc::new(TrackAssembler::new(track_id, self.decoder.clone()));
        let fetch = self.fetcher.start(track_id, url.clone(), self.fetch_tx.clone());
        st.live.insert(track_id, LiveTrack { assembler, fetch });
        tracing::info!(track_id, url = %url, state = ?entry.state, "track queued");

        let idle = st.queue.current().is_none() && !st.starting;
        let epoch = st.epoch;
        if idle {
            st.starting = true;
        }
        drop(st);

        if idle {
            let this = self.clone();
            tokio::spawn(async move { this.hand_off(track_id, 0, epoch).await });
        }
        Ok(entry.state)
    }

    fn live_state(&self, track_id: TrackId) -> Option<QueueEntryState> {
        let st = self.lock();
        if st.live.contains_key(&track_id) {
            st.queue.state_of(track_id)
        } else {
            None
        }
    }

    fn resolve_failed(&self, err: ResolveError) -> PlayError {
        let track_id = match &err {
            ResolveError::NotFound(id) | ResolveError::Uploading(id) => Some(*id),
            ResolveError::Request(_) => None,
        };
        tracing::warn!(?track_id, error = %err, "could not resolve audio");
        self.publisher.error(track_id, None, err.to_string(), true);
        PlayError::Resolve(err)
    }

    /// Stop the current track and start the one queued after it.
    ///
    /// The output is stopped rather than paused: the next `play` replaces its
    /// stream anyway. Returns the track that was started, if any.
    pub async fn play_next(&self) -> Option<TrackId> {
        let (next, epoch) = {
            let mut st = self.lock();
            self.output.stop();
            let current = st.queue.current().map(|e| e.track_id);
            let Some(next) = st.queue.advance_after(current) else {
                tracing::info!(?current, "nothing queued after current track");
                self.stop_all_locked(&mut st);
                return None;
            };
            self.set_playing_locked(&mut st, next);
            (next, st.epoch)
        };
        self.hand_off(next, 0, epoch).await;
        Some(next)
    }

    /// The output drained the buffer of `track_id` at `position_frames`.
    pub async fn on_output_ended(&self, track_id: TrackId, position_frames: u64) {
        let epoch = {
            let st = self.lock();
            if st.queue.playing() != Some(track_id) {
                tracing::debug!(track_id, "ignoring end of a track that is not playing");
                return;
            }
            st.epoch
        };
        self.hand_off(track_id, position_frames, epoch).await;
    }

    /// The output could not play a buffer of `track_id`.
    pub async fn on_output_failed(&self, track_id: TrackId, error: OutputError) {
        let epoch = {
            let mut st = self.lock();
            if st.queue.current().map(|e| e.track_id) != Some(track_id) {
                return;
            }
            self.evict_locked(&mut st, track_id, Some(error.to_string()));
            st.epoch
        };
        self.hand_off(track_id, 0, epoch).await;
    }

    pub async fn on_output_signal(&self, signal: OutputSignal) {
        match signal {
            OutputSignal::Ended {
                track_id,
                position_frames,
            } => self.on_output_ended(track_id, position_frames).await,
            OutputSignal::Failed { track_id, error } => self.on_output_failed(track_id, error).await,
        }
    }

    /// Find audio for `track_id` at `offset` (or whatever plays next) and drive the output with it.
    async fn hand_off(&self, track_id: TrackId, offset_frames: u64, epoch: u64) {
        let buffer = self
            .next_playable_buffer(track_id, offset_frames, self.playback.retry_budget)
            .await;
        let mut st = self.lock();
        if st.epoch != epoch || self.shutdown.is_cancelled() {
            tracing::debug!(track_id, "hand-off superseded");
            return;
        }
        match buffer {
            Some(buf) if st.queue.playing() == Some(buf.track_id) => {
                self.drive_output_locked(&mut st, buf);
            }
            Some(buf) => {
                let next = buf.track_id;
                self.set_playing_locked(&mut st, next);
                self.drive_output_locked(&mut st, buf);
            }
            None => self.stop_all_locked(&mut st),
        }
    }

    /// Audio for `track_id` covering `offset_frames`, or for the next queued
    /// track that has any.
    ///
    /// A track without audio is polled up to `retry_budget` times, waiting the
    /// configured backoff (or for fresh audio) between attempts, and evicted
    /// once the budget is spent.
    pub async fn next_playable_buffer(
        &self,
        track_id: TrackId,
        offset_frames: u64,
        retry_budget: u32,
    ) -> Option<PlayableBuffer> {
        let mut target = track_id;
        let mut offset = offset_frames;
        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }
            match self.try_track(target, offset, retry_budget).await {
                TrackOutcome::Playable(buf) => return Some(buf),
                TrackOutcome::Unavailable => {
                    let next = self.lock().queue.advance_after(Some(target));
                    match next {
                        Some(next) => {
                            tracing::debug!(from = target, to = next, "advancing queue");
                            target = next;
                            offset = 0;
                        }
                        None => return None,
                    }
                }
            }
        }
    }

    async fn try_track(&self, track_id: TrackId, offset: u64, retry_budget: u32) -> TrackOutcome {
        let Some(assembler) = self.assembler(track_id) else {
            return TrackOutcome::Unavailable;
        };
        let playable = |audio: Arc<DecodedAudio>| {
            TrackOutcome::Playable(PlayableBuffer {
                track_id,
                audio,
                offset_frames: offset,
            })
        };

        let mut attempts = 0u32;
        loop {
            if let PollOutcome::Decoded(audio) = self.poll_track(track_id, &assembler).await {
                if audio.covers(offset) {
                    return playable(audio);
                }
            }

            let changed = assembler.changed();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if self.assembler(track_id).is_none() {
                return TrackOutcome::Unavailable;
            }
            let decoded = assembler.decoded();
            if let Some(audio) = decoded.clone().filter(|a| a.covers(offset)) {
                return playable(audio);
            }
            if assembler.is_exhausted() {
                if decoded.is_some() {
                    tracing::debug!(track_id, offset, "track finished");
                } else if assembler.has_failed() {
                    self.evict(track_id, None);
                } else {
                    self.evict(track_id, Some("no decodable audio".to_string()));
                }
                return TrackOutcome::Unavailable;
            }
            if attempts >= retry_budget {
                tracing::warn!(track_id, attempts, offset, "audio not ready; evicting");
                self.evict(
                    track_id,
                    Some(format!("audio not ready after {attempts} retries")),
                );
                return TrackOutcome::Unavailable;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.playback.retry_backoff()) => {
                    attempts += 1;
                    tracing::debug!(track_id, attempts, "retrying buffer");
                }
                _ = &mut changed => {}
                _ = self.shutdown.cancelled() => return TrackOutcome::Unavailable,
            }
        }
    }

    fn assembler(&self, track_id: TrackId) -> Option<Arc<TrackAssembler>> {
        self.lock().live.get(&track_id).map(|t| t.assembler.clone())
    }

    /// Poll once; a successful decode marks the entry ready.
    async fn poll_track(&self, track_id: TrackId, assembler: &TrackAssembler) -> PollOutcome {
        let outcome = assembler.poll().await;
        if matches!(outcome, PollOutcome::Decoded(_)) {
            let mut st = self.lock();
            if st.live.contains_key(&track_id) && st.queue.mark_ready(track_id) {
                self.publisher.publish(PlayerEvent::Ready { track_id });
            }
        }
        outcome
    }

    /// Decode until the assembler has nothing new, waiting out a decode that
    /// someone else started.
    async fn drive_decode(&self, track_id: TrackId, assembler: Arc<TrackAssembler>) {
        loop {
            let changed = assembler.changed();
            tokio::pin!(changed);
            changed.as_mut().enable();
            match self.poll_track(track_id, &assembler).await {
                PollOutcome::Busy => changed.await,
                PollOutcome::Decoded(_) | PollOutcome::Failed(_) => {}
                PollOutcome::NothingNew => return,
            }
        }
    }

    /// Route one message from a fetch task.
    pub fn handle_fetch_message(self: &Arc<Self>, msg: FetchMessage) {
        match msg {
            FetchMessage::Progress {
                track_id,
                seq,
                last,
            } => {
                let st = self.lock();
                if st.live.contains_key(&track_id) {
                    self.publisher.progress(track_id, seq, last);
                }
            }
            FetchMessage::Piece {
                track_id,
                seq,
                last,
                bytes,
            } => {
                let Some(assembler) = self.assembler(track_id) else {
                    return;
                };
                assembler.feed(seq, bytes, last);
                let this = self.clone();
                tokio::spawn(async move { this.drive_decode(track_id, assembler).await });
            }
            FetchMessage::Error {
                track_id,
                seq,
                error,
            } => {
                let mut st = self.lock();
                let Some(assembler) = st.live.get(&track_id).map(|t| t.assembler.clone()) else {
                    return;
                };
                let terminal = error.is_fatal();
                self.publisher.error(Some(track_id), seq, error.to_string(), terminal);
                if !terminal {
                    return;
                }
                if st.queue.current().map(|e| e.track_id) == Some(track_id) {
                    // Keep playing what was decoded; the track ends there.
                    assembler.mark_failed();
                } else {
                    self.evict_locked(&mut st, track_id, None);
                }
            }
        }
    }

    /// Forward fetch messages until the channel closes or the session shuts down.
    pub async fn pump_fetch_messages(self: Arc<Self>, mut rx: mpsc::Receiver<FetchMessage>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => self.handle_fetch_message(msg),
                    None => break,
                },
            }
        }
        tracing::debug!("fetch message pump stopped");
    }

    pub fn pause(&self) -> bool {
        let mut st = self.lock();
        let Some(track_id) = st.queue.pause() else {
            return false;
        };
        self.output.pause();
        self.publisher.paused();
        self.telemetry.track_stopped(track_id);
        true
    }

    pub fn resume(&self) -> bool {
        let mut st = self.lock();
        let Some(track_id) = st.queue.resume() else {
            return false;
        };
        self.output.resume();
        self.publisher.playing(track_id);
        self.telemetry.track_started(track_id);
        true
    }

    /// Stop the output; the current track becomes historic.
    pub fn stop(&self) {
        let mut st = self.lock();
        self.stop_all_locked(&mut st);
    }

    /// Abandon a track: its download stops and its entry becomes historic.
    pub fn cancel(&self, track_id: TrackId) -> bool {
        let mut st = self.lock();
        let Some(live) = st.live.remove(&track_id) else {
            return false;
        };
        live.teardown();
        let was_current = matches!(
            st.queue.mark_historic(track_id),
            Some(QueueEntryState::Playing | QueueEntryState::Paused)
        );
        tracing::info!(track_id, was_current, "track cancelled");
        if was_current {
            self.telemetry.track_stopped(track_id);
            self.stop_all_locked(&mut st);
        } else {
            self.publisher.error(Some(track_id), None, "cancelled", true);
        }
        true
    }

    /// Cancel every download and stop the output.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let mut st = self.lock();
        self.stop_all_locked(&mut st);
        for (_, live) in st.live.drain() {
            live.teardown();
        }
    }

    fn set_playing_locked(&self, st: &mut CoordinatorState, track_id: TrackId) {
        for prev in st.queue.set_playing(track_id) {
            if let Some(live) = st.live.remove(&prev) {
                live.teardown();
            }
            self.telemetry.track_stopped(prev);
        }
        st.starting = false;
        st.epoch += 1;
        self.publisher.playing(track_id);
        self.telemetry.track_started(track_id);
    }

    fn drive_output_locked(&self, st: &mut CoordinatorState, buf: PlayableBuffer) {
        let track_id = buf.track_id;
        tracing::debug!(
            track_id,
            offset = buf.offset_frames,
            frames = buf.audio.frames(),
            "handing buffer to output"
        );
        if let Err(err) = self.output.play(buf) {
            tracing::warn!(track_id, error = %err, "output rejected buffer");
            self.evict_locked(st, track_id, Some(err.to_string()));
            self.stop_all_locked(st);
        }
    }

    fn stop_all_locked(&self, st: &mut CoordinatorState) {
        self.output.stop();
        if let Some(current) = st.queue.current() {
            st.queue.mark_historic(current.track_id);
            if let Some(live) = st.live.remove(&current.track_id) {
                live.teardown();
            }
            self.telemetry.track_stopped(current.track_id);
        }
        st.starting = false;
        st.epoch += 1;
        self.publisher.stopped();
    }

    fn evict(&self, track_id: TrackId, cause: Option<String>) {
        let mut st = self.lock();
        self.evict_locked(&mut st, track_id, cause);
    }

    /// Drop the live pipeline and mark the entry historic, publishing `cause` as a terminal error.
    fn evict_locked(&self, st: &mut CoordinatorState, track_id: TrackId, cause: Option<String>) {
        if let Some(live) = st.live.remove(&track_id) {
            live.teardown();
        }
        let previous = st.queue.mark_historic(track_id);
        if matches!(
            previous,
            Some(QueueEntryState::Playing | QueueEntryState::Paused)
        ) {
            self.telemetry.track_stopped(track_id);
        }
        tracing::info!(track_id, ?previous, ?cause, "track evicted");
        if let Some(cause) = cause {
            self.publisher.error(Some(track_id), None, cause, true);
        }
    }
}
