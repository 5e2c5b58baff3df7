//! Fakes shared by the coordinator and session tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Semaphore, mpsc};

use podwall_types::{AudioLocator, PlayerEvent, TrackId};

use crate::decode::{AudioDecoder, DecodedAudio};
use crate::error::{DecodeError, FetchError, OutputError, ResolveError};
use crate::events::EventSubscription;
use crate::http::{RangeClient, RangeResponse};
use crate::output::{AudioOutput, OutputSignal, PlayableBuffer};
use crate::piece::Piece;
use crate::resolver::SourceResolver;
use crate::telemetry::Telemetry;

pub(crate) fn url(track_id: TrackId) -> String {
    format!("mem://{track_id}")
}

/// In-memory range server. Gated pieces wait until `open_gate`.
pub(crate) struct MemoryClient {
    resources: HashMap<String, Vec<u8>>,
    failing: HashMap<String, u32>,
    gated: HashMap<String, u32>,
    gate: Semaphore,
}

impl MemoryClient {
    pub(crate) fn new() -> Self {
        Self {
            resources: HashMap::new(),
            failing: HashMap::new(),
            gated: HashMap::new(),
            gate: Semaphore::new(0),
        }
    }

    pub(crate) fn with(mut self, track_id: TrackId, data: &[u8]) -> Self {
        self.resources.insert(url(track_id), data.to_vec());
        self
    }

    /// Hold every piece from `seq` on until the gate opens.
    pub(crate) fn gated_from(mut self, track_id: TrackId, seq: u32) -> Self {
        self.gated.insert(url(track_id), seq);
        self
    }

    /// Answer 500 for piece `seq`, every time.
    pub(crate) fn failing_at(mut self, track_id: TrackId, seq: u32) -> Self {
        self.failing.insert(url(track_id), seq);
        self
    }

    pub(crate) fn open_gate(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl RangeClient for MemoryClient {
    async fn fetch_range(&self, url: &str, piece: &Piece) -> Result<RangeResponse, FetchError> {
        if self.gated.get(url).is_some_and(|&from| piece.seq >= from) {
            let _permit = self.gate.acquire().await.map_err(|_| FetchError::Cancelled)?;
        }
        if self.failing.get(url) == Some(&piece.seq) {
            return Ok(RangeResponse {
                status: 500,
                total_len: None,
                body: Bytes::new(),
            });
        }
        let Some(data) = self.resources.get(url) else {
            return Ok(RangeResponse {
                status: 404,
                total_len: None,
                body: Bytes::new(),
            });
        };
        let end = (piece.end as usize).min(data.len() - 1);
        Ok(RangeResponse {
            status: 206,
            total_len: Some(data.len() as u64),
            body: Bytes::copy_from_slice(&data[piece.start as usize..=end]),
        })
    }
}

/// One mono frame per byte; data starting with `!` does not decode.
pub(crate) struct StubDecoder;

impl AudioDecoder for StubDecoder {
    fn decode(&self, bytes: Bytes) -> Result<DecodedAudio, DecodeError> {
        if bytes.first() == Some(&b'!') {
            return Err(DecodeError::Probe("not audio".to_string()));
        }
        Ok(DecodedAudio {
            sample_rate: 1_000,
            channels: 1,
            samples: vec![0.0; bytes.len()],
            codec: None,
        })
    }
}

/// Resolves to `mem://{id}`; ids from 900 up are still uploading.
pub(crate) struct StubResolver;

#[async_trait]
impl SourceResolver for StubResolver {
    async fn resolve(&self, track_id: TrackId) -> Result<AudioLocator, ResolveError> {
        if track_id >= 900 {
            return Ok(AudioLocator::Uploading);
        }
        Ok(AudioLocator::Ready { url: url(track_id) })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum OutputCall {
    Play {
        track_id: TrackId,
        offset_frames: u64,
        frames: u64,
    },
    Pause,
    Resume,
    Stop,
}

/// Records calls; optionally reports every buffer as played to the end right away.
#[derive(Default)]
pub(crate) struct RecordingOutput {
    calls: Mutex<Vec<OutputCall>>,
    ended: Option<mpsc::UnboundedSender<OutputSignal>>,
}

impl RecordingOutput {
    pub(crate) fn auto_ending(signals: mpsc::UnboundedSender<OutputSignal>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            ended: Some(signals),
        }
    }

    pub(crate) fn calls(&self) -> Vec<OutputCall> {
        self.calls.lock().unwrap().clone()
    }

    /// `(track, offset, frames)` of every played buffer.
    pub(crate) fn plays(&self) -> Vec<(TrackId, u64, u64)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                OutputCall::Play {
                    track_id,
                    offset_frames,
                    frames,
                } => Some((track_id, offset_frames, frames)),
                _ => None,
            })
            .collect()
    }
}

impl AudioOutput for RecordingOutput {
    fn play(&self, buffer: PlayableBuffer) -> Result<(), OutputError> {
        let frames = buffer.audio.frames();
        self.calls.lock().unwrap().push(OutputCall::Play {
            track_id: buffer.track_id,
            offset_frames: buffer.offset_frames,
            frames,
        });
        if let Some(ended) = &self.ended {
            let _ = ended.send(OutputSignal::Ended {
                track_id: buffer.track_id,
                position_frames: frames,
            });
        }
        Ok(())
    }

    fn pause(&self) {
        self.calls.lock().unwrap().push(OutputCall::Pause);
    }

    fn resume(&self) {
        self.calls.lock().unwrap().push(OutputCall::Resume);
    }

    fn stop(&self) {
        self.calls.lock().unwrap().push(OutputCall::Stop);
    }
}

#[derive(Default)]
pub(crate) struct RecordingTelemetry {
    calls: Mutex<Vec<(TrackId, bool)>>,
}

impl RecordingTelemetry {
    pub(crate) fn calls(&self) -> Vec<(TrackId, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Telemetry for RecordingTelemetry {
    fn track_started(&self, track_id: TrackId) {
        self.calls.lock().unwrap().push((track_id, true));
    }

    fn track_stopped(&self, track_id: TrackId) {
        self.calls.lock().unwrap().push((track_id, false));
    }
}

/// Collect events up to and including the first one matching `done`.
pub(crate) async fn wait_for(
    events: &mut EventSubscription,
    mut done: impl FnMut(&PlayerEvent) -> bool,
) -> Vec<PlayerEvent> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            let stop = done(&event);
            seen.push(event);
            if stop {
                return;
            }
        }
    })
    .await
    .expect("expected event was not published");
    seen
}

pub(crate) async fn eventually(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}
