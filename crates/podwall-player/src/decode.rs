//! In-memory audio decoding.
//!
//! Uses Symphonia to probe a byte buffer (the contiguous prefix of a track
//! received so far) and decode it into interleaved `f32` samples. Truncated
//! input is expected: decoding stops at the first packet that cannot be read.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, DecoderOptions};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::DecodeError;

/// Playable PCM produced from a track's received bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: usize,
    /// Interleaved samples.
    pub samples: Vec<f32>,
    /// Codec label (best-effort).
    pub codec: Option<&'static str>,
}

impl DecodedAudio {
    pub fn frames(&self) -> u64 {
        if self.channels == 0 {
            return 0;
        }
        (self.samples.len() / self.channels) as u64
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    /// Whether there is audio left to play after `offset_frames`.
    pub fn covers(&self, offset_frames: u64) -> bool {
        self.frames() > offset_frames
    }
}

/// Turns raw container bytes into PCM. Implementations are blocking.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, bytes: Bytes) -> Result<DecodedAudio, DecodeError>;
}

/// Run `decoder` on the blocking pool and hand back the result.
pub async fn decode_in_background(
    decoder: Arc<dyn AudioDecoder>,
    bytes: Bytes,
) -> Result<DecodedAudio, DecodeError> {
    tokio::task::spawn_blocking(move || decoder.decode(bytes))
        .await
        .map_err(|e| DecodeError::Task(e.to_string()))?
}

/// Symphonia-backed decoder for every format the workspace enables.
#[derive(Clone, Debug, Default)]
pub struct SymphoniaDecoder {
    /// Extension hint for the prober, e.g. `m4a`.
    extension: Option<String>,
}

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extension(extension: impl Into<String>) -> Self {
        Self {
            extension: Some(extension.into()),
        }
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: Bytes) -> Result<DecodedAudio, DecodeError> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = self.extension.as_deref() {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::Probe(e.to_string()))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();
        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Probe(e.to_string()))?;

        let mut spec: Option<SignalSpec> = None;
        let mut samples = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(_) => break,
            };
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(_) => continue,
            };
            let packet_spec = *decoded.spec();
            if *spec.get_or_insert(packet_spec) != packet_spec {
                tracing::debug!(track = track_id, "signal spec changed mid-stream; stopping");
                break;
            }
            let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, packet_spec);
            sample_buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(sample_buf.samples());
        }

        let spec = spec.ok_or(DecodeError::Empty)?;
        if samples.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(DecodedAudio {
            sample_rate: spec.rate,
            channels: spec.channels.count(),
            samples,
            codec: codec_name_from_params(&codec_params),
        })
    }
}

/// Best-effort codec label for logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}
