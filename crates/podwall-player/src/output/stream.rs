//! CPAL output stream and its real-time callback.
//!
//! The callback refills a local buffer from the queue without blocking, maps
//! channels (mono and stereo, best effort otherwise) and converts to the
//! device sample format. Underruns and pause both produce silence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::DeviceTrait;

use crate::error::OutputError;
use crate::output::samples::{PopStrategy, SharedAudio};

#[derive(Clone, Debug)]
pub struct StreamOptions {
    /// Frames pulled from the queue per refill.
    pub refill_max_frames: usize,
    /// While set, output silence and leave the queue untouched.
    pub paused: Arc<AtomicBool>,
}

pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SharedAudio>,
    opts: StreamOptions,
) -> Result<cpal::Stream, OutputError> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, opts),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, opts),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, opts),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, opts),
        other => Err(OutputError::Stream(format!(
            "unsupported sample format {other:?}"
        ))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SharedAudio>,
    opts: StreamOptions,
) -> Result<cpal::Stream, OutputError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let dst_channels = (config.channels as usize).max(1);
    let refill_max_frames = opts.refill_max_frames.max(1);
    let queue = queue.clone();
    let paused = opts.paused;
    let mut local = LocalBuffer::new(queue.channels());
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                if paused.load(Ordering::Relaxed) {
                    data.fill(silence);
                    return;
                }
                let frames = data.len() / dst_channels;
                for frame_idx in 0..frames {
                    let start = frame_idx * dst_channels;
                    if local.is_empty() {
                        match queue.pop(PopStrategy::NonBlocking {
                            max_frames: refill_max_frames,
                        }) {
                            Some(samples) => local.refill(samples),
                            None => {
                                data[start..].fill(silence);
                                return;
                            }
                        }
                    }
                    local.write_frame(&mut data[start..start + dst_channels]);
                }
            },
            |err| tracing::warn!(error = %err, "output stream error"),
            None,
        )
        .map_err(|e| OutputError::Stream(e.to_string()))
}

/// Samples popped from the queue and not yet written.
struct LocalBuffer {
    src_channels: usize,
    pos: usize,
    src: Vec<f32>,
}

impl LocalBuffer {
    fn new(src_channels: usize) -> Self {
        Self {
            src_channels: src_channels.max(1),
            pos: 0,
            src: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn refill(&mut self, samples: Vec<f32>) {
        self.src = samples;
        self.pos = 0;
    }

    /// Write one source frame into `out`, mapping channels.
    fn write_frame<T>(&mut self, out: &mut [T])
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let dst_channels = out.len();
        for (dst_ch, slot) in out.iter_mut().enumerate() {
            *slot = <T as cpal::Sample>::from_sample::<f32>(self.mapped(dst_channels, dst_ch));
        }
        self.pos += self.src_channels;
    }

    fn mapped(&self, dst_channels: usize, dst_ch: usize) -> f32 {
        let get = |ch: usize| self.src.get(self.pos + ch).copied().unwrap_or(0.0);
        match (self.src_channels, dst_channels) {
            (1, _) => get(0),
            (2, 1) => 0.5 * (get(0) + get(1)),
            (src, _) => get(dst_ch.min(src - 1)),
        }
    }
}
