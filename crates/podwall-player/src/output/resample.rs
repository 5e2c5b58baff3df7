//! Sample-rate conversion between decoded audio and the output device.
//!
//! Runs Rubato's sinc resampler on its own thread, reading fixed-size chunks
//! from one [`SharedAudio`] queue and writing to another.

use std::sync::Arc;
use std::thread;

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::output::samples::{PopStrategy, SharedAudio, calc_max_buffered_samples};

#[derive(Clone, Copy, Debug)]
pub struct ResampleConfig {
    /// Input frames per resampler call.
    pub chunk_frames: usize,
    /// Capacity of the output queue, in seconds of audio.
    pub buffer_seconds: f32,
}

/// Start a resampler thread converting `src` from `src_rate` to `dst_rate`.
///
/// The returned queue is closed once `src` closes and its tail is flushed.
pub fn start_resampler(
    src: Arc<SharedAudio>,
    src_rate: u32,
    dst_rate: u32,
    cfg: ResampleConfig,
) -> Arc<SharedAudio> {
    let channels = src.channels();
    let dst = Arc::new(SharedAudio::new(
        channels,
        calc_max_buffered_samples(dst_rate, channels, cfg.buffer_seconds),
    ));
    let chunk_frames = cfg.chunk_frames.max(1);
    let f_ratio = dst_rate as f64 / src_rate.max(1) as f64;

    let out = dst.clone();
    thread::spawn(move || {
        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };
        let mut resampler = match Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        ) {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, "resampler init failed");
                out.close();
                return;
            }
        };
        tracing::debug!(src_rate, dst_rate, channels, "resampler started");

        let mut scratch = vec![0.0f32; channels * chunk_frames * 3];
        while let Some(chunk) = src.pop(PopStrategy::BlockingExact {
            frames: chunk_frames,
        }) {
            let Some(produced) =
                process_chunk(&mut resampler, &chunk, channels, None, &mut scratch)
            else {
                break;
            };
            if !out.push_interleaved_blocking(&scratch[..produced]) {
                break;
            }
        }
        while let Some(tail) = src.pop(PopStrategy::BlockingUpTo {
            max_frames: chunk_frames,
        }) {
            let tail_frames = tail.len() / channels;
            let Some(produced) =
                process_chunk(&mut resampler, &tail, channels, Some(tail_frames), &mut scratch)
            else {
                break;
            };
            if produced > 0 && !out.push_interleaved_blocking(&scratch[..produced]) {
                break;
            }
        }
        out.close();
    });
    dst
}

/// Resample one interleaved chunk into `scratch`; returns the produced sample count.
///
/// `partial_len` marks a short final chunk.
fn process_chunk(
    resampler: &mut Async<f32>,
    input: &[f32],
    channels: usize,
    partial_len: Option<usize>,
    scratch: &mut [f32],
) -> Option<usize> {
    let in_frames = input.len() / channels;
    let input_adapter = match InterleavedSlice::new(input, channels, in_frames) {
        Ok(a) => a,
        Err(e) => {
            tracing::error!(error = %e, "resampler input adapter");
            return None;
        }
    };
    let out_frames = scratch.len() / channels;
    let mut output_adapter = match InterleavedSlice::new_mut(scratch, channels, out_frames) {
        Ok(a) => a,
        Err(e) => {
            tracing::error!(error = %e, "resampler output adapter");
            return None;
        }
    };
    let indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len,
    };
    match resampler.process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing)) {
        Ok((_consumed, produced)) => Some(produced * channels),
        Err(e) => {
            tracing::error!(error = %e, "resampler process failed");
            None
        }
    }
}
