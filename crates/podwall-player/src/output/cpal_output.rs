//! CPAL-backed [`AudioOutput`].
//!
//! `cpal::Stream` is not `Send`, so a dedicated thread owns the device and
//! every stream; the handle only sends it commands. Each played buffer gets
//! its own pipeline: a feeder thread pushes samples from the start offset, a
//! resampler runs when the device rate differs, and a watcher reports
//! [`OutputSignal::Ended`] once the queue drains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc as std_mpsc};
use std::thread;

use cpal::traits::StreamTrait;
use tokio::sync::mpsc;

use crate::config::PlaybackConfig;
use crate::error::OutputError;
use crate::output::device::{pick_buffer_size, pick_device, pick_output_config};
use crate::output::resample::{ResampleConfig, start_resampler};
use crate::output::samples::{SharedAudio, calc_max_buffered_samples};
use crate::output::stream::{StreamOptions, build_output_stream};
use crate::output::{AudioOutput, OutputSignal, PlayableBuffer};

enum Command {
    Play(PlayableBuffer),
    Pause,
    Resume,
    Stop,
}

pub struct CpalOutput {
    commands: std_mpsc::Sender<Command>,
}

impl CpalOutput {
    /// Open the output device (by name substring, or the default) on a new thread.
    pub fn start(
        device_name: Option<String>,
        cfg: &PlaybackConfig,
        signals: mpsc::UnboundedSender<OutputSignal>,
    ) -> Result<Self, OutputError> {
        let (commands, rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let cfg = cfg.clone();
        thread::Builder::new()
            .name("podwall-output".to_string())
            .spawn(move || {
                let host = cpal::default_host();
                let device = match pick_device(&host, device_name.as_deref()) {
                    Ok(d) => d,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                run_device(device, cfg, rx, signals);
            })
            .map_err(|e| OutputError::Device(e.to_string()))?;
        ready_rx
            .recv()
            .map_err(|_| OutputError::Device("output thread exited".to_string()))??;
        Ok(Self { commands })
    }

    fn send(&self, cmd: Command) -> Result<(), OutputError> {
        self.commands
            .send(cmd)
            .map_err(|_| OutputError::Stream("output thread stopped".to_string()))
    }
}

impl AudioOutput for CpalOutput {
    fn play(&self, buffer: PlayableBuffer) -> Result<(), OutputError> {
        self.send(Command::Play(buffer))
    }

    fn pause(&self) {
        let _ = self.send(Command::Pause);
    }

    fn resume(&self) {
        let _ = self.send(Command::Resume);
    }

    fn stop(&self) {
        let _ = self.send(Command::Stop);
    }
}

fn run_device(
    device: cpal::Device,
    cfg: PlaybackConfig,
    rx: std_mpsc::Receiver<Command>,
    signals: mpsc::UnboundedSender<OutputSignal>,
) {
    let mut active: Option<ActivePlayback> = None;
    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Play(buffer) => {
                if let Some(prev) = active.take() {
                    prev.stop();
                }
                let track_id = buffer.track_id;
                match ActivePlayback::start(&device, buffer, &cfg, signals.clone()) {
                    Ok(playback) => active = Some(playback),
                    Err(error) => {
                        tracing::warn!(track_id, error = %error, "failed to start output");
                        let _ = signals.send(OutputSignal::Failed { track_id, error });
                    }
                }
            }
            Command::Pause => {
                if let Some(p) = &active {
                    p.paused.store(true, Ordering::Relaxed);
                }
            }
            Command::Resume => {
                if let Some(p) = &active {
                    p.paused.store(false, Ordering::Relaxed);
                }
            }
            Command::Stop => {
                if let Some(p) = active.take() {
                    p.stop();
                }
            }
        }
    }
    if let Some(p) = active.take() {
        p.stop();
    }
    tracing::debug!("output thread finished");
}

struct ActivePlayback {
    _stream: cpal::Stream,
    src: Arc<SharedAudio>,
    dst: Arc<SharedAudio>,
    cancel: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
}

impl ActivePlayback {
    fn start(
        device: &cpal::Device,
        buffer: PlayableBuffer,
        cfg: &PlaybackConfig,
        signals: mpsc::UnboundedSender<OutputSignal>,
    ) -> Result<Self, OutputError> {
        let audio = buffer.audio.clone();
        let channels = audio.channels.max(1);
        let supported = pick_output_config(device, audio.sample_rate)?;
        let mut stream_config: cpal::StreamConfig = supported.clone().into();
        if let Some(size) = pick_buffer_size(&supported) {
            stream_config.buffer_size = size;
        }
        let dst_rate = stream_config.sample_rate;

        let src = Arc::new(SharedAudio::new(
            channels,
            calc_max_buffered_samples(audio.sample_rate, channels, cfg.buffer_seconds),
        ));
        let dst = if audio.sample_rate == dst_rate {
            src.clone()
        } else {
            tracing::info!(from_hz = audio.sample_rate, to_hz = dst_rate, "resampling");
            start_resampler(
                src.clone(),
                audio.sample_rate,
                dst_rate,
                ResampleConfig {
                    chunk_frames: cfg.chunk_frames,
                    buffer_seconds: cfg.buffer_seconds,
                },
            )
        };

        let cancel = Arc::new(AtomicBool::new(false));
        let paused = Arc::new(AtomicBool::new(false));
        let stream = build_output_stream(
            device,
            &stream_config,
            supported.sample_format(),
            &dst,
            StreamOptions {
                refill_max_frames: cfg.refill_max_frames,
                paused: paused.clone(),
            },
        )?;

        spawn_feeder(buffer.clone(), src.clone(), cancel.clone(), cfg.chunk_frames);
        spawn_watcher(buffer, dst.clone(), cancel.clone(), signals);
        stream
            .play()
            .map_err(|e| OutputError::Stream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            src,
            dst,
            cancel,
            paused,
        })
    }

    fn stop(self) {
        self.cancel.store(true, Ordering::Relaxed);
        self.src.abort();
        self.dst.abort();
    }
}

/// Push the buffer's samples from its offset into `queue`, then close it.
fn spawn_feeder(
    buffer: PlayableBuffer,
    queue: Arc<SharedAudio>,
    cancel: Arc<AtomicBool>,
    chunk_frames: usize,
) {
    thread::spawn(move || {
        let audio = &buffer.audio;
        let channels = audio.channels.max(1);
        let start = (buffer.offset_frames as usize)
            .saturating_mul(channels)
            .min(audio.samples.len());
        let chunk = chunk_frames.max(1) * channels;
        for samples in audio.samples[start..].chunks(chunk) {
            if cancel.load(Ordering::Relaxed) || !queue.push_interleaved_blocking(samples) {
                return;
            }
        }
        queue.close();
    });
}

/// Report the end of the buffer once the final queue drains.
fn spawn_watcher(
    buffer: PlayableBuffer,
    queue: Arc<SharedAudio>,
    cancel: Arc<AtomicBool>,
    signals: mpsc::UnboundedSender<OutputSignal>,
) {
    thread::spawn(move || {
        if queue.wait_until_drained_or_cancel(&cancel) {
            let position_frames = buffer.audio.frames();
            tracing::debug!(track_id = buffer.track_id, position_frames, "buffer drained");
            let _ = signals.send(OutputSignal::Ended {
                track_id: buffer.track_id,
                position_frames,
            });
        }
    });
}

