//! Output device and stream-config selection.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::OutputError;

/// Largest fixed buffer requested from the device, in frames.
const MAX_BUFFER_FRAMES: u32 = 16_384;

/// First output device whose name contains `needle` (case-insensitive),
/// or the host default.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device, OutputError> {
    if let Some(needle) = needle {
        let mut devices = host
            .output_devices()
            .map_err(|e| OutputError::Device(e.to_string()))?;
        return devices
            .find(|d| {
                d.description()
                    .map(|desc| matches_device_name(&desc.name(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| OutputError::Device(format!("no output device matched {needle:?}")));
    }
    host.default_output_device()
        .ok_or_else(|| OutputError::Device("no default output device".to_string()))
}

/// Output config closest to `target_rate`.
///
/// Prefers the highest rate not above the target, then the best sample format.
pub fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig, OutputError> {
    let ranges = device
        .supported_output_configs()
        .map_err(|e| OutputError::Device(e.to_string()))?;

    let mut best: Option<(Candidate, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate = pick_rate_for_range(range.min_sample_rate(), range.max_sample_rate(), target_rate);
        let candidate = Candidate {
            below: rate <= target_rate,
            rate,
            format_rank: sample_format_rank(range.sample_format()),
        };
        if best.as_ref().is_none_or(|(b, _)| candidate.is_better_than(b)) {
            best = Some((candidate, range.with_sample_rate(rate)));
        }
    }
    best.map(|(_, cfg)| cfg)
        .ok_or_else(|| OutputError::Device("no supported output configs".to_string()))
}

/// Largest fixed buffer the device offers, capped; `None` lets CPAL decide.
pub fn pick_buffer_size(config: &cpal::SupportedStreamConfig) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            let chosen = (*max).min(MAX_BUFFER_FRAMES).max(*min);
            Some(cpal::BufferSize::Fixed(chosen))
        }
        cpal::SupportedBufferSize::Unknown => None,
    }
}

/// Names of the host's output devices.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<String>, OutputError> {
    let devices = host
        .output_devices()
        .map_err(|e| OutputError::Device(e.to_string()))?;
    Ok(devices
        .filter_map(|d| d.description().ok().map(|desc| desc.name().to_string()))
        .collect())
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    below: bool,
    rate: u32,
    format_rank: u8,
}

impl Candidate {
    fn is_better_than(&self, other: &Candidate) -> bool {
        if self.below != other.below {
            self.below
        } else if self.rate != other.rate {
            // Below the target, closer (higher) wins; above it, lower wins.
            if self.below {
                self.rate > other.rate
            } else {
                self.rate < other.rate
            }
        } else {
            self.format_rank < other.format_rank
        }
    }
}

fn pick_rate_for_range(min: u32, max: u32, target: u32) -> u32 {
    target.clamp(min, max.max(min))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I32 => 1,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}
