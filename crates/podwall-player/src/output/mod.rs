//! Audio output.
//!
//! The coordinator hands [`PlayableBuffer`]s to an [`AudioOutput`] and learns
//! about drained buffers through [`OutputSignal`]s.

mod cpal_output;
mod device;
mod resample;
mod samples;
mod stream;

use std::sync::Arc;

use podwall_types::TrackId;

use crate::decode::DecodedAudio;
use crate::error::OutputError;

pub use self::cpal_output::CpalOutput;
pub use self::device::list_devices;

/// Decoded audio to play, starting `offset_frames` into it.
#[derive(Clone, Debug)]
pub struct PlayableBuffer {
    pub track_id: TrackId,
    pub audio: Arc<DecodedAudio>,
    pub offset_frames: u64,
}

impl PlayableBuffer {
    pub fn remaining_frames(&self) -> u64 {
        self.audio.frames().saturating_sub(self.offset_frames)
    }
}

/// Reported by the output back to the coordinator.
#[derive(Clone, Debug, PartialEq)]
pub enum OutputSignal {
    /// Playback ran off the end of the buffer.
    Ended { track_id: TrackId, position_frames: u64 },
    /// The buffer could not be played.
    Failed { track_id: TrackId, error: OutputError },
}

/// Sink for decoded audio. Calls return immediately; playback is asynchronous.
pub trait AudioOutput: Send + Sync {
    /// Replace whatever is playing with `buffer`.
    fn play(&self, buffer: PlayableBuffer) -> Result<(), OutputError>;
    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_frames_saturates() {
        let audio = Arc::new(DecodedAudio {
            sample_rate: 8_000,
            channels: 2,
            samples: vec![0.0; 200],
            codec: None,
        });
        let buffer = PlayableBuffer {
            track_id: 1,
            audio: audio.clone(),
            offset_frames: 40,
        };
        assert_eq!(buffer.remaining_frames(), 60);
        let past_end = PlayableBuffer {
            offset_frames: 500,
            ..buffer
        };
        assert_eq!(past_end.remaining_frames(), 0);
    }
}
