//! Piece planning and download throttling.
//!
//! A track is fetched as a sequence of inclusive byte ranges ("pieces"). Only
//! the first piece is known up front; the rest are planned once the server
//! reports the total length.

use std::collections::VecDeque;

use crate::config::FetchConfig;

/// One range request for a track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Piece {
    /// Sequence index within the track, starting at 0.
    pub seq: u32,
    /// First byte (inclusive).
    pub start: u64,
    /// Last byte (inclusive).
    pub end: u64,
    /// Final piece of the track.
    pub last: bool,
}

impl Piece {
    /// `Range` header value for this piece.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }
}

/// The first request: `[0, first_chunk_bytes - 1]`, issued before the total length is known.
pub fn first_piece(config: &FetchConfig) -> Piece {
    Piece {
        seq: 0,
        start: 0,
        end: config.first_chunk_bytes.max(1) - 1,
        last: false,
    }
}

/// Plan the pieces after the first one for a resource of `total_len` bytes.
///
/// Windows of `window_bytes` start right after the first piece; the final one is
/// clamped to the last byte and marked `last`. Returns an empty list when the
/// first piece already covers the resource.
pub fn plan_remaining(total_len: u64, config: &FetchConfig) -> VecDeque<Piece> {
    let window = config.window_bytes.max(1);
    let mut pieces = VecDeque::new();
    let mut start = config.first_chunk_bytes.max(1);
    let mut seq = 1u32;
    while start < total_len {
        let end = start.saturating_add(window - 1).min(total_len - 1);
        pieces.push_back(Piece {
            seq,
            start,
            end,
            last: end == total_len - 1,
        });
        seq += 1;
        start = end + 1;
    }
    pieces
}

/// Escalating-threshold throttle.
///
/// Once a piece starts past the threshold, the caller pauses and the threshold
/// moves up by one step.
#[derive(Debug)]
pub struct Throttle {
    threshold: u64,
    step: u64,
}

impl Throttle {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            threshold: config.throttle_threshold_bytes,
            step: config.throttle_step_bytes.max(1),
        }
    }

    /// Whether a pause is due before fetching a piece starting at `start`.
    pub fn should_pause(&mut self, start: u64) -> bool {
        if start > self.threshold {
            self.threshold = self.threshold.saturating_add(self.step);
            true
        } else {
            false
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}
