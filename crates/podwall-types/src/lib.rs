use serde::{Deserialize, Serialize};

/// Logical identifier of a playable post/episode.
pub type TrackId = u64;

/// Custom response header carrying the full resource length in bytes.
///
/// Sent on every audio response so the client can plan the remaining pieces
/// after its first range request.
pub const LENGTH_HEADER: &str = "x-length";

/// Lifecycle state of a playback queue entry.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryState {
    /// Queued, no playable audio decoded yet.
    OnQueue,
    /// At least one contiguous decode succeeded.
    Ready,
    /// Currently driving the output device.
    Playing,
    /// Output paused while this entry was playing.
    Paused,
    /// Superseded by another playing entry (or failed); can be played again.
    Historic,
}

/// One row of the playback queue.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct QueueEntry {
    pub track_id: TrackId,
    pub state: QueueEntryState,
}

/// Discrete playback events published to UI and telemetry consumers.
///
/// Consumers treat this stream as the only source of truth for player state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// A track started (or resumed) driving the output.
    Playing { track_id: TrackId },
    /// Output paused.
    Paused,
    /// Nothing is playing and nothing is pending.
    Stopped,
    /// A fetch, resolve, or output failure.
    Error {
        track_id: Option<TrackId>,
        piece_id: Option<u32>,
        cause: String,
        /// `true` when no further events will follow for this track.
        terminal: bool,
    },
    /// A piece was received for a track; `is_last` marks the final piece.
    Progress {
        track_id: TrackId,
        piece_id: u32,
        is_last: bool,
    },
    /// A new queue entry was created.
    Queued { track_id: TrackId },
    /// A queue entry became ready to play.
    Ready { track_id: TrackId },
}

impl PlayerEvent {
    /// Track the event refers to, if any.
    pub fn track_id(&self) -> Option<TrackId> {
        match self {
            PlayerEvent::Playing { track_id }
            | PlayerEvent::Progress { track_id, .. }
            | PlayerEvent::Queued { track_id }
            | PlayerEvent::Ready { track_id } => Some(*track_id),
            PlayerEvent::Error { track_id, .. } => *track_id,
            PlayerEvent::Paused | PlayerEvent::Stopped => None,
        }
    }
}

/// Result of resolving a post id to something streamable.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AudioLocator {
    /// Audio is available at `url` (supports range requests).
    Ready { url: String },
    /// The audio file is still being uploaded.
    Uploading,
}

/// Body of the "track started/stopped playing" telemetry call.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LivePlayRequest {
    pub play: bool,
}

/// Live-listener count reported back for a post.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct LiveListeners {
    pub track_id: TrackId,
    pub listeners: u32,
}
