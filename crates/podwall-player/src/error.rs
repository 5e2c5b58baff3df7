//! Player error types.

use thiserror::Error;

use podwall_types::TrackId;

/// Failures while downloading a track's pieces.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The request did not complete (connect, timeout, body read).
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with something other than 200/206.
    #[error("unexpected status {0}")]
    Status(u16),

    /// The server does not know the resource; retrying will not help.
    #[error("audio not found")]
    NotFound,

    /// The fetch was cancelled by its owner.
    #[error("fetch cancelled")]
    Cancelled,

    /// Too many failed requests for this track.
    #[error("piece {seq} failed after {attempts} attempts")]
    RetriesExhausted { seq: u32, attempts: u32 },
}

impl FetchError {
    /// No further pieces will be delivered for the track.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::NotFound | FetchError::RetriesExhausted { .. })
    }
}

/// Failures turning received bytes into playable audio.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unrecognized audio data: {0}")]
    Probe(String),

    #[error("no decodable audio track")]
    NoAudioTrack,

    #[error("no audio frames decoded")]
    Empty,

    /// The blocking decode task did not finish.
    #[error("decode task failed: {0}")]
    Task(String),
}

/// Failures resolving a post id to a stream locator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("post {0} has no audio")]
    NotFound(TrackId),

    #[error("audio for post {0} is still uploading")]
    Uploading(TrackId),

    #[error("resolver request failed: {0}")]
    Request(String),
}

/// Failures driving the audio output device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutputError {
    #[error("output device unavailable: {0}")]
    Device(String),

    #[error("output stream failed: {0}")]
    Stream(String),
}

/// Why a play request did not queue the track.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The session is shutting down.
    #[error("playback session closed")]
    Closed,
}
