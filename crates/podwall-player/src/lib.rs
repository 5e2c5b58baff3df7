//! Progressive audio playback for podcast posts.
//!
//! A [`session::PlaybackSession`] owns a [`coordinator::Coordinator`] that
//! resolves posts to audio URLs, downloads them in byte-range pieces
//! ([`fetcher`]), re-decodes the growing prefix as pieces arrive
//! ([`assembler`]) and hands playable buffers to an [`output::AudioOutput`].
//! Every state change is published through [`events`].

pub mod assembler;
pub mod config;
pub mod coordinator;
pub mod decode;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod http;
pub mod labels;
pub mod output;
pub mod piece;
pub mod queue;
pub mod resolver;
pub mod session;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use config::{FetchConfig, PlaybackConfig, PlayerConfig};
pub use coordinator::Coordinator;
pub use error::{DecodeError, FetchError, OutputError, PlayError, ResolveError};
pub use events::{EventPublisher, EventSubscription};
pub use session::{PlaybackSession, SessionParts};
