//! HTTP API handlers.
//!
//! Defines the Actix routes for audio streaming, locator lookup, live-play
//! telemetry, and health.

pub mod audio;
pub mod health;
pub mod live;

pub use audio::{audio_info, audio_info_get, stream_audio};
pub use live::live_play;
