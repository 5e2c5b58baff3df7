//! Player configuration.
//!
//! The TOML file is optional; every value falls back to the defaults below and
//! CLI flags override what the file sets.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Top-level player configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct PlayerConfig {
    /// Media server base URL, e.g. `http://127.0.0.1:8080`.
    pub server_url: Option<String>,
    /// Send live-play notifications to the server.
    pub telemetry: Option<bool>,
    /// Output device name substring.
    pub device: Option<String>,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
}

/// Chunk fetcher tuning.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// Size of the first range request, issued before the total length is known.
    pub first_chunk_bytes: u64,
    /// Size of every following range request.
    pub window_bytes: u64,
    /// Download offset past which the first throttle pause is inserted.
    pub throttle_threshold_bytes: u64,
    /// Amount the throttle threshold moves each time it is crossed.
    pub throttle_step_bytes: u64,
    pub throttle_pause_secs: u64,
    /// Failed range requests tolerated per track before giving up.
    pub max_retries: u32,
    /// Delay before re-issuing a failed piece.
    pub retry_delay_ms: u64,
    /// Limit on establishing a connection.
    pub connect_timeout_secs: u64,
    /// Limit on a stalled response: no bytes for this long fails the piece.
    /// There is no overall deadline, so a slow link still completes a window.
    pub read_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            first_chunk_bytes: 1_000_000,
            window_bytes: 10_000_000,
            throttle_threshold_bytes: 50_000_000,
            throttle_step_bytes: 50_000_000,
            throttle_pause_secs: 300,
            max_retries: 3,
            retry_delay_ms: 1_000,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
        }
    }
}

impl FetchConfig {
    pub fn throttle_pause(&self) -> Duration {
        Duration::from_secs(self.throttle_pause_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs.max(1))
    }
}

/// Queue coordinator and output tuning.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Polls of a track without playable audio before it is evicted.
    pub retry_budget: u32,
    /// Wait between those polls (cut short when new audio is decoded).
    pub retry_backoff_ms: u64,
    /// Target buffer duration for output queue sizing.
    pub buffer_seconds: f32,
    /// Resampler chunk size in frames.
    pub chunk_frames: usize,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            retry_backoff_ms: 50_000,
            buffer_seconds: 2.0,
            chunk_frames: 1024,
            refill_max_frames: 4096,
        }
    }
}

impl PlaybackConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl PlayerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<PlayerConfig>(raw)?)
    }

    /// Server URL without a trailing slash; `override_url` wins when set.
    pub fn server_url(&self, override_url: Option<&str>) -> Result<String> {
        let url = override_url
            .or(self.server_url.as_deref())
            .ok_or_else(|| anyhow::anyhow!("server url is required; use --server or server_url"))?;
        let url = url.trim().trim_end_matches('/');
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(anyhow::anyhow!("server url must be http(s): {url}"));
        }
        Ok(url.to_string())
    }

    pub fn telemetry_enabled(&self) -> bool {
        self.telemetry.unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_uses_defaults() {
        let cfg = PlayerConfig::parse("").unwrap();
        assert_eq!(cfg.fetch, FetchConfig::default());
        assert_eq!(cfg.playback, PlaybackConfig::default());
        assert!(cfg.telemetry_enabled());
        assert_eq!(cfg.fetch.throttle_pause(), Duration::from_secs(300));
        assert_eq!(cfg.fetch.connect_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.fetch.read_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn parse_overrides_selected_fields() {
        let cfg = PlayerConfig::parse(
            r#"
            server_url = "http://media.local:8080/"
            telemetry = false

            [fetch]
            window_bytes = 4000000
            throttle_pause_secs = 5
            read_timeout_secs = 0

            [playback]
            retry_backoff_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(cfg.fetch.window_bytes, 4_000_000);
        assert_eq!(cfg.fetch.first_chunk_bytes, 1_000_000);
        assert_eq!(cfg.fetch.throttle_pause(), Duration::from_secs(5));
        assert_eq!(cfg.fetch.read_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.playback.retry_backoff(), Duration::from_millis(250));
        assert_eq!(cfg.playback.retry_budget, 3);
        assert!(!cfg.telemetry_enabled());
        assert_eq!(cfg.server_url(None).unwrap(), "http://media.local:8080");
    }

    #[test]
    fn server_url_prefers_override_and_validates_scheme() {
        let cfg = PlayerConfig {
            server_url: Some("http://a:1".to_string()),
            ..Default::default()
        };
        assert_eq!(cfg.server_url(Some("https://b:2/")).unwrap(), "https://b:2");
        assert!(cfg.server_url(Some("ftp://c")).is_err());
        assert!(PlayerConfig::default().server_url(None).is_err());
    }
}
