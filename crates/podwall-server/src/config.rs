//! Configuration loading and parsing.
//!
//! Defines the server config schema (bind address, audio-source registry,
//! track catalog) and resolves defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use podwall_types::TrackId;

/// Top-level server configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// Bind address (host:port).
    pub bind: Option<String>,
    /// Public base URL used to build stream locators.
    pub public_base_url: Option<String>,
    /// Audio-source registry entries.
    pub sources: Option<Vec<SourceConfig>>,
    /// Track catalog entries (post id -> audio file).
    pub tracks: Option<Vec<TrackConfig>>,
}

/// One audio-source kind and its construction arguments.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Files read from a folder on local storage.
    Local {
        /// Origin name tracks refer to (defaults to `local`).
        name: Option<String>,
        /// Folder that `source_uri` values are relative to.
        folder: String,
    },
}

/// Catalog entry mapping a post id to its stored audio.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TrackConfig {
    pub id: TrackId,
    /// Name of the audio source that stores this file.
    pub origin: String,
    /// Source-specific location (relative path for local sources).
    pub source_uri: String,
    /// Response content type (defaults to `audio/mp4`).
    pub content_type: Option<String>,
    /// Set while the upload has not completed.
    pub uploading: Option<bool>,
}

impl ServerConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::parse(&raw).with_context(|| format!("parse config {:?}", path))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str::<ServerConfig>(raw)?)
    }
}

/// Locate a config file: explicit path, else `config.toml` next to the executable.
pub fn resolve_config_path(explicit: Option<&PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.clone());
    }
    let auto_path = std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join("config.toml")));
    match auto_path {
        Some(path) if path.exists() => Ok(path),
        _ => Err(anyhow::anyhow!("config file is required; use --config")),
    }
}

/// Parse an optional bind address from config.
pub fn bind_from_config(cfg: &ServerConfig) -> Result<Option<SocketAddr>> {
    let Some(bind) = cfg.bind.as_deref() else {
        return Ok(None);
    };
    let addr = bind.parse().with_context(|| format!("parse bind {bind}"))?;
    Ok(Some(addr))
}

/// Derive public base URL from config or bind address.
pub fn public_base_url_from_config(cfg: &ServerConfig, bind: SocketAddr) -> Result<String> {
    if let Some(url) = cfg.public_base_url.as_ref() {
        return Ok(url.trim_end_matches('/').to_string());
    }

    if bind.ip().is_unspecified() {
        return Err(anyhow::anyhow!(
            "public_base_url is required when bind is 0.0.0.0"
        ));
    }

    Ok(format!("http://{}", bind))
}
