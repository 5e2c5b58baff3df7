//! Audio-source registry and adapter glue.
//!
//! Each source kind knows how to turn a catalog entity into a seekable byte
//! reader. The registry is built once at startup from `[[sources]]`.

pub(crate) mod local;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncSeek};

use crate::catalog::AudioEntity;
use crate::config::SourceConfig;

use self::local::LocalAudioSource;

/// Seekable async byte reader handed to the range handler.
pub(crate) trait MediaReader: AsyncRead + AsyncSeek + Unpin + Send {}

impl<T: AsyncRead + AsyncSeek + Unpin + Send> MediaReader for T {}

/// An opened audio resource; bytes are streamed, never buffered whole.
pub(crate) struct OpenedMedia {
    pub reader: Box<dyn MediaReader>,
    /// Total resource length in bytes.
    pub len: u64,
}

#[derive(Debug, Error)]
pub(crate) enum SourceError {
    /// No registered source handles the entity's origin.
    #[error("unknown audio origin: {0}")]
    UnknownOrigin(String),
    /// The source could not find the stored bytes.
    #[error("audio not found: {0}")]
    NotFound(String),
    /// Reading storage failed.
    #[error("audio read failed: {0}")]
    Io(String),
}

#[async_trait]
pub(crate) trait AudioSource: Send + Sync {
    /// Origin name this source is registered under.
    fn name(&self) -> &str;
    /// Open the stored bytes for `entity`.
    async fn open(&self, entity: &AudioEntity) -> Result<OpenedMedia, SourceError>;
}

pub(crate) struct SourceRegistry {
    sources: HashMap<String, Box<dyn AudioSource>>,
}

impl SourceRegistry {
    /// Create a registry from an explicit source list.
    pub(crate) fn new(sources: Vec<Box<dyn AudioSource>>) -> Self {
        let mut map = HashMap::new();
        for source in sources {
            let name = source.name().to_string();
            if map.insert(name.clone(), source).is_some() {
                tracing::warn!(source = %name, "duplicate audio source replaced");
            }
        }
        Self { sources: map }
    }

    /// Build the registry from config entries, one variant per source kind.
    pub(crate) fn from_config(configs: &[SourceConfig]) -> Result<Self> {
        let mut sources: Vec<Box<dyn AudioSource>> = Vec::with_capacity(configs.len());
        for cfg in configs {
            match cfg {
                SourceConfig::Local { name, folder } => {
                    let name = name.clone().unwrap_or_else(|| "local".to_string());
                    sources.push(Box::new(LocalAudioSource::new(name, folder.into())?));
                }
            }
        }
        Ok(Self::new(sources))
    }

    /// Registered origin names (sorted, for logging).
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sources.keys().cloned().collect();
        names.sort();
        names
    }

    /// Open `entity` through the source matching its origin.
    pub(crate) async fn open(&self, entity: &AudioEntity) -> Result<OpenedMedia, SourceError> {
        let source = self
            .sources
            .get(&entity.origin)
            .ok_or_else(|| SourceError::UnknownOrigin(entity.origin.clone()))?;
        source.open(entity).await
    }
}
