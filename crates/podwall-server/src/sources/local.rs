//! Local-folder audio source.

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{AudioSource, OpenedMedia, SourceError};
use crate::catalog::AudioEntity;

pub(crate) struct LocalAudioSource {
    name: String,
    folder: PathBuf,
}

impl LocalAudioSource {
    /// Create a source rooted at `folder`; the folder must exist.
    pub(crate) fn new(name: String, folder: PathBuf) -> Result<Self> {
        let folder = folder
            .canonicalize()
            .with_context(|| format!("audio folder {:?}", folder))?;
        Ok(Self { name, folder })
    }

    /// Resolve a catalog `source_uri` to a path under the folder.
    fn resolve(&self, source_uri: &str) -> Option<PathBuf> {
        let rel = Path::new(source_uri);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if source_uri.is_empty() || escapes {
            return None;
        }
        Some(self.folder.join(rel))
    }
}

#[async_trait]
impl AudioSource for LocalAudioSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, entity: &AudioEntity) -> Result<OpenedMedia, SourceError> {
        let path = self
            .resolve(&entity.source_uri)
            .ok_or_else(|| SourceError::NotFound(entity.source_uri.clone()))?;
        let file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::NotFound(entity.source_uri.clone()));
            }
            Err(err) => return Err(SourceError::Io(err.to_string())),
        };
        let meta = file
            .metadata()
            .await
            .map_err(|err| SourceError::Io(err.to_string()))?;
        if !meta.is_file() {
            return Err(SourceError::NotFound(entity.source_uri.clone()));
        }
        Ok(OpenedMedia {
            reader: Box::new(file),
            len: meta.len(),
        })
    }
}
