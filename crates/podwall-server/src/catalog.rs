//! Track catalog: maps post ids to stored audio entities.
//!
//! Stands in for the post/audio lookup of the surrounding application.

use std::collections::HashMap;

use podwall_types::TrackId;

use crate::config::TrackConfig;

/// Content type used when a catalog entry does not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "audio/mp4";

/// Stored audio for one post.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioEntity {
    pub track_id: TrackId,
    /// Audio source (registry key) that can open this entity.
    pub origin: String,
    /// Source-specific location.
    pub source_uri: String,
    pub content_type: String,
    /// Upload still in progress; the locator reports `uploading`.
    pub uploading: bool,
}

#[derive(Debug, Default)]
pub struct TrackCatalog {
    entries: HashMap<TrackId, AudioEntity>,
}

impl TrackCatalog {
    /// Build the catalog from config entries; later duplicates replace earlier ones.
    pub fn from_config(tracks: &[TrackConfig]) -> Self {
        let mut entries = HashMap::with_capacity(tracks.len());
        for track in tracks {
            let entity = AudioEntity {
                track_id: track.id,
                origin: track.origin.clone(),
                source_uri: track.source_uri.clone(),
                content_type: track
                    .content_type
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                uploading: track.uploading.unwrap_or(false),
            };
            if entries.insert(track.id, entity).is_some() {
                tracing::warn!(track_id = track.id, "duplicate catalog entry replaced");
            }
        }
        Self { entries }
    }

    pub fn lookup(&self, id: TrackId) -> Option<&AudioEntity> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
