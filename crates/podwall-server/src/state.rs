//! Shared application state.
//!
//! Holds the track catalog, the audio-source registry, and the public base URL
//! used to build stream locators.

use std::collections::HashMap;
use std::sync::Mutex;

use podwall_types::TrackId;

use crate::catalog::TrackCatalog;
use crate::sources::SourceRegistry;

pub(crate) struct AppState {
    pub catalog: TrackCatalog,
    pub sources: SourceRegistry,
    /// Base URL (no trailing slash) prepended to `/audio/{id}` locators.
    pub public_base_url: String,
    live: Mutex<HashMap<TrackId, u32>>,
}

impl AppState {
    pub(crate) fn new(catalog: TrackCatalog, sources: SourceRegistry, public_base_url: String) -> Self {
        Self {
            catalog,
            sources,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            live: Mutex::new(HashMap::new()),
        }
    }

    /// Streamable URL for a track id.
    pub(crate) fn audio_url(&self, id: TrackId) -> String {
        format!("{}/audio/{id}", self.public_base_url)
    }

    /// Record a listener starting (`play`) or stopping; returns the new count.
    pub(crate) fn record_live(&self, id: TrackId, play: bool) -> u32 {
        let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
        let count = live.entry(id).or_insert(0);
        *count = if play {
            count.saturating_add(1)
        } else {
            count.saturating_sub(1)
        };
        let current = *count;
        if current == 0 {
            live.remove(&id);
        }
        current
    }
}
