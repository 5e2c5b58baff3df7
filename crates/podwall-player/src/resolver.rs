//! Post id → stream locator resolution.

use async_trait::async_trait;
use reqwest::StatusCode;

use podwall_types::{AudioLocator, TrackId};

use crate::error::ResolveError;

/// Maps a post id to a streamable URL.
#[async_trait]
pub trait SourceResolver: Send + Sync {
    async fn resolve(&self, track_id: TrackId) -> Result<AudioLocator, ResolveError>;
}

/// Resolver calling `POST {server}/info/{id}`.
#[derive(Clone)]
pub struct HttpSourceResolver {
    client: reqwest::Client,
    server_url: String,
}

impl HttpSourceResolver {
    pub fn new(client: reqwest::Client, server_url: impl Into<String>) -> Self {
        Self {
            client,
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn info_url(&self, track_id: TrackId) -> String {
        format!("{}/info/{track_id}", self.server_url)
    }
}

#[async_trait]
impl SourceResolver for HttpSourceResolver {
    async fn resolve(&self, track_id: TrackId) -> Result<AudioLocator, ResolveError> {
        let resp = self
            .client
            .post(self.info_url(track_id))
            .send()
            .await
            .map_err(|e| ResolveError::Request(e.to_string()))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Err(ResolveError::NotFound(track_id)),
            status if status.is_success() => resp
                .json::<AudioLocator>()
                .await
                .map_err(|e| ResolveError::Request(format!("invalid locator: {e}"))),
            status => Err(ResolveError::Request(format!("status {status}"))),
        }
    }
}

/// Resolver serving `{base}/audio/{id}` without asking the server.
#[derive(Clone, Debug)]
pub struct DirectResolver {
    base_url: String,
}

impl DirectResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SourceResolver for DirectResolver {
    async fn resolve(&self, track_id: TrackId) -> Result<AudioLocator, ResolveError> {
        Ok(AudioLocator::Ready {
            url: format!("{}/audio/{track_id}", self.base_url),
        })
    }
}
