//! Live-play telemetry.
//!
//! Notifications are fire-and-forget: sent from a spawned task, failures are
//! logged and never reach playback.

use podwall_types::{LivePlayRequest, TrackId};

pub trait Telemetry: Send + Sync {
    fn track_started(&self, track_id: TrackId);
    fn track_stopped(&self, track_id: TrackId);
}

/// Telemetry that drops every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn track_started(&self, _track_id: TrackId) {}
    fn track_stopped(&self, _track_id: TrackId) {}
}

/// Posts `{"play": bool}` to `{server}/posts/{id}/live`.
#[derive(Clone)]
pub struct HttpTelemetry {
    client: reqwest::Client,
    server_url: String,
}

impl HttpTelemetry {
    pub fn new(client: reqwest::Client, server_url: impl Into<String>) -> Self {
        Self {
            client,
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn live_url(&self, track_id: TrackId) -> String {
        format!("{}/posts/{track_id}/live", self.server_url)
    }

    fn send(&self, track_id: TrackId, play: bool) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!(track_id, play, "no runtime; telemetry dropped");
            return;
        };
        let request = self
            .client
            .post(self.live_url(track_id))
            .json(&LivePlayRequest { play });
        runtime.spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    tracing::debug!(track_id, play, "live play reported");
                }
                Ok(resp) => {
                    tracing::warn!(track_id, play, status = %resp.status(), "live play rejected");
                }
                Err(err) => {
                    tracing::warn!(track_id, play, error = %err, "live play report failed");
                }
            }
        });
    }
}

impl Telemetry for HttpTelemetry {
    fn track_started(&self, track_id: TrackId) {
        self.send(track_id, true);
    }

    fn track_stopped(&self, track_id: TrackId) {
        self.send(track_id, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_url_targets_post() {
        let telemetry = HttpTelemetry::new(reqwest::Client::new(), "http://media:8080/");
        assert_eq!(telemetry.live_url(3), "http://media:8080/posts/3/live");
    }

    #[test]
    fn send_without_runtime_is_silent() {
        let telemetry = HttpTelemetry::new(reqwest::Client::new(), "http://127.0.0.1:9");
        telemetry.track_started(1);
        telemetry.track_stopped(1);
    }

    #[tokio::test]
    async fn failed_report_does_not_block_caller() {
        let telemetry = HttpTelemetry::new(reqwest::Client::new(), "http://127.0.0.1:9");
        telemetry.track_started(1);
    }
}
