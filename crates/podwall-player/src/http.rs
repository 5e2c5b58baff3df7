//! HTTP range client used by the chunk fetcher.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, HeaderMap, RANGE};

use podwall_types::LENGTH_HEADER;

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::piece::Piece;

const SLOW_FETCH: Duration = Duration::from_millis(250);

/// HTTP client shared by range requests, the resolver and telemetry.
///
/// Only connection setup and each individual read are bounded; a window may
/// take as long as the link needs while bytes keep arriving.
pub fn build_client(config: &FetchConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .read_timeout(config.read_timeout())
        .build()
}

/// Outcome of one range request that reached the server.
#[derive(Clone, Debug)]
pub struct RangeResponse {
    pub status: u16,
    /// Total resource length, when the server reported it.
    pub total_len: Option<u64>,
    /// Body bytes; empty for non-success statuses.
    pub body: Bytes,
}

impl RangeResponse {
    pub fn is_success(&self) -> bool {
        self.status == StatusCode::OK.as_u16() || self.status == StatusCode::PARTIAL_CONTENT.as_u16()
    }
}

/// Issues a single byte-range request.
///
/// Transport failures are `Err`; any HTTP status is `Ok` and left to the caller.
#[async_trait]
pub trait RangeClient: Send + Sync {
    async fn fetch_range(&self, url: &str, piece: &Piece) -> Result<RangeResponse, FetchError>;
}

/// `reqwest`-backed range client.
#[derive(Clone)]
pub struct HttpRangeClient {
    client: reqwest::Client,
}

impl HttpRangeClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RangeClient for HttpRangeClient {
    async fn fetch_range(&self, url: &str, piece: &Piece) -> Result<RangeResponse, FetchError> {
        let range = piece.range_header();
        let started = Instant::now();
        let resp = self
            .client
            .get(url)
            .header(RANGE, &range)
            .send()
            .await
            .map_err(|e| FetchError::Network(format!("range request failed: {e}")))?;

        let status = resp.status();
        let total_len = total_len_from_headers(resp.headers(), status);
        if !(status == StatusCode::OK || status == StatusCode::PARTIAL_CONTENT) {
            return Ok(RangeResponse {
                status: status.as_u16(),
                total_len,
                body: Bytes::new(),
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Network(format!("body read failed: {e}")))?;
        let elapsed = started.elapsed();
        if elapsed > SLOW_FETCH {
            let kbps = if elapsed.as_millis() > 0 {
                (body.len() as u128 * 1000 / elapsed.as_millis()) / 1024
            } else {
                0
            };
            tracing::warn!(
                took_ms = elapsed.as_millis() as u64,
                bytes = body.len(),
                kbps = kbps as u64,
                range = range.as_str(),
                "http range fetch slow"
            );
        }

        Ok(RangeResponse {
            status: status.as_u16(),
            total_len,
            body,
        })
    }
}

/// Total length from `x-length`, falling back to the `Content-Range` total on 206.
fn total_len_from_headers(headers: &HeaderMap, status: StatusCode) -> Option<u64> {
    let declared = headers
        .get(LENGTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok());
    if declared.is_some() {
        return declared;
    }
    if status != StatusCode::PARTIAL_CONTENT {
        return None;
    }
    headers
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range_total)
}

fn parse_content_range_total(header: &str) -> Option<u64> {
    // "bytes start-end/total"; total may be "*"
    let (_, total) = header.split_once('/')?;
    total.trim().parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn parse_content_range_total_reads_total() {
        assert_eq!(parse_content_range_total("bytes 0-99/12345"), Some(12345));
        assert_eq!(parse_content_range_total("bytes 0-99/*"), None);
        assert_eq!(parse_content_range_total("garbage"), None);
    }

    #[test]
    fn length_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(LENGTH_HEADER, HeaderValue::from_static("25000000"));
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("bytes 0-999999/1"));
        assert_eq!(
            total_len_from_headers(&headers, StatusCode::PARTIAL_CONTENT),
            Some(25_000_000)
        );
        assert_eq!(total_len_from_headers(&headers, StatusCode::OK), Some(25_000_000));
    }

    #[test]
    fn content_range_only_counts_on_partial_content() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_RANGE, HeaderValue::from_static("bytes 0-999999/4000000"));
        assert_eq!(
            total_len_from_headers(&headers, StatusCode::PARTIAL_CONTENT),
            Some(4_000_000)
        );
        assert_eq!(total_len_from_headers(&headers, StatusCode::OK), None);
        assert_eq!(
            total_len_from_headers(&HeaderMap::new(), StatusCode::PARTIAL_CONTENT),
            None
        );
    }

    #[test]
    fn success_is_200_or_206() {
        let resp = |status| RangeResponse {
            status,
            total_len: None,
            body: Bytes::new(),
        };
        assert!(resp(200).is_success());
        assert!(resp(206).is_success());
        assert!(!resp(416).is_success());
        assert!(!resp(500).is_success());
    }

    #[tokio::test]
    async fn slow_body_outlasting_read_timeout_still_completes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = sock.read(&mut request).await.unwrap();
            sock.write_all(
                b"HTTP/1.1 206 Partial Content\r\ncontent-length: 4\r\nx-length: 8\r\nconnection: close\r\n\r\n",
            )
            .await
            .unwrap();
            for byte in b"abcd" {
                tokio::time::sleep(Duration::from_millis(400)).await;
                sock.write_all(&[*byte]).await.unwrap();
            }
        });

        let config = FetchConfig {
            connect_timeout_secs: 1,
            read_timeout_secs: 1,
            ..FetchConfig::default()
        };
        let client = HttpRangeClient::new(build_client(&config).unwrap());
        let piece = Piece {
            seq: 0,
            start: 0,
            end: 3,
            last: false,
        };
        let resp = client
            .fetch_range(&format!("http://{addr}/audio/1"), &piece)
            .await
            .unwrap();
        assert_eq!(resp.status, 206);
        assert_eq!(resp.total_len, Some(8));
        assert_eq!(resp.body.as_ref(), b"abcd");
    }
}
