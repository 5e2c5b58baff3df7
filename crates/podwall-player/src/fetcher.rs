//! Chunk fetcher.
//!
//! One background task per track walks the piece list sequentially: the first
//! megabyte, then fixed windows once the total length is known. Every piece is
//! reported as `Progress` followed by its bytes; failures are reported per piece
//! and retried a bounded number of times.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use podwall_types::TrackId;

use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::http::RangeClient;
use crate::piece::{Piece, Throttle, first_piece, plan_remaining};

/// Messages a fetch task sends to its owner, in piece order.
#[derive(Clone, Debug, PartialEq)]
pub enum FetchMessage {
    /// A piece arrived; always sent right before its `Piece`.
    Progress { track_id: TrackId, seq: u32, last: bool },
    /// Raw bytes of one piece.
    Piece {
        track_id: TrackId,
        seq: u32,
        last: bool,
        bytes: Bytes,
    },
    /// A request failed. Fatal errors (see [`FetchError::is_fatal`]) end the fetch.
    Error {
        track_id: TrackId,
        seq: Option<u32>,
        error: FetchError,
    },
}

impl FetchMessage {
    pub fn track_id(&self) -> TrackId {
        match self {
            FetchMessage::Progress { track_id, .. }
            | FetchMessage::Piece { track_id, .. }
            | FetchMessage::Error { track_id, .. } => *track_id,
        }
    }
}

/// Owner's handle on a running fetch. Dropping it cancels the fetch.
pub struct FetchHandle {
    track_id: TrackId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl FetchHandle {
    pub fn track_id(&self) -> TrackId {
        self.track_id
    }

    /// Stop before the next request; an in-flight response is discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for FetchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawns per-track fetch tasks sharing one range client.
#[derive(Clone)]
pub struct ChunkFetcher {
    client: Arc<dyn RangeClient>,
    config: FetchConfig,
}

impl ChunkFetcher {
    pub fn new(client: Arc<dyn RangeClient>, config: FetchConfig) -> Self {
        Self { client, config }
    }

    /// Start downloading `url` for `track_id`, reporting on `tx`.
    pub fn start(
        &self,
        track_id: TrackId,
        url: String,
        tx: mpsc::Sender<FetchMessage>,
    ) -> FetchHandle {
        let cancel = CancellationToken::new();
        let job = FetchJob {
            track_id,
            url,
            client: self.client.clone(),
            config: self.config.clone(),
            cancel: cancel.clone(),
            tx,
        };
        let task = tokio::spawn(job.run());
        FetchHandle {
            track_id,
            cancel,
            task,
        }
    }
}

struct FetchJob {
    track_id: TrackId,
    url: String,
    client: Arc<dyn RangeClient>,
    config: FetchConfig,
    cancel: CancellationToken,
    tx: mpsc::Sender<FetchMessage>,
}

impl FetchJob {
    async fn run(self) {
        let track_id = self.track_id;
        match self.download().await {
            Ok(pieces) => tracing::info!(track_id, pieces, "download complete"),
            Err(FetchError::Cancelled) => tracing::debug!(track_id, "download cancelled"),
            Err(err) => tracing::warn!(track_id, error = %err, "download failed"),
        }
    }

    /// Walk the piece list; returns the number of delivered pieces.
    async fn download(&self) -> Result<u32, FetchError> {
        let track_id = self.track_id;
        let mut pieces = VecDeque::from([first_piece(&self.config)]);
        let mut throttle = Throttle::new(&self.config);
        let mut planned = false;
        let mut failures = 0u32;
        let mut delivered = 0u32;

        while let Some(mut piece) = pieces.pop_front() {
            if self.cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            if throttle.should_pause(piece.start) {
                tracing::info!(
                    track_id,
                    seq = piece.seq,
                    start = piece.start,
                    pause_secs = self.config.throttle_pause().as_secs(),
                    next_threshold = throttle.threshold(),
                    "throttling download"
                );
                self.pause(self.config.throttle_pause()).await?;
            }

            let outcome = self.client.fetch_range(&self.url, &piece).await;
            if self.cancel.is_cancelled() {
                tracing::debug!(track_id, seq = piece.seq, "discarding response after cancel");
                return Err(FetchError::Cancelled);
            }

            let failure = match outcome {
                Ok(resp) if resp.is_success() => {
                    if !planned {
                        planned = true;
                        self.plan(&mut piece, &mut pieces, resp.status, resp.total_len);
                    }
                    self.emit(FetchMessage::Progress {
                        track_id,
                        seq: piece.seq,
                        last: piece.last,
                    })
                    .await?;
                    self.emit(FetchMessage::Piece {
                        track_id,
                        seq: piece.seq,
                        last: piece.last,
                        bytes: resp.body,
                    })
                    .await?;
                    delivered += 1;
                    continue;
                }
                Ok(resp) if resp.status == 404 => {
                    tracing::warn!(track_id, seq = piece.seq, "audio not found");
                    self.emit_error(piece.seq, FetchError::NotFound).await?;
                    return Err(FetchError::NotFound);
                }
                Ok(resp) => FetchError::Status(resp.status),
                Err(err) => err,
            };

            failures += 1;
            if failures > self.config.max_retries {
                let error = FetchError::RetriesExhausted {
                    seq: piece.seq,
                    attempts: failures,
                };
                self.emit_error(piece.seq, error.clone()).await?;
                return Err(error);
            }
            tracing::warn!(
                track_id,
                seq = piece.seq,
                attempt = failures,
                max_retries = self.config.max_retries,
                error = %failure,
                "piece failed; retrying"
            );
            self.emit_error(piece.seq, failure).await?;
            pieces.push_front(piece);
            self.pause(self.config.retry_delay()).await?;
        }

        Ok(delivered)
    }

    /// Plan the remaining pieces from the first response.
    fn plan(
        &self,
        first: &mut Piece,
        pieces: &mut VecDeque<Piece>,
        status: u16,
        total_len: Option<u64>,
    ) {
        match total_len {
            // A 200 carries the whole resource.
            Some(total) if status == 206 => {
                *pieces = plan_remaining(total, &self.config);
                first.last = pieces.is_empty();
                tracing::debug!(
                    track_id = self.track_id,
                    total,
                    pieces = pieces.len() + 1,
                    "planned download"
                );
            }
            _ => {
                tracing::debug!(
                    track_id = self.track_id,
                    status,
                    "no usable length; first piece is the whole download"
                );
                first.last = true;
            }
        }
    }

    async fn emit(&self, msg: FetchMessage) -> Result<(), FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        self.tx.send(msg).await.map_err(|_| FetchError::Cancelled)
    }

    async fn emit_error(&self, seq: u32, error: FetchError) -> Result<(), FetchError> {
        self.emit(FetchMessage::Error {
            track_id: self.track_id,
            seq: Some(seq),
            error,
        })
        .await
    }

    async fn pause(&self, duration: Duration) -> Result<(), FetchError> {
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(FetchError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RangeResponse;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Serves synthetic ranges of a resource of `total` bytes.
    struct ScriptedClient {
        total: u64,
        send_length: bool,
        statuses: HashMap<u32, u16>,
        requests: Mutex<Vec<(u32, u64, u64)>>,
    }

    impl ScriptedClient {
        fn new(total: u64) -> Self {
            Self {
                total,
                send_length: true,
                statuses: HashMap::new(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<(u32, u64, u64)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RangeClient for ScriptedClient {
        async fn fetch_range(&self, _url: &str, piece: &Piece) -> Result<RangeResponse, FetchError> {
            self.requests
                .lock()
                .unwrap()
                .push((piece.seq, piece.start, piece.end));
            let status = self.statuses.get(&piece.seq).copied().unwrap_or(206);
            let end = piece.end.min(self.total - 1);
            Ok(RangeResponse {
                status,
                total_len: self.send_length.then_some(self.total),
                body: Bytes::from(format!("{}-{}", piece.start, end)),
            })
        }
    }

    fn quick_config() -> FetchConfig {
        FetchConfig {
            retry_delay_ms: 0,
            ..FetchConfig::default()
        }
    }

    async fn collect(mut rx: mpsc::Receiver<FetchMessage>) -> Vec<FetchMessage> {
        let mut out = Vec::new();
        while let Some(msg) = rx.recv().await {
            out.push(msg);
        }
        out
    }

    fn progress_seqs(messages: &[FetchMessage]) -> Vec<(u32, bool)> {
        messages
            .iter()
            .filter_map(|m| match m {
                FetchMessage::Progress { seq, last, .. } => Some((*seq, *last)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn plans_pieces_from_reported_length() {
        let client = Arc::new(ScriptedClient::new(25_000_000));
        let fetcher = ChunkFetcher::new(client.clone(), quick_config());
        let (tx, rx) = mpsc::channel(16);
        let _handle = fetcher.start(7, "http://media/audio/7".to_string(), tx);
        let messages = collect(rx).await;

        assert_eq!(
            client.requests(),
            vec![
                (0, 0, 999_999),
                (1, 1_000_000, 10_999_999),
                (2, 11_000_000, 20_999_999),
                (3, 21_000_000, 24_999_999),
            ]
        );
        assert_eq!(
            progress_seqs(&messages),
            vec![(0, false), (1, false), (2, false), (3, true)]
        );
        // Progress precedes the bytes of the same piece.
        assert!(matches!(messages[0], FetchMessage::Progress { seq: 0, .. }));
        match &messages[7] {
            FetchMessage::Piece { seq, last, bytes, .. } => {
                assert_eq!((*seq, *last), (3, true));
                assert_eq!(&bytes[..], b"21000000-24999999");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_length_makes_first_piece_last() {
        let mut client = ScriptedClient::new(5_000_000);
        client.send_length = false;
        let client = Arc::new(client);
        let fetcher = ChunkFetcher::new(client.clone(), quick_config());
        let (tx, rx) = mpsc::channel(16);
        let _handle = fetcher.start(1, "u".to_string(), tx);
        let messages = collect(rx).await;

        assert_eq!(client.requests().len(), 1);
        assert_eq!(progress_seqs(&messages), vec![(0, true)]);
        assert!(matches!(
            messages[1],
            FetchMessage::Piece { seq: 0, last: true, .. }
        ));
    }

    #[tokio::test]
    async fn small_resource_is_a_single_piece() {
        let client = Arc::new(ScriptedClient::new(300_000));
        let fetcher = ChunkFetcher::new(client.clone(), quick_config());
        let (tx, rx) = mpsc::channel(16);
        let _handle = fetcher.start(1, "u".to_string(), tx);
        let messages = collect(rx).await;
        assert_eq!(progress_seqs(&messages), vec![(0, true)]);
    }

    #[tokio::test]
    async fn failing_piece_is_retried_then_reported_terminal() {
        let mut client = ScriptedClient::new(25_000_000);
        client.statuses.insert(2, 500);
        let client = Arc::new(client);
        let fetcher = ChunkFetcher::new(client.clone(), quick_config());
        let (tx, rx) = mpsc::channel(16);
        let _handle = fetcher.start(3, "u".to_string(), tx);
        let messages = collect(rx).await;

        let piece2_requests = client.requests().iter().filter(|r| r.0 == 2).count();
        assert_eq!(piece2_requests, 4);
        assert!(client.requests().iter().all(|r| r.0 != 3));

        let errors: Vec<&FetchError> = messages
            .iter()
            .filter_map(|m| match m {
                FetchMessage::Error { seq: Some(2), error, .. } => Some(error),
                _ => None,
            })
            .collect();
        assert_eq!(
            errors,
            vec![
                &FetchError::Status(500),
                &FetchError::Status(500),
                &FetchError::Status(500),
                &FetchError::RetriesExhausted { seq: 2, attempts: 4 },
            ]
        );
        assert_eq!(progress_seqs(&messages), vec![(0, false), (1, false)]);
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let mut client = ScriptedClient::new(25_000_000);
        client.statuses.insert(0, 404);
        let client = Arc::new(client);
        let fetcher = ChunkFetcher::new(client.clone(), quick_config());
        let (tx, rx) = mpsc::channel(16);
        let _handle = fetcher.start(4, "u".to_string(), tx);
        let messages = collect(rx).await;

        assert_eq!(client.requests().len(), 1);
        assert_eq!(
            messages,
            vec![FetchMessage::Error {
                track_id: 4,
                seq: Some(0),
                error: FetchError::NotFound
            }]
        );
    }

    #[tokio::test]
    async fn transient_failure_recovers_in_order() {
        struct FlakyOnce {
            inner: ScriptedClient,
            failed: Mutex<bool>,
        }

        #[async_trait]
        impl RangeClient for FlakyOnce {
            async fn fetch_range(&self, url: &str, piece: &Piece) -> Result<RangeResponse, FetchError> {
                let fail_now = {
                    let mut failed = self.failed.lock().unwrap();
                    let fail_now = piece.seq == 1 && !*failed;
                    *failed |= fail_now;
                    fail_now
                };
                if fail_now {
                    return Err(FetchError::Network("connection reset".to_string()));
                }
                self.inner.fetch_range(url, piece).await
            }
        }

        let client = Arc::new(FlakyOnce {
            inner: ScriptedClient::new(25_000_000),
            failed: Mutex::new(false),
        });
        let fetcher = ChunkFetcher::new(client, quick_config());
        let (tx, rx) = mpsc::channel(16);
        let _handle = fetcher.start(5, "u".to_string(), tx);
        let messages = collect(rx).await;

        assert_eq!(
            progress_seqs(&messages),
            vec![(0, false), (1, false), (2, false), (3, true)]
        );
        assert!(messages.iter().any(|m| matches!(
            m,
            FetchMessage::Error { seq: Some(1), error: FetchError::Network(_), .. }
        )));
    }

    #[tokio::test]
    async fn cancel_discards_in_flight_response() {
        struct GatedClient {
            entered: Notify,
            gate: Notify,
        }

        #[async_trait]
        impl RangeClient for GatedClient {
            async fn fetch_range(&self, _url: &str, _piece: &Piece) -> Result<RangeResponse, FetchError> {
                self.entered.notify_one();
                self.gate.notified().await;
                Ok(RangeResponse {
                    status: 206,
                    total_len: Some(10),
                    body: Bytes::from_static(b"0123456789"),
                })
            }
        }

        let client = Arc::new(GatedClient {
            entered: Notify::new(),
            gate: Notify::new(),
        });
        let fetcher = ChunkFetcher::new(client.clone(), quick_config());
        let (tx, rx) = mpsc::channel(16);
        let handle = fetcher.start(6, "u".to_string(), tx);

        client.entered.notified().await;
        handle.cancel();
        client.gate.notify_one();

        assert!(collect(rx).await.is_empty());
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_pauses_once_threshold_is_crossed() {
        let config = FetchConfig {
            first_chunk_bytes: 10,
            window_bytes: 10,
            throttle_threshold_bytes: 25,
            throttle_step_bytes: 25,
            throttle_pause_secs: 300,
            retry_delay_ms: 0,
            ..FetchConfig::default()
        };
        let client = Arc::new(ScriptedClient::new(60));
        let fetcher = ChunkFetcher::new(client.clone(), config);
        let (tx, rx) = mpsc::channel(16);
        let started = tokio::time::Instant::now();
        let _handle = fetcher.start(8, "u".to_string(), tx);
        let messages = collect(rx).await;

        // Pieces start at 0, 10, .., 50; only the one at 30 crosses a threshold.
        assert_eq!(progress_seqs(&messages).len(), 6);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(300));
        assert!(elapsed < Duration::from_secs(600));
    }
}
