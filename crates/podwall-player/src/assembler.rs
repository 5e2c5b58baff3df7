//! Per-track buffer assembler.
//!
//! Pieces are stored by sequence index and may arrive out of order. A poll
//! collects the contiguous run starting at the read offset, appends it to the
//! already-consumed prefix and decodes `prefix + run`, so the decoded audio
//! always covers the track from byte 0 through the last contiguous byte.
//!
//! At most one decode is in flight per track: a poll while one is running
//! returns [`PollOutcome::Busy`] and does nothing.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

use podwall_types::TrackId;

use crate::decode::{AudioDecoder, DecodedAudio, decode_in_background};
use crate::error::DecodeError;

/// Result of a decode attempt.
#[derive(Clone, Debug)]
pub enum PollOutcome {
    /// Another decode is in flight; poll again later.
    Busy,
    /// No contiguous bytes beyond the read offset.
    NothingNew,
    /// Fresh audio replaced the previous handle.
    Decoded(Arc<DecodedAudio>),
    /// The collected bytes did not decode; they stay in the prefix.
    Failed(DecodeError),
}

#[derive(Default)]
struct AssemblerState {
    slots: BTreeMap<u32, Bytes>,
    /// Next sequence index to consume.
    read_offset: u32,
    /// Bytes of every consumed piece, in order.
    prefix: Bytes,
    last_seq: Option<u32>,
    fully_received: bool,
    decoding: bool,
    decoded: Option<Arc<DecodedAudio>>,
    decodes: u32,
    /// The fetcher gave up; no more pieces will arrive.
    failed: bool,
    closed: bool,
}

impl AssemblerState {
    fn received_count(&self) -> u32 {
        self.read_offset + self.slots.len() as u32
    }

    fn has_pending_run(&self) -> bool {
        self.slots.contains_key(&self.read_offset)
    }

    /// Move the contiguous run at the read offset into the prefix.
    ///
    /// Returns the new prefix, or `None` when no piece was consumed.
    fn consume_run(&mut self) -> Option<Bytes> {
        let mut run = Vec::new();
        while let Some(bytes) = self.slots.remove(&self.read_offset) {
            run.push(bytes);
            self.read_offset += 1;
        }
        let run_len: usize = run.iter().map(Bytes::len).sum();
        if run_len == 0 {
            return None;
        }
        let mut joined = BytesMut::with_capacity(self.prefix.len() + run_len);
        joined.extend_from_slice(&self.prefix);
        for piece in &run {
            joined.extend_from_slice(piece);
        }
        self.prefix = joined.freeze();
        Some(self.prefix.clone())
    }
}

/// Clears the decode guard even if the polling future is dropped.
struct DecodingFlag<'a> {
    state: &'a Mutex<AssemblerState>,
}

impl Drop for DecodingFlag<'_> {
    fn drop(&mut self) {
        let mut st = self.state.lock().unwrap_or_else(|e| e.into_inner());
        st.decoding = false;
    }
}

pub struct TrackAssembler {
    track_id: TrackId,
    decoder: Arc<dyn AudioDecoder>,
    state: Mutex<AssemblerState>,
    changed: Notify,
}

impl TrackAssembler {
    pub fn new(track_id: TrackId, decoder: Arc<dyn AudioDecoder>) -> Self {
        Self {
            track_id,
            decoder,
            state: Mutex::new(AssemblerState::default()),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AssemblerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn track_id(&self) -> TrackId {
        self.track_id
    }

    /// Store one piece. Returns `true` once every piece through the last one is present.
    pub fn feed(&self, seq: u32, bytes: Bytes, last: bool) -> bool {
        let mut st = self.lock();
        if st.closed {
            return st.fully_received;
        }
        if seq < st.read_offset {
            tracing::debug!(track_id = self.track_id, seq, "ignoring already consumed piece");
            return st.fully_received;
        }
        st.slots.insert(seq, bytes);
        if last {
            st.last_seq = Some(seq);
        }
        if let Some(last_seq) = st.last_seq {
            if st.received_count() == last_seq + 1 && !st.fully_received {
                st.fully_received = true;
                tracing::debug!(track_id = self.track_id, pieces = last_seq + 1, "track fully received");
            }
        }
        st.fully_received
    }

    /// Decode the contiguous run at the read offset, if any and if no decode is running.
    pub async fn poll(&self) -> PollOutcome {
        let bytes = {
            let mut st = self.lock();
            if st.closed {
                return PollOutcome::NothingNew;
            }
            if st.decoding {
                return PollOutcome::Busy;
            }
            match st.consume_run() {
                Some(bytes) => {
                    st.decoding = true;
                    bytes
                }
                None => return PollOutcome::NothingNew,
            }
        };
        let flag = DecodingFlag { state: &self.state };
        let len = bytes.len();
        let result = decode_in_background(self.decoder.clone(), bytes).await;

        let outcome = {
            let mut st = self.lock();
            match result {
                Ok(_) if st.closed => PollOutcome::NothingNew,
                Ok(audio) => {
                    let audio = Arc::new(audio);
                    st.decoded = Some(audio.clone());
                    st.decodes += 1;
                    tracing::debug!(
                        track_id = self.track_id,
                        bytes = len,
                        pieces = st.read_offset,
                        frames = audio.frames(),
                        codec = audio.codec.unwrap_or("unknown"),
                        "decoded contiguous audio"
                    );
                    PollOutcome::Decoded(audio)
                }
                Err(err) => {
                    tracing::warn!(
                        track_id = self.track_id,
                        bytes = len,
                        error = %err,
                        "decode failed; waiting for more pieces"
                    );
                    PollOutcome::Failed(err)
                }
            }
        };
        drop(flag);
        self.changed.notify_waiters();
        outcome
    }

    /// Latest decoded audio.
    pub fn decoded(&self) -> Option<Arc<DecodedAudio>> {
        self.lock().decoded.clone()
    }

    /// Future resolving at the next decode completion or state change.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }

    /// No more audio can appear: everything arrived (or the fetch gave up),
    /// nothing is left to consume and no decode is running.
    pub fn is_exhausted(&self) -> bool {
        let st = self.lock();
        (st.fully_received || st.failed || st.closed) && !st.has_pending_run() && !st.decoding
    }

    pub fn is_fully_received(&self) -> bool {
        self.lock().fully_received
    }

    pub fn is_decoding(&self) -> bool {
        self.lock().decoding
    }

    /// Number of successful decodes so far.
    pub fn decode_count(&self) -> u32 {
        self.lock().decodes
    }

    pub fn read_offset(&self) -> u32 {
        self.lock().read_offset
    }

    /// The fetch ended with a fatal error.
    pub fn mark_failed(&self) {
        self.lock().failed = true;
        self.changed.notify_waiters();
    }

    pub fn has_failed(&self) -> bool {
        self.lock().failed
    }

    /// Stop accepting pieces and results; used on cancel and eviction.
    pub fn close(&self) {
        let mut st = self.lock();
        st.closed = true;
        st.slots.clear();
        drop(st);
        self.changed.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::SymphoniaDecoder;
    use crate::decode::tests::wav_bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Treats every byte as one mono sample and records input lengths.
    #[derive(Default)]
    struct ByteDecoder {
        inputs: Mutex<Vec<Vec<u8>>>,
    }

    impl AudioDecoder for ByteDecoder {
        fn decode(&self, bytes: Bytes) -> Result<DecodedAudio, DecodeError> {
            self.inputs.lock().unwrap().push(bytes.to_vec());
            Ok(DecodedAudio {
                sample_rate: 1,
                channels: 1,
                samples: bytes.iter().map(|b| *b as f32).collect(),
                codec: None,
            })
        }
    }

    fn piece(tag: u8, len: usize) -> Bytes {
        Bytes::from(vec![tag; len])
    }

    #[tokio::test]
    async fn reordered_pieces_decode_once_when_gap_fills() {
        let decoder = Arc::new(ByteDecoder::default());
        let asm = TrackAssembler::new(1, decoder.clone());

        asm.feed(0, piece(0, 4), false);
        assert!(matches!(asm.poll().await, PollOutcome::Decoded(_)));

        asm.feed(2, piece(2, 4), true);
        assert!(matches!(asm.poll().await, PollOutcome::NothingNew));
        assert!(!asm.is_fully_received());

        assert!(asm.feed(1, piece(1, 4), false));
        let audio = match asm.poll().await {
            PollOutcome::Decoded(audio) => audio,
            other => panic!("expected decode, got {other:?}"),
        };

        let inputs = decoder.inputs.lock().unwrap().clone();
        assert_eq!(inputs.len(), 2);
        let full: Vec<u8> = [piece(0, 4), piece(1, 4), piece(2, 4)].concat();
        assert_eq!(inputs[1], full);
        assert_eq!(inputs.iter().filter(|i| i.len() == 12).count(), 1);
        assert_eq!(audio.frames(), 12);
        assert!(asm.is_exhausted());
    }

    #[tokio::test]
    async fn nothing_new_skips_decoder() {
        let decoder = Arc::new(ByteDecoder::default());
        let asm = TrackAssembler::new(1, decoder.clone());
        assert!(matches!(asm.poll().await, PollOutcome::NothingNew));
        asm.feed(1, piece(1, 4), false);
        assert!(matches!(asm.poll().await, PollOutcome::NothingNew));
        assert!(decoder.inputs.lock().unwrap().is_empty());
        assert_eq!(asm.read_offset(), 0);
    }

    #[tokio::test]
    async fn second_poll_while_decoding_is_a_no_op() {
        struct GatedDecoder {
            calls: AtomicUsize,
            entered: tokio::sync::mpsc::UnboundedSender<()>,
            gate: Mutex<std::sync::mpsc::Receiver<()>>,
        }

        impl AudioDecoder for GatedDecoder {
            fn decode(&self, bytes: Bytes) -> Result<DecodedAudio, DecodeError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let _ = self.entered.send(());
                let _ = self.gate.lock().unwrap().recv();
                Ok(DecodedAudio {
                    sample_rate: 1,
                    channels: 1,
                    samples: vec![0.0; bytes.len()],
                    codec: None,
                })
            }
        }

        let (entered_tx, mut entered_rx) = tokio::sync::mpsc::unbounded_channel();
        let (gate_tx, gate_rx) = std::sync::mpsc::channel();
        let decoder = Arc::new(GatedDecoder {
            calls: AtomicUsize::new(0),
            entered: entered_tx,
            gate: Mutex::new(gate_rx),
        });
        let asm = Arc::new(TrackAssembler::new(1, decoder.clone()));
        asm.feed(0, piece(0, 4), false);
        asm.feed(1, piece(1, 4), false);

        let first = {
            let asm = asm.clone();
            tokio::spawn(async move { asm.poll().await })
        };
        entered_rx.recv().await.unwrap();
        assert!(asm.is_decoding());

        asm.feed(2, piece(2, 4), true);
        assert!(matches!(asm.poll().await, PollOutcome::Busy));
        assert!(matches!(asm.poll().await, PollOutcome::Busy));
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 1);

        gate_tx.send(()).unwrap();
        match first.await.unwrap() {
            PollOutcome::Decoded(audio) => assert_eq!(audio.frames(), 8),
            other => panic!("expected decode, got {other:?}"),
        }
        assert!(!asm.is_decoding());

        gate_tx.send(()).unwrap();
        match asm.poll().await {
            PollOutcome::Decoded(audio) => assert_eq!(audio.frames(), 12),
            other => panic!("expected decode, got {other:?}"),
        }
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_decode_keeps_prefix_for_next_poll() {
        /// Only succeeds once `full_len` bytes are available.
        struct NeedsAll {
            full_len: usize,
        }

        impl AudioDecoder for NeedsAll {
            fn decode(&self, bytes: Bytes) -> Result<DecodedAudio, DecodeError> {
                if bytes.len() < self.full_len {
                    return Err(DecodeError::Probe("truncated".to_string()));
                }
                Ok(DecodedAudio {
                    sample_rate: 1,
                    channels: 1,
                    samples: vec![0.0; bytes.len()],
                    codec: None,
                })
            }
        }

        let asm = TrackAssembler::new(1, Arc::new(NeedsAll { full_len: 8 }));
        asm.feed(0, piece(0, 4), false);
        assert!(matches!(asm.poll().await, PollOutcome::Failed(_)));
        assert!(asm.decoded().is_none());
        assert!(!asm.is_decoding());

        asm.feed(1, piece(1, 4), true);
        match asm.poll().await {
            PollOutcome::Decoded(audio) => assert_eq!(audio.frames(), 8),
            other => panic!("expected decode, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn any_arrival_order_matches_whole_file_decode() {
        let wav = wav_bytes(8_000, 6_000);
        let decoder: Arc<dyn AudioDecoder> = Arc::new(SymphoniaDecoder::with_extension("wav"));
        let expected = decoder.decode(Bytes::from(wav.clone())).unwrap();

        let chunk = wav.len().div_ceil(4);
        let pieces: Vec<Bytes> = wav.chunks(chunk).map(Bytes::copy_from_slice).collect();
        let last = pieces.len() as u32 - 1;

        for order in [[0u32, 1, 2, 3], [2, 0, 3, 1], [3, 2, 1, 0], [1, 3, 0, 2]] {
            let asm = TrackAssembler::new(9, decoder.clone());
            for seq in order {
                asm.feed(seq, pieces[seq as usize].clone(), seq == last);
                let _ = asm.poll().await;
            }
            assert!(asm.is_fully_received());
            assert_eq!(*asm.decoded().unwrap(), expected, "order {order:?}");
        }
    }

    #[tokio::test]
    async fn closed_assembler_ignores_pieces() {
        let decoder = Arc::new(ByteDecoder::default());
        let asm = TrackAssembler::new(1, decoder.clone());
        asm.close();
        asm.feed(0, piece(0, 4), true);
        assert!(matches!(asm.poll().await, PollOutcome::NothingNew));
        assert!(asm.is_exhausted());
        assert!(decoder.inputs.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_fetch_exhausts_after_gap() {
        let asm = TrackAssembler::new(1, Arc::new(ByteDecoder::default()));
        asm.feed(1, piece(1, 4), false);
        assert!(!asm.is_exhausted());
        asm.mark_failed();
        assert!(asm.has_failed());
        assert!(asm.is_exhausted());
    }
}
