//! Playback queue bookkeeping.
//!
//! Entries are never removed; a historic entry played again moves to the
//! back. At most one entry is `Playing` or `Paused` at any time.

use podwall_types::{QueueEntry, QueueEntryState, TrackId};

#[derive(Debug, Default, Clone)]
pub struct PlaybackQueue {
    entries: Vec<QueueEntry>,
    /// Index of the entry playback last started from.
    cursor: Option<usize>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, track_id: TrackId) -> Option<usize> {
        self.entries.iter().position(|e| e.track_id == track_id)
    }

    fn entry_mut(&mut self, track_id: TrackId) -> Option<&mut QueueEntry> {
        self.entries.iter_mut().find(|e| e.track_id == track_id)
    }

    /// Append `track_id` as `OnQueue`, or return the existing entry.
    ///
    /// The flag is `true` when a new entry was created.
    pub fn enqueue(&mut self, track_id: TrackId) -> (QueueEntry, bool) {
        if let Some(existing) = self.entries.iter().find(|e| e.track_id == track_id) {
            return (*existing, false);
        }
        let entry = QueueEntry {
            track_id,
            state: QueueEntryState::OnQueue,
        };
        self.entries.push(entry);
        (entry, true)
    }

    /// Give a `Historic` entry another turn: it moves to the back as `OnQueue`.
    ///
    /// Returns `false` when the entry is missing or not historic.
    pub fn requeue(&mut self, track_id: TrackId) -> bool {
        let Some(idx) = self.position(track_id) else {
            return false;
        };
        if self.entries[idx].state != QueueEntryState::Historic {
            return false;
        }
        let mut entry = self.entries.remove(idx);
        entry.state = QueueEntryState::OnQueue;
        self.entries.push(entry);
        self.cursor = match self.cursor {
            Some(c) if c == idx => Some(self.entries.len() - 1),
            Some(c) if c > idx => Some(c - 1),
            other => other,
        };
        true
    }

    pub fn state_of(&self, track_id: TrackId) -> Option<QueueEntryState> {
        self.entries
            .iter()
            .find(|e| e.track_id == track_id)
            .map(|e| e.state)
    }

    /// `OnQueue`/`Historic` → `Ready`. Returns whether the entry changed.
    pub fn mark_ready(&mut self, track_id: TrackId) -> bool {
        match self.entry_mut(track_id) {
            Some(entry)
                if matches!(
                    entry.state,
                    QueueEntryState::OnQueue | QueueEntryState::Historic
                ) =>
            {
                entry.state = QueueEntryState::Ready;
                true
            }
            _ => false,
        }
    }

    /// Make `track_id` the only playing entry, enqueueing it if needed.
    ///
    /// Returns the entries that were playing or paused before; they are now `Historic`.
    pub fn set_playing(&mut self, track_id: TrackId) -> Vec<TrackId> {
        let mut superseded = Vec::new();
        for entry in self.entries.iter_mut() {
            if entry.track_id != track_id
                && matches!(
                    entry.state,
                    QueueEntryState::Playing | QueueEntryState::Paused
                )
            {
                entry.state = QueueEntryState::Historic;
                superseded.push(entry.track_id);
            }
        }
        self.enqueue(track_id);
        if let Some(idx) = self.position(track_id) {
            self.entries[idx].state = QueueEntryState::Playing;
            self.cursor = Some(idx);
        }
        superseded
    }

    /// `Playing` → `Paused`; returns the paused track.
    pub fn pause(&mut self) -> Option<TrackId> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.state == QueueEntryState::Playing)?;
        entry.state = QueueEntryState::Paused;
        Some(entry.track_id)
    }

    /// `Paused` → `Playing`; returns the resumed track.
    pub fn resume(&mut self) -> Option<TrackId> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.state == QueueEntryState::Paused)?;
        entry.state = QueueEntryState::Playing;
        Some(entry.track_id)
    }

    /// Move an entry to `Historic`. Returns its previous state.
    pub fn mark_historic(&mut self, track_id: TrackId) -> Option<QueueEntryState> {
        let entry = self.entry_mut(track_id)?;
        let previous = entry.state;
        entry.state = QueueEntryState::Historic;
        Some(previous)
    }

    /// The entry driving the output (playing or paused).
    pub fn current(&self) -> Option<QueueEntry> {
        self.entries
            .iter()
            .find(|e| {
                matches!(
                    e.state,
                    QueueEntryState::Playing | QueueEntryState::Paused
                )
            })
            .copied()
    }

    pub fn playing(&self) -> Option<TrackId> {
        self.entries
            .iter()
            .find(|e| e.state == QueueEntryState::Playing)
            .map(|e| e.track_id)
    }

    /// First `OnQueue`/`Ready` entry after `track_id` (or after the cursor when
    /// `track_id` is not queued). Moves the cursor to it.
    pub fn advance_after(&mut self, track_id: Option<TrackId>) -> Option<TrackId> {
        let base = track_id.and_then(|id| self.position(id)).or(self.cursor);
        let from = base.map(|i| i + 1).unwrap_or(0);
        let idx = (from..self.entries.len()).find(|&i| {
            matches!(
                self.entries[i].state,
                QueueEntryState::OnQueue | QueueEntryState::Ready
            )
        })?;
        self.cursor = Some(idx);
        Some(self.entries[idx].track_id)
    }

    /// Any entry still waiting to play.
    pub fn has_pending(&self) -> bool {
        self.entries.iter().any(|e| {
            matches!(
                e.state,
                QueueEntryState::OnQueue | QueueEntryState::Ready
            )
        })
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
