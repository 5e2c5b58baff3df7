//! Human-readable labels for queue entries.

use podwall_types::QueueEntryState;

/// Button/label text for a post given its queue state.
///
/// `anything_playing` decides the wording for posts that are not queued yet.
pub fn entry_label(state: Option<QueueEntryState>, anything_playing: bool) -> &'static str {
    match state {
        Some(QueueEntryState::Playing | QueueEntryState::Paused) => "Playing",
        Some(QueueEntryState::OnQueue) => "Downloading",
        Some(QueueEntryState::Ready) => "Ready & Waiting",
        Some(QueueEntryState::Historic) => "Play Again",
        None if anything_playing => "Add to Queue",
        None => "Play",
    }
}
