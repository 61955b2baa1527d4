use tokio::sync::mpsc;

/// Exclusive bounds for a selection worth capturing, in UTF-16 code units
/// (the unit a browser reports for a selection's length).
pub const MIN_SELECTION_UNITS: usize = 10;
pub const MAX_SELECTION_UNITS: usize = 1000;

/// Source of host text selections, polled by the chat shell between events.
pub trait SelectionObserver {
    /// Next pending selection, if any, without waiting.
    fn try_next(&mut self) -> Option<String>;
}

impl SelectionObserver for mpsc::UnboundedReceiver<String> {
    fn try_next(&mut self) -> Option<String> {
        self.try_recv().ok()
    }
}

impl SelectionObserver for std::collections::VecDeque<String> {
    fn try_next(&mut self) -> Option<String> {
        self.pop_front()
    }
}

/// Trimmed selection if its length is strictly inside the capture window.
pub fn capturable(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let len = selection_len(trimmed);
    (len > MIN_SELECTION_UNITS && len < MAX_SELECTION_UNITS).then_some(trimmed)
}

/// Length in UTF-16 code units; characters outside the BMP count twice.
pub fn selection_len(text: &str) -> usize {
    text.encode_utf16().count()
}
