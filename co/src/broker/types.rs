//! Broker event types

/// A coarse-grained change notification
///
/// Events carry no payload worth acting on by itself: subscribers re-read
/// the store on every event. The broker may coalesce bursts, so event
/// counts carry no meaning either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// The store changed (local write or external mutation of the file)
    StoreChanged,
    /// The watcher hit an I/O error; it keeps running
    WatcherError { message: String },
}

impl ChangeEvent {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StoreChanged => "store_changed",
            Self::WatcherError { .. } => "watcher_error",
        }
    }
}
