//! Store error taxonomy
//!
//! Callers branch on the kind, not the message: `Integrity` means the
//! inputs are wrong and a retry without fixing them will fail again,
//! `Conflict` means another lane already handled the row, `NotFound` is a
//! missing id, `Database` is the transport.

use thiserror::Error;

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The operation would violate a store invariant (cycle, wrong-work
    /// edge, duplicate id, malformed task id). Not retryable as-is.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// A compare-and-set transition lost the race; another lane owns the
    /// row. Treated as "someone else handled it".
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying SQLite failure. May be transient (locked file) or fatal
    /// (corruption); the caller's lane decides.
    #[error("database error: {0}")]
    Database(String),
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}
