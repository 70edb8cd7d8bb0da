//! Store error types.

/// Errors produced by [`WorkloadStore`](crate::WorkloadStore) and
/// [`StreamTrackingStore`](crate::StreamTrackingStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON-encoded column (labels) could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A persisted column could not be decoded.
    #[error("corrupt {column} value '{value}'")]
    Corrupt { column: &'static str, value: String },

    /// Internal mutex was poisoned by a panicked thread.
    #[error("state store lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
