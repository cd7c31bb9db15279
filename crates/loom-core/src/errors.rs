//! Error types for the Loom core library.

/// Top-level error enum for the Loom core library.
///
/// Errors local to a single file or commit never surface here; they are
/// absorbed and logged by the indexer. What reaches the caller invalidates
/// the whole operation.
#[derive(Debug, thiserror::Error)]
pub enum LoomError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Another run holds the repository lease; retry later.
    #[error("repository {repository_id} is locked by another index run")]
    LockHeld { repository_id: i64 },

    #[error("git error: {0}")]
    Git(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LoomError {
    /// True for errors a caller should treat as "try again later".
    pub fn is_retryable(&self) -> bool {
        matches!(self, LoomError::LockHeld { .. })
    }
}

pub type LoomResult<T> = Result<T, LoomError>;
