/// Errors that can occur within the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The store was opened with an empty or unusable path.
    #[error("storage: invalid configuration: {0}")]
    InvalidConfig(String),

    /// Filesystem error while preparing the database directory.
    #[error("storage: io error: {0}")]
    Io(#[from] std::io::Error),

    /// An underlying SQLite error.
    #[error("storage: sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON encoding/decoding failure for labels or hook payload columns.
    #[error("storage: json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
