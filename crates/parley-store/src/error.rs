use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value is not valid JSON.
    #[error("Corrupt value: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The connection mutex was poisoned by a panicking writer.
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// A blocking storage task panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The backend refused the operation (offline, quota, injected failure).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
