use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The store was closed; reads and writes fail fast.
    #[error("Local store is unavailable")]
    Unavailable,

    /// A write broke the one-record-per-key rule.  Always a bug in the
    /// caller's key scheme, never a runtime condition.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A record holds a value the cache cannot store faithfully, such as a
    /// timestamp outside four-digit years.
    #[error("Record cannot be stored: {0}")]
    Unstorable(String),

    /// A thread panicked while holding the database lock.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref code, ref msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::InvariantViolation(
                    msg.clone().unwrap_or_else(|| "constraint violation".to_string()),
                )
            }
            other => StoreError::Sqlite(other),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
