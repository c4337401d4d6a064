//! Store errors.

use thiserror::Error;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected or failed the operation.
    #[error("Store backend error: {0}")]
    Backend(String),

    /// Stored data does not have the expected shape.
    #[error("Corrupt store data: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<tokio_rusqlite::Error> for StoreError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        match err {
            tokio_rusqlite::Error::ConnectionClosed => {
                StoreError::Unavailable("sqlite connection closed".to_string())
            }
            tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(code, msg))
                if code.code == rusqlite::ErrorCode::DatabaseBusy
                    || code.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                StoreError::Unavailable(msg.unwrap_or_else(|| code.to_string()))
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}
