//! Queue errors.

use forklift_store::StoreError;
use thiserror::Error;

/// Errors returned by queue engine and processor operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// An envelope could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Queue name is empty, too long or contains characters outside `[A-Za-z0-9_-]`.
    #[error("Invalid queue name: {0:?}")]
    InvalidQueueName(String),

    /// A caller-supplied argument was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl QueueError {
    /// Whether the same call may succeed if retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::Store(e) if e.is_transient())
    }
}

/// Errors a job handler reports back to the processing loop.
///
/// Every variant is retried; the loop does not distinguish between a
/// rejected payload and a failed side effect.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload did not have the shape the handler expects.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// An outbound HTTP call failed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::InvalidPayload(err.to_string())
    }
}

/// Handler lookup errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// No handler is registered for the job type.
    #[error("unknown job type: {0}")]
    UnknownType(String),

    /// A handler for the job type is already registered.
    #[error("handler already registered for job type: {0}")]
    AlreadyRegistered(String),
}
