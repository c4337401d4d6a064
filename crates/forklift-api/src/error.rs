//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use forklift_queue::QueueError;
use thiserror::Error;

/// Errors returned to HTTP clients as `{"error": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request was malformed or named an invalid queue.
    #[error("{0}")]
    BadRequest(String),

    /// The store could not be reached.
    #[error("{0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::InvalidQueueName(_) | QueueError::InvalidArgument(_) => {
                ApiError::BadRequest(err.to_string())
            }
            QueueError::Store(e) => ApiError::Unavailable(e.to_string()),
            QueueError::Serialization(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({"error": self.to_string()})),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forklift_store::StoreError;

    #[test]
    fn test_queue_error_mapping() {
        let err = ApiError::from(QueueError::InvalidQueueName("a b".to_string()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = ApiError::from(QueueError::InvalidArgument("empty".to_string()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = ApiError::from(QueueError::Store(StoreError::Unavailable(
            "connection refused".to_string(),
        )));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_into_response_status() {
        let response = ApiError::Internal("boom".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
