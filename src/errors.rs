use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("timeout")]
    Timeout,

    #[error("{0}")]
    Validation(String),

    #[error("queue limit reached")]
    QueueLimitReached,

    #[error("already deposited")]
    AlreadyDeposited,

    #[error("expired")]
    Expired,

    #[error("cancelled")]
    Cancelled,

    #[error("db down: {0}")]
    StoreUnavailable(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    /// Short, stable message returned to API callers.
    fn public_message(&self) -> String {
        match self {
            AppError::NotFound(what) => what.clone(),
            AppError::Conflict(_) => "conflict".to_string(),
            AppError::StoreUnavailable(_) => "db down".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound("not found".to_string()),
            StoreError::Conflict => AppError::Conflict("stale revision or duplicate id".to_string()),
            StoreError::Unavailable(e) => AppError::StoreUnavailable(e),
            StoreError::Malformed(e) => AppError::StoreUnavailable(format!("malformed store response: {}", e)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(e) => {
                tracing::warn!("write conflict surfaced to caller: {}", e);
                StatusCode::CONFLICT
            }
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Validation(_) | AppError::AlreadyDeposited | AppError::Expired => {
                StatusCode::BAD_REQUEST
            }
            AppError::QueueLimitReached => StatusCode::LOCKED,
            AppError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::StoreUnavailable(e) => {
                tracing::error!("document store unavailable: {}", e);
                StatusCode::SERVICE_UNAVAILABLE
            }
        };

        let body = Json(json!({ "error": self.public_message() }));
        let mut response = (status, body).into_response();

        // Long-poll callers are expected to re-issue immediately
        if matches!(self, AppError::Timeout) {
            response.headers_mut().insert(
                "retry-after",
                axum::http::HeaderValue::from_static("0"),
            );
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_keep_their_kind() {
        assert!(matches!(AppError::from(StoreError::NotFound), AppError::NotFound(_)));
        assert!(matches!(AppError::from(StoreError::Conflict), AppError::Conflict(_)));
        assert!(matches!(
            AppError::from(StoreError::Unavailable("refused".into())),
            AppError::StoreUnavailable(_)
        ));
    }

    #[test]
    fn test_status_codes() {
        let cases = [
            (AppError::NotFound("token not found".into()), StatusCode::NOT_FOUND),
            (AppError::Timeout, StatusCode::GATEWAY_TIMEOUT),
            (AppError::validation("id missing"), StatusCode::BAD_REQUEST),
            (AppError::QueueLimitReached, StatusCode::LOCKED),
            (AppError::AlreadyDeposited, StatusCode::BAD_REQUEST),
            (AppError::Expired, StatusCode::BAD_REQUEST),
            (AppError::StoreUnavailable("x".into()), StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn test_public_message_hides_store_detail() {
        let err = AppError::StoreUnavailable("connection refused (os error 111)".into());
        assert_eq!(err.public_message(), "db down");
        assert_eq!(AppError::QueueLimitReached.public_message(), "queue limit reached");
    }
}
