use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::context::ContextError;

/// Failures reported by a [`KeyValueStore`](crate::store::KeyValueStore) adapter.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("store did not answer within {0:?}")]
    Timeout(Duration),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Errors surfaced by a rate limit check.
///
/// None of these are handled inside the limiter: fail-open versus fail-closed
/// is the caller's call.
#[derive(Debug, Error)]
pub enum LimiterError {
    /// The store could not be reached, failed its health check, or a read failed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// The lease could not be claimed before the context was done.
    #[error("timed out acquiring lease {key} after {waited:?} ({reason})")]
    LeaseTimeout {
        key: String,
        waited: Duration,
        reason: ContextError,
    },

    /// A set or decrement failed while the lease was held. Whatever the store
    /// persisted is left as is.
    #[error("store write failed: {0}")]
    StoreWrite(#[source] StoreError),

    /// The context finished during the decision phase.
    #[error("check cancelled during decision phase: {0}")]
    Cancelled(#[source] ContextError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, LimiterError>;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_limiter_error(err: &LimiterError) -> Self {
        let message = err.to_string();
        match err {
            LimiterError::StoreUnavailable(_) => Self::new("store_unavailable", &message, 503),
            LimiterError::LeaseTimeout { .. } => Self::new("lease_timeout", &message, 503),
            LimiterError::StoreWrite(_) => Self::new("store_write_failed", &message, 500),
            LimiterError::Cancelled(_) => Self::new("cancelled", &message, 503),
            LimiterError::Validation(_) => Self::new("validation_error", &message, 422),
            LimiterError::Configuration(_) => Self::new("configuration_error", &message, 500),
        }
    }
}

impl IntoResponse for LimiterError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::from_limiter_error(&self);
        let status =
            StatusCode::from_u16(body.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let unavailable = LimiterError::StoreUnavailable(StoreError::Connection("refused".into()));
        assert_eq!(ErrorResponse::from_limiter_error(&unavailable).code, 503);

        let write = LimiterError::StoreWrite(StoreError::Command("READONLY".into()));
        let body = ErrorResponse::from_limiter_error(&write);
        assert_eq!(body.code, 500);
        assert_eq!(body.error, "store_write_failed");

        let timeout = LimiterError::LeaseTimeout {
            key: "gorl-lease:login:1.2.3.4".into(),
            waited: Duration::from_millis(250),
            reason: ContextError::DeadlineExceeded,
        };
        let body = ErrorResponse::from_limiter_error(&timeout);
        assert_eq!(body.error, "lease_timeout");
        assert!(body.message.contains("gorl-lease:login:1.2.3.4"));

        let invalid = LimiterError::Validation("max_attempts must be greater than 0".into());
        assert_eq!(ErrorResponse::from_limiter_error(&invalid).code, 422);
    }

    #[test]
    fn test_into_response_status() {
        let response = LimiterError::Cancelled(ContextError::Cancelled).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
