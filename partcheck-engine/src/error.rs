//! HTTP error mapping for partcheck-engine

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::cache::CacheError;
use crate::matcher::MatchError;
use crate::service::ServiceError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. a sync is already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Dependency not configured or unreachable (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Common error: {0}")]
    Common(#[from] partcheck_common::Error),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Catalog(e) => e.into(),
            ServiceError::DetectorUnavailable => {
                ApiError::Unavailable("no detector configured".to_string())
            }
            ServiceError::Cache(CacheError::InvalidPattern(msg)) => ApiError::BadRequest(msg),
            ServiceError::Match(MatchError::InputTooLarge(msg)) => ApiError::BadRequest(msg),
            ServiceError::Cache(e @ (CacheError::RemoteUnavailable | CacheError::Remote(_))) => {
                ApiError::Unavailable(e.to_string())
            }
            ServiceError::Cache(CacheError::Cancelled) | ServiceError::Match(MatchError::Cancelled) => {
                ApiError::Unavailable("operation cancelled by shutdown".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(err) => match err {
                partcheck_common::Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
                other => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    other.to_string(),
                ),
            },
        };

        if status.is_server_error() {
            tracing::warn!(code = error_code, message = %message, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_error_mapping() {
        let not_found: ApiError =
            ServiceError::Catalog(partcheck_common::Error::NotFound("set x".into())).into();
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let bad_pattern: ApiError =
            ServiceError::Cache(CacheError::InvalidPattern("empty".into())).into();
        assert_eq!(bad_pattern.into_response().status(), StatusCode::BAD_REQUEST);

        let no_remote: ApiError = ServiceError::Cache(CacheError::RemoteUnavailable).into();
        assert_eq!(no_remote.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        let oversized: ApiError =
            ServiceError::Match(MatchError::InputTooLarge("slots".into())).into();
        assert_eq!(oversized.into_response().status(), StatusCode::BAD_REQUEST);

        let invariant: ApiError = ServiceError::Match(MatchError::Invariant("x".into())).into();
        assert_eq!(
            invariant.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
