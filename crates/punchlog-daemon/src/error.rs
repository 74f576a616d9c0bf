//! Error types for the HTTP surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use punchlog_core::SubjectId;
use punchlog_core::ingest::IngestError;
use serde::Serialize;
use thiserror::Error;

/// Errors returned by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or wrong `x-api-key`.
    #[error("unauthorized")]
    Unauthorized,

    /// The request body could not be parsed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The subject is not enrolled.
    #[error("unknown subject {0}")]
    UnknownSubject(SubjectId),

    /// The timestamp was rejected.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// The ledger could not serve the request; retry later.
    #[error("ledger unavailable: {0}")]
    StoreUnavailable(String),

    /// Internal error (should not occur in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable message.
    pub error: String,
    /// Stable machine-readable code.
    pub code: &'static str,
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) | Self::InvalidTimestamp(_) => StatusCode::BAD_REQUEST,
            Self::UnknownSubject(_) => StatusCode::NOT_FOUND,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable code for clients and metric labels.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::UnknownSubject(_) => "UNKNOWN_SUBJECT",
            Self::InvalidTimestamp(_) => "INVALID_TIMESTAMP",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL",
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Unauthorized => Self::Unauthorized,
            IngestError::UnknownSubject { subject } => Self::UnknownSubject(subject),
            IngestError::InvalidTimestamp { reason } => Self::InvalidTimestamp(reason),
            other => Self::StoreUnavailable(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Store and internal failures are logged by the handler; the body
        // only carries a generic message.
        let error = match &self {
            Self::Unauthorized => "Unauthorized".to_string(),
            Self::StoreUnavailable(_) => "Ledger temporarily unavailable, retry later".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        let body = ErrorBody {
            error,
            code: self.code(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::InvalidTimestamp("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::UnknownSubject(SubjectId(3)).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::StoreUnavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_ingest_error_mapping() {
        assert!(matches!(
            ApiError::from(IngestError::Unauthorized),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            ApiError::from(IngestError::UnknownSubject {
                subject: SubjectId(8)
            }),
            ApiError::UnknownSubject(SubjectId(8))
        ));
        assert!(matches!(
            ApiError::from(IngestError::InvalidTimestamp {
                reason: "bad".into()
            }),
            ApiError::InvalidTimestamp(_)
        ));
    }

    #[test]
    fn test_error_responses_do_not_leak_details() {
        let response = ApiError::StoreUnavailable("disk I/O error at /var/lib".into()).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = ApiError::Internal("secret".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
