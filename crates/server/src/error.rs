//! API error types.

use crate::chain_cache::ChainCacheError;
use crate::manifest::ManifestError;
use crate::refresh::RefreshError;
use crate::registration::RegistrationError;
use crate::submission::SubmissionError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// The only message a registration failure ever returns to the network.
pub const REGISTRATION_REJECTED: &str = "registration rejected";

/// The only message a rejected submission returns to the network.
pub const SUBMISSION_REJECTED: &str = "submission rejected";

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{REGISTRATION_REJECTED}")]
    RegistrationRejected,

    #[error("{SUBMISSION_REJECTED}")]
    SubmissionRejected,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] ocspwatch_metadata::MetadataError),

    #[error("core error: {0}")]
    Core(#[from] ocspwatch_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Conflict(_) => "conflict",
            Self::RegistrationRejected => "registration_rejected",
            Self::SubmissionRejected => "submission_rejected",
            Self::Internal(_) => "internal_error",
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "core_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RegistrationRejected | Self::SubmissionRejected => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Metadata(e) => match e {
                ocspwatch_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                ocspwatch_metadata::MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                ocspwatch_metadata::MetadataError::Constraint(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<RegistrationError> for ApiError {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::Store(e) => Self::Metadata(e),
            RegistrationError::Internal(msg) => Self::Internal(msg),
            rejected => {
                tracing::warn!(reason = %rejected, "Registration rejected");
                Self::RegistrationRejected
            }
        }
    }
}

impl From<SubmissionError> for ApiError {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::Store(e) => Self::Metadata(e),
            SubmissionError::Internal(msg) => Self::Internal(msg),
            rejected => {
                tracing::warn!(reason = %rejected, "Submission rejected");
                Self::SubmissionRejected
            }
        }
    }
}

impl From<ManifestError> for ApiError {
    fn from(err: ManifestError) -> Self {
        match err {
            ManifestError::Malformed(msg) => Self::BadRequest(msg),
            ManifestError::Store(e) => Self::Metadata(e),
        }
    }
}

impl From<RefreshError> for ApiError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::Busy => Self::Conflict(err.to_string()),
            RefreshError::Malformed(msg) => Self::BadRequest(msg),
            RefreshError::Store(e) => Self::Metadata(e),
        }
    }
}

impl From<ChainCacheError> for ApiError {
    fn from(err: ChainCacheError) -> Self {
        match err {
            ChainCacheError::NotFound => Self::NotFound(err.to_string()),
            ChainCacheError::Store(e) => Self::Metadata(e),
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_failures_are_indistinguishable() {
        let reasons = [
            RegistrationError::Malformed("token length".to_string()),
            RegistrationError::UnknownInvite,
            RegistrationError::AlreadyRegistered,
            RegistrationError::ValidatorMismatch,
            RegistrationError::BadSignature,
            RegistrationError::KeyInUse,
        ];
        for reason in reasons {
            let api: ApiError = reason.into();
            assert_eq!(api.status_code(), StatusCode::BAD_REQUEST);
            assert_eq!(api.to_string(), REGISTRATION_REJECTED);
        }
    }

    #[test]
    fn test_store_failures_during_registration_are_internal() {
        let api: ApiError =
            RegistrationError::Store(ocspwatch_metadata::MetadataError::Internal("x".into()))
                .into();
        assert_eq!(api.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_submission_failures_are_indistinguishable() {
        let api: ApiError = SubmissionError::UnknownKey(uuid::Uuid::new_v4()).into();
        assert_eq!(api.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(api.code(), "submission_rejected");
        assert_eq!(api.to_string(), SUBMISSION_REJECTED);

        let api: ApiError = SubmissionError::BadSignature.into();
        assert_eq!(api.to_string(), SUBMISSION_REJECTED);
    }

    #[test]
    fn test_refresh_busy_is_conflict() {
        let api: ApiError = RefreshError::Busy.into();
        assert_eq!(api.status_code(), StatusCode::CONFLICT);
        assert_eq!(api.code(), "conflict");
    }
}
