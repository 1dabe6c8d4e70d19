//! API error types.

use axum::Json;
use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use satchel_metadata::MetadataError;
use satchel_signer::SignerError;
use satchel_storage::StorageError;
use serde::Serialize;

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
    #[error("malformed link token: {0}")]
    TokenMalformed(String),

    #[error("link token signature is invalid")]
    TokenInvalidSignature,

    #[error("link expired at {exp}")]
    TokenExpired { exp: i64 },

    /// No metadata row backs the requested resource.
    #[error("not found: {0}")]
    MetadataMissing(String),

    /// The metadata row exists but its blob is gone.
    #[error("content missing for {0}")]
    BlobMissing(String),

    #[error("{0} belongs to another user")]
    OwnershipViolation(String),

    #[error("payload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },

    #[error("incomplete part set: {0}")]
    IncompletePartSet(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("object store failure: {0}")]
    AdapterFailure(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("{0}")]
    Core(#[from] satchel_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TokenMalformed(_) => "token_malformed",
            Self::TokenInvalidSignature => "token_invalid_signature",
            Self::TokenExpired { .. } => "token_expired",
            Self::MetadataMissing(_) => "metadata_missing",
            Self::BlobMissing(_) => "blob_missing",
            Self::OwnershipViolation(_) => "ownership_violation",
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::IncompletePartSet(_) => "incomplete_part_set",
            Self::Validation(_) => "validation_error",
            Self::AdapterFailure(_) => "adapter_failure",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::Internal(_) => "internal_error",
            Self::Metadata(e) => match e {
                MetadataError::NotFound(_) => "metadata_missing",
                MetadataError::AlreadyExists(_) | MetadataError::InvalidStateTransition { .. } => {
                    "conflict"
                }
                _ => "metadata_error",
            },
            Self::Core(_) => "validation_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::TokenMalformed(_) => StatusCode::BAD_REQUEST,
            Self::TokenInvalidSignature => StatusCode::UNAUTHORIZED,
            Self::TokenExpired { .. } => StatusCode::GONE,
            Self::MetadataMissing(_) | Self::BlobMissing(_) => StatusCode::NOT_FOUND,
            Self::OwnershipViolation(_) | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::IncompletePartSet(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::AdapterFailure(_) => StatusCode::BAD_GATEWAY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Metadata(e) => match e {
                MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                MetadataError::AlreadyExists(_) | MetadataError::InvalidStateTransition { .. } => {
                    StatusCode::CONFLICT
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => Self::BlobMissing(key),
            StorageError::InvalidPart { .. } => Self::Validation(err.to_string()),
            StorageError::InvalidKey(_) => Self::Validation(err.to_string()),
            other => Self::AdapterFailure(other.to_string()),
        }
    }
}

impl From<SignerError> for ApiError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Malformed(reason) => Self::TokenMalformed(reason),
            SignerError::InvalidSignature => Self::TokenInvalidSignature,
            SignerError::Expired { exp } => Self::TokenExpired { exp },
            SignerError::InvalidTtl(reason) => Self::Validation(reason),
            SignerError::WeakSecret { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::Internal(_) | Self::Metadata(_) | Self::AdapterFailure(_) => {
                tracing::error!(code = self.code(), error = %self, "request failed");
            }
            _ => tracing::debug!(code = self.code(), error = %self, "request rejected"),
        }

        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if matches!(self, Self::Unauthorized(_)) {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static(r#"Basic realm="satchel""#),
            );
        }
        response
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_errors_map_to_distinct_statuses() {
        let malformed: ApiError = SignerError::Malformed("x".to_string()).into();
        let forged: ApiError = SignerError::InvalidSignature.into();
        let expired: ApiError = SignerError::Expired { exp: 10 }.into();

        assert_eq!(malformed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(forged.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(expired.status_code(), StatusCode::GONE);
        assert_eq!(expired.code(), "token_expired");
    }

    #[test]
    fn test_missing_resources_have_distinct_codes() {
        let meta = ApiError::MetadataMissing("file".to_string());
        let blob: ApiError = StorageError::NotFound("files/a/b".to_string()).into();

        assert_eq!(meta.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(blob.status_code(), StatusCode::NOT_FOUND);
        assert_ne!(meta.code(), blob.code());
        assert_eq!(blob.code(), "blob_missing");
    }

    #[test]
    fn test_storage_failures_are_bad_gateway() {
        let err: ApiError = StorageError::Io(std::io::Error::other("disk gone")).into();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.code(), "adapter_failure");
    }

    #[test]
    fn test_unauthorized_sets_challenge_header() {
        let response = ApiError::Unauthorized("who are you".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(WWW_AUTHENTICATE));
    }
}
