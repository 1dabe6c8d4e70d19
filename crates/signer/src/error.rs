//! Signer error types.

use thiserror::Error;

/// Link token errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token signature does not match")]
    InvalidSignature,

    #[error("token expired at {exp}")]
    Expired { exp: i64 },

    #[error("invalid ttl: {0}")]
    InvalidTtl(String),

    #[error("signing secret must be at least {min} bytes")]
    WeakSecret { min: usize },
}

/// Result type for signing operations.
pub type SignerResult<T> = std::result::Result<T, SignerError>;
