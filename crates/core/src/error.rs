//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("unknown link purpose: {0}")]
    UnknownPurpose(String),

    #[error("unknown group kind: {0}")]
    UnknownGroupKind(String),

    #[error("upload session error: {0}")]
    UploadSession(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
