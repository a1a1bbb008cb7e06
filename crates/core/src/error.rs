//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid content id: {0}")]
    InvalidContentId(String),

    #[error("invalid invite token: {0}")]
    InvalidInviteToken(String),

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("password hash error: {0}")]
    PasswordHash(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
