//! Signer error types.

use thiserror::Error;

/// Key handling and envelope errors.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("key parsing error: {0}")]
    KeyParsing(String),

    #[error("unsupported key algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("key encoding error: {0}")]
    KeyEncoding(String),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("algorithm mismatch: key uses {expected}, envelope declares {found}")]
    AlgorithmMismatch { expected: String, found: String },

    #[error("verification failed")]
    VerificationFailed,

    #[error("invalid signature format: {0}")]
    InvalidSignature(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for signer operations.
pub type SignerResult<T> = std::result::Result<T, SignerError>;
