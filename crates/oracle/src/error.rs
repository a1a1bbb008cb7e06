//! Oracle error types.

use std::time::Duration;
use thiserror::Error;

/// Certificate oracle errors.
///
/// Callers treat every variant as "no data for now"; none of them should
/// invalidate cached state.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("oracle returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid oracle response: {0}")]
    InvalidResponse(String),

    #[error("oracle call timed out after {0:?}")]
    Timeout(Duration),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for oracle operations.
pub type OracleResult<T> = std::result::Result<T, OracleError>;
