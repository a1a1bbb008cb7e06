//! Metadata store error types.

use thiserror::Error;

/// Metadata store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// Map unique-key violations to `Constraint`, leaving other errors as `Database`.
///
/// SQLite reports "UNIQUE constraint failed: <table>.<column>"; PostgreSQL
/// reports SQLSTATE 23505.
pub(crate) fn map_unique_violation(err: sqlx::Error, what: impl FnOnce() -> String) -> MetadataError {
    if let sqlx::Error::Database(ref db_err) = err
        && (db_err.code().as_deref() == Some("23505")
            || db_err.message().contains("UNIQUE constraint"))
    {
        return MetadataError::Constraint(what());
    }
    MetadataError::Database(err)
}

/// Cardinalities are counts and can never be negative.
pub(crate) fn check_cardinality(cardinality: i64) -> MetadataResult<()> {
    if cardinality < 0 {
        return Err(MetadataError::Constraint(format!(
            "cardinality must be non-negative, got {cardinality}"
        )));
    }
    Ok(())
}
