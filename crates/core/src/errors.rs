//! Engine errors.
//!
//! The storage crate maps its Diesel errors into [`DatabaseError`]. Provider
//! failures never show up here: the fallback resolver turns them into
//! outcome values.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    /// A record batch could not be written after all retries.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Invalid configuration value: {0}")]
    InvalidConfigValue(String),

    #[error("Input validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Whether this error must abort the current run.
    ///
    /// Persistence failures only cost the affected symbols their cursor
    /// advance; the next run retries them.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Persistence(_) | Error::Cancelled)
    }
}

/// Storage failures, flattened to strings so the engine never sees a
/// backend-specific type.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("Failed to create database pool: {0}")]
    PoolCreationFailed(String),

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Rolled back or left the transaction manager broken.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// A stored row could not be decoded.
    #[error("Internal database error: {0}")]
    Internal(String),
}

/// Rejected operator input.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
