//! Common error types for OTMDB

use thiserror::Error;

/// Common result type for OTMDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across OTMDB crates
///
/// These are the "unexpected" failures. Domain outcomes of an operation
/// (already checked, not found, ...) live in per-operation enums in
/// `otmdb-core` and wrap this type only for their internal variant.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Event payload (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error (corrupt row, broken invariant)
    #[error("Internal error: {0}")]
    Internal(String),
}
