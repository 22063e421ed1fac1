//! Common error types for KMS

use thiserror::Error;

/// Common result type for KMS operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across KMS services
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unexpected wire message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or message value
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
