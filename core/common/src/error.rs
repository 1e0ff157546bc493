//! Common error types for Driftsync.

use thiserror::Error;

/// Top-level error type for Driftsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Remote rejected the request; retrying will not help.
    #[error("Client error: {0}")]
    Client(String),

    /// Transport or server-side failure; safe to retry.
    #[error("Transient error: {0}")]
    Transient(String),

    /// Persistent store read or write failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal engine coordination failed.
    #[error("Engine error: {0}")]
    Engine(String),
}

impl Error {
    /// Whether the failure is worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_) | Error::Io(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
