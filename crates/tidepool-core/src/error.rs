//! Driver-level error types.

use thiserror::Error;

/// Errors reported by a database driver.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DriverError {
    /// IO error on the underlying transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Handshake (startup, authentication) failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The server rejected a request.
    #[error("server error: {0}")]
    Server(String),

    /// The native cancel request could not be delivered.
    #[error("cancel request failed: {0}")]
    Cancel(String),

    /// Malformed connection string.
    #[error("invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// The connection was already closed.
    #[error("connection closed")]
    ConnectionClosed,
}

impl DriverError {
    /// Whether this error leaves the session in an unusable state.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Server(_) | Self::InvalidConnectionString(_))
    }
}

/// Result type for driver operations.
pub type Result<T> = std::result::Result<T, DriverError>;
