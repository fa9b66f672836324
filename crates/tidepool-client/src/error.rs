//! Client error types.

use std::time::Duration;

use thiserror::Error;
use tidepool_core::{ConnectionId, DriverError};
use tidepool_pool::PoolError;

/// Failure of a cancel request.
///
/// Always returned together with the affected connection.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CancelError {
    /// The driver reported an error for the cancel request.
    #[error("cancel request failed: {0}")]
    Native(#[source] DriverError),

    /// No acknowledgment within the cancel timeout. The operation may
    /// still be running on the server; the connection is marked bad.
    #[error("cancel request not acknowledged within {timeout:?}")]
    Timeout {
        /// Cancel timeout that elapsed.
        timeout: Duration,
    },

    /// The cancel was torn down before either outcome arrived (runtime
    /// shutdown).
    #[error("cancel request abandoned")]
    Abandoned,
}

impl CancelError {
    /// Stable snake_case code for this error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "cancel_timeout",
            Self::Native(_) | Self::Abandoned => "cancel_error",
        }
    }
}

/// Errors returned by the client layer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Acquisition or release failed.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Cancelling an operation failed.
    #[error(transparent)]
    Cancel(#[from] CancelError),

    /// The driver failed the operation.
    #[error("operation failed: {0}")]
    Driver(#[from] DriverError),

    /// The operation's deadline passed and it was cancelled.
    #[error("operation deadline exceeded")]
    Timeout {
        /// Why the cancel itself failed, if it did.
        #[source]
        cancel: Option<CancelError>,
    },

    /// The connection is marked bad and cannot run operations.
    #[error("connection {id} is bad")]
    BadConnection {
        /// The rejected connection.
        id: ConnectionId,
    },
}

impl Error {
    /// Stable snake_case code for this error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Pool(e) => e.code(),
            Self::Cancel(e) => e.code(),
            Self::Driver(_) => "driver_error",
            Self::Timeout { .. } => "timeout",
            Self::BadConnection { .. } => "bad_connection",
        }
    }

    /// Whether this error is transient and the caller may retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Pool(e) => e.is_timeout() || matches!(e, PoolError::PoolOverflow { .. }),
            Self::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(
            CancelError::Timeout {
                timeout: Duration::from_secs(1)
            }
            .code(),
            "cancel_timeout"
        );
        assert_eq!(
            CancelError::Native(DriverError::Cancel("refused".into())).code(),
            "cancel_error"
        );
        assert_eq!(Error::from(PoolError::PoolClosed).code(), "pool_closed");
        assert_eq!(
            Error::from(CancelError::Abandoned).code(),
            "cancel_error"
        );
    }

    #[test]
    fn test_transient() {
        let overflow = Error::from(PoolError::PoolOverflow { queue_capacity: 4 });
        assert!(overflow.is_transient());
        assert!(Error::Timeout { cancel: None }.is_transient());
        assert!(!Error::from(DriverError::ConnectionClosed).is_transient());
    }
}
