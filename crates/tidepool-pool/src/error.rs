//! Pool error types.

use std::time::Duration;

use thiserror::Error;
use tidepool_core::{ConnectionId, DriverError};

/// Errors returned by the pool.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// All slots are taken and the waiter queue is full.
    #[error("connection pool overflow: waiter queue is full ({queue_capacity} queued)")]
    PoolOverflow {
        /// Configured queue capacity.
        queue_capacity: u32,
    },

    /// Waited longer than the queue timeout for a free slot.
    #[error("timed out after {timeout:?} waiting for a pooled connection")]
    QueueTimeout {
        /// Queue timeout that elapsed.
        timeout: Duration,
    },

    /// The handshake did not finish within the connect timeout.
    #[error("timed out after {timeout:?} connecting to the server")]
    ConnectTimeout {
        /// Connect timeout that elapsed.
        timeout: Duration,
    },

    /// The handshake failed.
    #[error("failed to connect: {0}")]
    Connect(#[source] DriverError),

    /// The pool has been closed.
    #[error("connection pool is closed")]
    PoolClosed,

    /// A connection this pool has not leased was handed back.
    #[error("connection {id} is not leased from this pool")]
    NotLeased {
        /// Identity of the rejected connection.
        id: ConnectionId,
    },

    /// Invalid pool configuration.
    #[error("invalid pool configuration: {0}")]
    Config(String),
}

impl PoolError {
    /// Stable snake_case code for this error kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::PoolOverflow { .. } => "pool_overflow",
            Self::QueueTimeout { .. } => "queue_timeout",
            Self::ConnectTimeout { .. } => "connect_timeout",
            Self::Connect(_) => "connect_error",
            Self::PoolClosed => "pool_closed",
            Self::NotLeased { .. } => "not_leased",
            Self::Config(_) => "invalid_config",
        }
    }

    /// Whether a deadline expired.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::QueueTimeout { .. } | Self::ConnectTimeout { .. })
    }
}
