//! Acquisition façade binding a pool to an executor and timeouts.

use tokio::runtime::Handle;

use tidepool_core::Driver;

use crate::config::Timeouts;
use crate::error::PoolError;
use crate::pool::{Pool, PooledConnection};

/// Acquires connections from a [`Pool`] with fixed timeouts.
///
/// The connect and queue timeouts run on independent timers; an error
/// names the one that fired ([`PoolError::ConnectTimeout`] or
/// [`PoolError::QueueTimeout`]).
pub struct Connector<D: Driver> {
    pool: Pool<D>,
    executor: Handle,
    timeouts: Timeouts,
}

impl<D: Driver> Clone for Connector<D> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            executor: self.executor.clone(),
            timeouts: self.timeouts,
        }
    }
}

impl<D: Driver> Connector<D> {
    /// Create a connector.
    pub fn new(pool: Pool<D>, executor: Handle, timeouts: Timeouts) -> Self {
        Self {
            pool,
            executor,
            timeouts,
        }
    }

    /// Acquire a connection bound to this connector's executor.
    pub async fn connect(&self) -> Result<PooledConnection<D>, PoolError> {
        self.pool
            .acquire(&self.executor, self.timeouts.connect, self.timeouts.queue)
            .await
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<D> {
        &self.pool
    }

    /// Executor handed-out connections run on.
    #[must_use]
    pub fn executor(&self) -> &Handle {
        &self.executor
    }

    /// Timeouts applied to each acquisition.
    #[must_use]
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }
}
