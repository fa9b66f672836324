//! Connection pool implementation.
//!
//! The pool keeps at most `capacity` connections open. Idle connections are
//! reused most-recently-used first; when every slot is taken, callers queue
//! up to `queue_capacity` deep and are served strictly in arrival order.
//!
//! All counters and the waiter queue live in [`PoolState`] behind a single
//! mutex, which is the pool's serialization domain: no acquire can observe
//! a stale leased count, and every hand-off happens under the lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use hashbrown::HashSet;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::Instant;

use tidepool_core::{
    Connection, ConnectionId, ConnectionInfo, ConnectionState, Driver, Lease, LeaseHolder, Strand,
};

use crate::config::{PoolConfig, Timeouts};
use crate::connector::Connector;
use crate::error::PoolError;
use crate::lifecycle::{Checkin, SlotReservation};
use crate::sweep;
use crate::waiter::{Grant, WaitQueue};

/// Connection type handed out by a [`Pool`] over driver `D`.
pub type PooledConnection<D> = Connection<<D as Driver>::Handle>;

/// A bounded pool of connections.
///
/// Cloning is cheap; clones share the same pool.
///
/// # Example
///
/// ```rust,ignore
/// use tidepool_pool::{Pool, PoolConfig};
///
/// let pool = Pool::builder(driver)
///     .connection_info(info)
///     .capacity(1)
///     .queue_capacity(10)
///     .idle_timeout(Duration::from_secs(60))
///     .build()?;
///
/// let conn = pool
///     .acquire(&executor, Duration::from_secs(1), Duration::from_secs(1))
///     .await?;
/// // Use connection...
/// pool.release(conn)?;
/// ```
pub struct Pool<D: Driver> {
    inner: Arc<PoolInner<D>>,
}

impl<D: Driver> Clone for Pool<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

pub(crate) struct PoolInner<D: Driver> {
    /// Weak self-reference handed to leases, reservations and the sweeper.
    this: Weak<PoolInner<D>>,

    driver: D,

    info: ConnectionInfo,

    config: PoolConfig,

    /// Executor the idle sweeper runs on.
    executor: Handle,

    /// Whether the pool is closed.
    closed: AtomicBool,

    /// When the pool was created.
    created_at: Instant,

    state: Mutex<PoolState<D>>,

    /// Pool metrics.
    metrics: Mutex<PoolMetricsInner>,
}

/// Everything guarded by the pool lock.
pub(crate) struct PoolState<D: Driver> {
    /// Idle connections, least recently used first.
    idle: Vec<PooledConnection<D>>,
    /// Connections currently held by callers.
    leased: HashSet<ConnectionId>,
    /// Slots reserved for handshakes in progress.
    pub(crate) connecting: u32,
    waiters: WaitQueue<D>,
    /// Whether an idle sweeper task is alive.
    sweeper_armed: bool,
}

impl<D: Driver> PoolState<D> {
    fn new() -> Self {
        Self {
            idle: Vec::new(),
            leased: HashSet::new(),
            connecting: 0,
            waiters: WaitQueue::default(),
            sweeper_armed: false,
        }
    }

    /// Slots in use: idle, leased and connecting.
    fn total(&self) -> u32 {
        self.idle.len() as u32 + self.leased.len() as u32 + self.connecting
    }
}

/// Internal metrics tracking.
#[derive(Debug, Default)]
struct PoolMetricsInner {
    /// Total connections created.
    connections_created: u64,
    /// Total connections closed.
    connections_closed: u64,
    /// Total successful checkouts.
    checkouts_successful: u64,
    /// Total failed checkouts (timeouts, overflow, errors).
    checkouts_failed: u64,
    /// Idle connections closed by the sweeper.
    idle_evictions: u64,
    /// Acquisitions that had to queue.
    waits_queued: u64,
    /// Queued acquisitions that hit the queue timeout.
    waits_timed_out: u64,
    /// Acquisitions rejected because the queue was full.
    overflows: u64,
    /// Releases of connections the pool had not leased.
    rejected_releases: u64,
}

enum Checkout<'a, D: Driver> {
    Idle(PooledConnection<D>),
    Connect(SlotReservation<D>),
    Wait(Waiting<'a, D>),
}

/// A queued acquisition. Dropping it unlinks the waiter, or gives back
/// whatever was granted after the caller stopped listening.
struct Waiting<'a, D: Driver> {
    pool: &'a PoolInner<D>,
    id: u64,
    deadline: Instant,
    timeout: Duration,
    rx: oneshot::Receiver<Grant<D>>,
}

impl<D: Driver> Drop for Waiting<'_, D> {
    fn drop(&mut self) {
        if self.pool.state.lock().waiters.remove(self.id) {
            tracing::trace!(waiter = self.id, "abandoned waiter unlinked");
            return;
        }

        // Already served: anything sent is sitting in the channel.
        self.rx.close();
        match self.rx.try_recv() {
            Ok(Grant::Ready(conn)) => {
                let id = conn.id().get();
                if let Err(e) = self.pool.release(conn) {
                    tracing::warn!(
                        connection_id = id,
                        error = %e,
                        "could not take back a connection granted to a dropped waiter"
                    );
                }
            }
            Ok(Grant::Slot(slot)) => drop(slot),
            Err(_) => {}
        }
    }
}

impl<D: Driver> Pool<D> {
    /// Create a new pool builder.
    #[must_use]
    pub fn builder(driver: D) -> PoolBuilder<D> {
        PoolBuilder::new(driver)
    }

    /// Create a new pool.
    ///
    /// `executor` runs the idle sweeper. For more control over pool
    /// creation, use [`Pool::builder()`].
    pub fn new(
        driver: D,
        info: ConnectionInfo,
        config: PoolConfig,
        executor: Handle,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        tracing::info!(
            capacity = config.capacity,
            queue_capacity = config.queue_capacity,
            idle_timeout_ms = config.idle_timeout.as_millis() as u64,
            address = %info.address(),
            "connection pool created"
        );

        let inner = Arc::new_cyclic(|this| PoolInner {
            this: this.clone(),
            driver,
            info,
            config,
            executor,
            closed: AtomicBool::new(false),
            created_at: Instant::now(),
            state: Mutex::new(PoolState::new()),
            metrics: Mutex::new(PoolMetricsInner::default()),
        });

        Ok(Self { inner })
    }

    /// Get a connection from the pool.
    ///
    /// Reuses the most recently used idle connection if there is a healthy
    /// one, opens a new connection (bounded by `connect_timeout`) if the pool
    /// is below capacity, or queues (bounded by `queue_timeout`) if the
    /// queue has room. Fails immediately with
    /// [`PoolError::PoolOverflow`] otherwise.
    ///
    /// The connection's work is scheduled on `executor`.
    pub async fn acquire(
        &self,
        executor: &Handle,
        connect_timeout: Duration,
        queue_timeout: Duration,
    ) -> Result<PooledConnection<D>, PoolError> {
        let result = self
            .inner
            .acquire(executor, connect_timeout, queue_timeout)
            .await;

        let mut metrics = self.inner.metrics.lock();
        match &result {
            Ok(_) => metrics.checkouts_successful += 1,
            Err(_) => metrics.checkouts_failed += 1,
        }
        result
    }

    /// Take an idle connection without waiting or connecting.
    ///
    /// Returns `None` if no healthy idle connection is available.
    pub fn try_acquire(&self, executor: &Handle) -> Result<Option<PooledConnection<D>>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        let mut stale = Vec::new();
        let conn = {
            let mut state = self.inner.state.lock();
            self.inner.take_idle(&mut state, &mut stale)
        };
        self.inner.discard(stale);

        Ok(conn.map(|conn| {
            self.inner.metrics.lock().checkouts_successful += 1;
            self.inner.lease(conn, executor)
        }))
    }

    /// Give a connection back.
    ///
    /// Bad connections are closed and their slot freed; healthy ones go to
    /// the oldest waiter, or to the idle set if nobody is waiting.
    /// Connections this pool has not leased are rejected and left alone.
    pub fn release(&self, conn: PooledConnection<D>) -> Result<Checkin, PoolError> {
        self.inner.release(conn)
    }

    /// Build a [`Connector`] binding this pool to an executor and timeouts.
    #[must_use]
    pub fn connector(&self, executor: Handle, timeouts: Timeouts) -> Connector<D> {
        Connector::new(self.clone(), executor, timeouts)
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            available: state.idle.len() as u32,
            in_use: state.leased.len() as u32,
            connecting: state.connecting,
            waiting: state.waiters.len() as u32,
            total: state.total(),
            max: self.inner.config.capacity,
        }
    }

    /// Get pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            idle_evictions: inner.idle_evictions,
            waits_queued: inner.waits_queued,
            waits_timed_out: inner.waits_timed_out,
            overflows: inner.overflows,
            rejected_releases: inner.rejected_releases,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Close the pool.
    ///
    /// Queued acquisitions fail with [`PoolError::PoolClosed`], idle
    /// connections are closed, and leased connections are closed when they
    /// come back.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let (idle, waiters) = {
            let mut state = self.inner.state.lock();
            (std::mem::take(&mut state.idle), state.waiters.drain())
        };

        let failed = waiters.len();
        drop(waiters);
        let closed = idle.len();
        self.inner.discard(idle);

        tracing::info!(
            idle_closed = closed,
            waiters_failed = failed,
            "connection pool closed"
        );
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Connection target of this pool.
    #[must_use]
    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.inner.info
    }
}

impl<D: Driver> PoolInner<D> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn acquire(
        &self,
        executor: &Handle,
        connect_timeout: Duration,
        queue_timeout: Duration,
    ) -> Result<PooledConnection<D>, PoolError> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        tracing::trace!("acquiring connection from pool");

        match self.checkout(queue_timeout)? {
            Checkout::Idle(conn) => Ok(self.lease(conn, executor)),
            Checkout::Connect(slot) => self.open(slot, executor, connect_timeout).await,
            Checkout::Wait(waiting) => self.wait(waiting, executor, connect_timeout).await,
        }
    }

    /// Decide, under the lock, how this acquisition will be served.
    fn checkout(&self, queue_timeout: Duration) -> Result<Checkout<'_, D>, PoolError> {
        let mut stale = Vec::new();
        let decision = {
            let mut state = self.state.lock();

            if let Some(conn) = self.take_idle(&mut state, &mut stale) {
                Ok(Checkout::Idle(conn))
            } else if state.total() < self.config.capacity {
                state.connecting += 1;
                Ok(Checkout::Connect(SlotReservation::new(self.this.clone())))
            } else if (state.waiters.len() as u32) < self.config.queue_capacity {
                let (id, rx) = state.waiters.push();
                Ok(Checkout::Wait(Waiting {
                    pool: self,
                    id,
                    deadline: deadline_after(queue_timeout),
                    timeout: queue_timeout,
                    rx,
                }))
            } else {
                Err(PoolError::PoolOverflow {
                    queue_capacity: self.config.queue_capacity,
                })
            }
        };
        self.discard(stale);

        if decision.is_err() {
            self.metrics.lock().overflows += 1;
            tracing::debug!(
                queue_capacity = self.config.queue_capacity,
                "connection pool overflow"
            );
        }
        decision
    }

    /// Pop the most recently used healthy idle connection, moving broken
    /// ones into `stale`.
    fn take_idle(
        &self,
        state: &mut PoolState<D>,
        stale: &mut Vec<PooledConnection<D>>,
    ) -> Option<PooledConnection<D>> {
        while let Some(conn) = state.idle.pop() {
            if conn.is_bad() {
                stale.push(conn);
                continue;
            }
            state.leased.insert(conn.id());
            return Some(conn);
        }
        None
    }

    /// Open a new connection on a reserved slot.
    async fn open(
        &self,
        slot: SlotReservation<D>,
        executor: &Handle,
        connect_timeout: Duration,
    ) -> Result<PooledConnection<D>, PoolError> {
        // The connection string can only tighten the caller's bound.
        let connect_timeout = match self.info.connect_timeout {
            Some(limit) if !limit.is_zero() => connect_timeout.min(limit),
            _ => connect_timeout,
        };
        tracing::debug!(
            address = %self.info.address(),
            timeout = ?connect_timeout,
            "opening new connection"
        );

        let connecting = tokio::time::timeout(connect_timeout, self.driver.connect(&self.info));
        let handle = match connecting.await {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "connect failed");
                return Err(PoolError::Connect(e));
            }
            Err(_) => {
                tracing::debug!(timeout = ?connect_timeout, "connect timed out");
                return Err(PoolError::ConnectTimeout {
                    timeout: connect_timeout,
                });
            }
        };

        let mut conn = Connection::new(handle, Strand::new(executor.clone()));
        self.metrics.lock().connections_created += 1;

        {
            let mut state = self.state.lock();
            slot.settle(&mut state);
            if self.is_closed() {
                drop(state);
                conn.close();
                self.metrics.lock().connections_closed += 1;
                return Err(PoolError::PoolClosed);
            }
            state.leased.insert(conn.id());
        }

        tracing::debug!(connection_id = conn.id().get(), "connection established");
        Ok(self.lease(conn, executor))
    }

    /// Wait in the queue for a connection or a slot.
    async fn wait(
        &self,
        mut waiting: Waiting<'_, D>,
        executor: &Handle,
        connect_timeout: Duration,
    ) -> Result<PooledConnection<D>, PoolError> {
        self.metrics.lock().waits_queued += 1;
        tracing::trace!(waiter = waiting.id, "waiting for a free connection");

        let grant = match tokio::time::timeout_at(waiting.deadline, &mut waiting.rx).await {
            Ok(Ok(grant)) => grant,
            // The sender only goes away when the pool is closed.
            Ok(Err(_)) => return Err(PoolError::PoolClosed),
            Err(_) => {
                self.metrics.lock().waits_timed_out += 1;
                tracing::debug!(timeout = ?waiting.timeout, "queue wait timed out");
                return Err(PoolError::QueueTimeout {
                    timeout: waiting.timeout,
                });
            }
        };
        drop(waiting);

        match grant {
            Grant::Ready(conn) => Ok(self.lease(conn, executor)),
            Grant::Slot(slot) => self.open(slot, executor, connect_timeout).await,
        }
    }

    /// Finish handing a connection (already counted as leased) to a caller.
    fn lease(&self, mut conn: PooledConnection<D>, executor: &Handle) -> PooledConnection<D> {
        conn.rebind(executor.clone());
        conn.set_state(ConnectionState::Leased);
        conn.touch(Instant::now());

        let holder: Weak<dyn LeaseHolder> = self.this.clone();
        conn.install_lease(Lease::new(conn.id(), holder));

        tracing::trace!(connection_id = conn.id().get(), "connection leased");
        conn
    }

    fn release(&self, mut conn: PooledConnection<D>) -> Result<Checkin, PoolError> {
        let id = conn.id();
        let mut state = self.state.lock();

        if !state.leased.remove(&id) {
            drop(state);
            self.metrics.lock().rejected_releases += 1;
            tracing::warn!(
                connection_id = id.get(),
                "rejected release of a connection this pool has not leased"
            );
            return Err(PoolError::NotLeased { id });
        }

        if let Some(lease) = conn.take_lease() {
            lease.disarm();
        }
        conn.touch(Instant::now());

        if self.is_closed() || conn.is_bad() {
            conn.close();
            if !self.is_closed() {
                self.hand_off_slot(&mut state);
            }
            drop(state);

            self.metrics.lock().connections_closed += 1;
            tracing::debug!(connection_id = id.get(), "closed connection on release");
            return Ok(Checkin::Closed);
        }

        let mut grant = Grant::Ready(conn);
        while let Some(waiter) = state.waiters.pop_front() {
            state.leased.insert(id);
            let waited = waiter.enqueued_at().elapsed();
            match waiter.offer(grant) {
                Ok(()) => {
                    tracing::trace!(
                        connection_id = id.get(),
                        waited_ms = waited.as_millis() as u64,
                        "connection handed to waiter"
                    );
                    return Ok(Checkin::HandedOff);
                }
                Err(back) => {
                    state.leased.remove(&id);
                    grant = back;
                }
            }
        }
        self.keep(&mut state, grant);

        tracing::trace!(connection_id = id.get(), "connection returned to idle set");
        Ok(Checkin::Idle)
    }

    /// Offer a freed slot to the oldest waiter still listening.
    fn hand_off_slot(&self, state: &mut PoolState<D>) {
        if state.waiters.is_empty() {
            return;
        }
        while let Some(waiter) = state.waiters.pop_front() {
            state.connecting += 1;
            match waiter.offer(Grant::Slot(SlotReservation::new(self.this.clone()))) {
                Ok(()) => return,
                Err(back) => self.keep(state, back),
            }
        }
    }

    /// Take back a grant no waiter accepted.
    fn keep(&self, state: &mut PoolState<D>, grant: Grant<D>) {
        match grant {
            Grant::Ready(mut conn) => {
                conn.set_state(ConnectionState::Idle);
                state.idle.push(conn);
                self.arm_sweeper(state);
            }
            Grant::Slot(slot) => slot.settle(state),
        }
    }

    /// Give back a reserved slot that never became a connection.
    pub(crate) fn release_slot(&self) {
        let mut state = self.state.lock();
        state.connecting = state.connecting.saturating_sub(1);
        if !self.is_closed() {
            self.hand_off_slot(&mut state);
        }
    }

    /// Close connections outside the pool lock.
    fn discard(&self, conns: Vec<PooledConnection<D>>) {
        if conns.is_empty() {
            return;
        }
        let count = conns.len() as u64;
        for mut conn in conns {
            conn.close();
        }
        self.metrics.lock().connections_closed += count;
    }

    fn arm_sweeper(&self, state: &mut PoolState<D>) {
        if !self.config.evicts_idle() || state.sweeper_armed || self.is_closed() {
            return;
        }
        state.sweeper_armed = true;
        self.executor.spawn(sweep::run(self.this.clone()));
    }

    /// When the next idle connection expires, or `None` (disarming the
    /// sweeper) if there is nothing left to evict.
    pub(crate) fn next_expiry(&self) -> Option<Instant> {
        let mut state = self.state.lock();
        let oldest = state.idle.iter().map(Connection::last_used).min();
        match oldest {
            Some(last_used) if !self.is_closed() => Some(last_used + self.config.idle_timeout),
            _ => {
                state.sweeper_armed = false;
                None
            }
        }
    }

    /// Close idle connections unused for at least the idle timeout.
    pub(crate) fn evict_idle(&self, now: Instant) -> usize {
        let timeout = self.config.idle_timeout;
        let expired: Vec<_> = {
            let mut state = self.state.lock();
            let (expired, kept) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|conn| conn.idle_for(now) >= timeout);
            state.idle = kept;
            expired
        };

        let evicted = expired.len();
        if evicted > 0 {
            self.metrics.lock().idle_evictions += evicted as u64;
            self.discard(expired);
            tracing::debug!(evicted, "evicted idle connections");
        }
        evicted
    }
}

impl<D: Driver> LeaseHolder for PoolInner<D> {
    fn reclaim(&self, id: ConnectionId) {
        let mut state = self.state.lock();
        if !state.leased.remove(&id) {
            return;
        }
        if !self.is_closed() {
            self.hand_off_slot(&mut state);
        }
        drop(state);
        self.metrics.lock().connections_closed += 1;
    }
}

/// `now + after`, saturating far in the future.
fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365))
}

/// Builder for creating a connection pool.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::builder(driver)
///     .connection_info(info)
///     .pool_config(pool_config)
///     .build()?;
/// ```
pub struct PoolBuilder<D: Driver> {
    driver: D,
    info: ConnectionInfo,
    pool_config: PoolConfig,
    executor: Option<Handle>,
}

impl<D: Driver> PoolBuilder<D> {
    /// Create a new pool builder with default settings.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            info: ConnectionInfo::default(),
            pool_config: PoolConfig::default(),
            executor: None,
        }
    }

    /// Set the connection target.
    #[must_use]
    pub fn connection_info(mut self, info: ConnectionInfo) -> Self {
        self.info = info;
        self
    }

    /// Set the pool configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Set the maximum number of open connections.
    #[must_use]
    pub fn capacity(mut self, capacity: u32) -> Self {
        self.pool_config.capacity = capacity;
        self
    }

    /// Set the maximum number of queued acquisitions.
    #[must_use]
    pub fn queue_capacity(mut self, queue_capacity: u32) -> Self {
        self.pool_config.queue_capacity = queue_capacity;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.idle_timeout = timeout;
        self
    }

    /// Set the executor the idle sweeper runs on.
    ///
    /// Defaults to the runtime `build` is called from.
    #[must_use]
    pub fn executor(mut self, executor: Handle) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Build the pool.
    pub fn build(self) -> Result<Pool<D>, PoolError> {
        let executor = match self.executor {
            Some(executor) => executor,
            None => Handle::try_current().map_err(|_| {
                PoolError::Config("no tokio runtime to run the pool on; set an executor".into())
            })?,
        };
        Pool::new(self.driver, self.info, self.pool_config, executor)
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently in use.
    pub in_use: u32,
    /// Number of handshakes in progress.
    pub connecting: u32,
    /// Number of queued acquisitions.
    pub waiting: u32,
    /// Total number of occupied slots.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

impl PoolStatus {
    /// Calculate the utilization percentage.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max as f64) * 100.0
    }

    /// Check if the pool is at capacity.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.total >= self.max
    }
}

/// Metrics collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Total connections created since pool start.
    pub connections_created: u64,
    /// Total connections closed since pool start.
    pub connections_closed: u64,
    /// Successful connection checkouts.
    pub checkouts_successful: u64,
    /// Failed connection checkouts (timeouts, overflow, pool closed, etc.).
    pub checkouts_failed: u64,
    /// Idle connections closed by the sweeper.
    pub idle_evictions: u64,
    /// Acquisitions that had to queue.
    pub waits_queued: u64,
    /// Queued acquisitions that timed out.
    pub waits_timed_out: u64,
    /// Acquisitions rejected with a full queue.
    pub overflows: u64,
    /// Releases rejected because the connection was not leased.
    pub rejected_releases: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Calculate checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidepool_testing::MockDriver;

    fn pool(capacity: u32, queue_capacity: u32) -> (Pool<MockDriver>, MockDriver) {
        let driver = MockDriver::new();
        let pool = Pool::builder(driver.clone())
            .capacity(capacity)
            .queue_capacity(queue_capacity)
            .idle_timeout(Duration::from_secs(60))
            .build()
            .unwrap();
        (pool, driver)
    }

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn test_pool_status_utilization() {
        let status = PoolStatus {
            available: 5,
            in_use: 5,
            connecting: 0,
            waiting: 0,
            total: 10,
            max: 20,
        };
        assert!((status.utilization() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_status_at_capacity() {
        let status = PoolStatus {
            available: 0,
            in_use: 9,
            connecting: 1,
            waiting: 3,
            total: 10,
            max: 10,
        };
        assert!(status.is_at_capacity());

        let status2 = PoolStatus {
            available: 5,
            in_use: 5,
            connecting: 0,
            waiting: 0,
            total: 10,
            max: 20,
        };
        assert!(!status2.is_at_capacity());
    }

    #[test]
    fn test_pool_metrics_success_rate() {
        let metrics = PoolMetrics {
            connections_created: 10,
            connections_closed: 2,
            checkouts_successful: 90,
            checkouts_failed: 10,
            idle_evictions: 1,
            waits_queued: 4,
            waits_timed_out: 1,
            overflows: 0,
            rejected_releases: 0,
            uptime: Duration::from_secs(3600),
        };

        assert!((metrics.checkout_success_rate() - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_builder_requires_runtime() {
        let err = Pool::builder(MockDriver::new()).build().err().unwrap();
        assert!(matches!(err, PoolError::Config(_)));
    }

    #[tokio::test]
    async fn test_builder_rejects_zero_capacity() {
        let err = Pool::builder(MockDriver::new())
            .capacity(0)
            .build()
            .err()
            .unwrap();
        assert_eq!(err.code(), "invalid_config");
    }

    #[tokio::test]
    async fn test_idle_reuse_is_lifo() {
        let (pool, driver) = pool(3, 0);
        let executor = Handle::current();

        let a = pool.acquire(&executor, SECOND, SECOND).await.unwrap();
        let b = pool.acquire(&executor, SECOND, SECOND).await.unwrap();
        let (a_id, b_id) = (a.id(), b.id());

        assert_eq!(pool.release(a).unwrap(), Checkin::Idle);
        assert_eq!(pool.release(b).unwrap(), Checkin::Idle);

        let next = pool.try_acquire(&executor).unwrap().unwrap();
        assert_eq!(next.id(), b_id);
        let next2 = pool.acquire(&executor, SECOND, SECOND).await.unwrap();
        assert_eq!(next2.id(), a_id);
        assert_eq!(driver.connects(), 2);
    }

    #[tokio::test]
    async fn test_broken_idle_connection_is_skipped() {
        let (pool, driver) = pool(2, 0);
        let executor = Handle::current();

        let conn = pool.acquire(&executor, SECOND, SECOND).await.unwrap();
        let broken_id = conn.id();
        assert_eq!(pool.release(conn).unwrap(), Checkin::Idle);

        // Breakage is only noticed at checkout time.
        pool.inner.state.lock().idle[0]
            .handle()
            .unwrap()
            .break_session();

        let fresh = pool.acquire(&executor, SECOND, SECOND).await.unwrap();
        assert_ne!(fresh.id(), broken_id);
        assert_eq!(driver.connects(), 2);
        assert_eq!(driver.open_sessions(), 1);
        assert_eq!(pool.status().total, 1);
    }

    #[tokio::test]
    async fn test_bad_release_closes_connection() {
        let (pool, driver) = pool(1, 0);
        let executor = Handle::current();

        let mut conn = pool.acquire(&executor, SECOND, SECOND).await.unwrap();
        conn.mark_bad();
        assert_eq!(pool.release(conn).unwrap(), Checkin::Closed);

        assert_eq!(driver.open_sessions(), 0);
        let status = pool.status();
        assert_eq!((status.available, status.in_use, status.total), (0, 0, 0));
        assert_eq!(pool.metrics().connections_closed, 1);
    }

    #[tokio::test]
    async fn test_dropped_connection_frees_slot() {
        let (pool, driver) = pool(1, 0);
        let executor = Handle::current();

        let conn = pool.acquire(&executor, SECOND, SECOND).await.unwrap();
        assert!(pool.status().is_at_capacity());
        drop(conn);

        assert_eq!(pool.status().total, 0);
        assert_eq!(driver.open_sessions(), 0);
        assert!(pool.acquire(&executor, SECOND, SECOND).await.is_ok());
    }

    #[tokio::test]
    async fn test_release_to_other_pool_rejected() {
        let (first, _) = pool(1, 0);
        let (second, _) = pool(1, 0);
        let executor = Handle::current();

        let conn = first.acquire(&executor, SECOND, SECOND).await.unwrap();
        let id = conn.id();
        let err = second.release(conn).unwrap_err();
        assert!(matches!(err, PoolError::NotLeased { id: rejected } if rejected == id));

        assert_eq!(second.status().total, 0);
        assert_eq!(second.metrics().rejected_releases, 1);
        // The rejected connection was dropped; its own pool got the slot back.
        assert_eq!(first.status().total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_string_timeout_caps_handshake() {
        let driver = MockDriver::new();
        driver.set_connect_delay(Duration::from_secs(5));
        let info = ConnectionInfo::from_connection_string("host=db connect_timeout=1").unwrap();
        let pool = Pool::builder(driver.clone())
            .capacity(1)
            .connection_info(info)
            .build()
            .unwrap();
        let executor = Handle::current();

        let started = Instant::now();
        let err = pool
            .acquire(&executor, Duration::from_secs(30), SECOND)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PoolError::ConnectTimeout { timeout } if timeout == SECOND));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(pool.status().total, 0);

        // A tighter caller bound still wins.
        let err = pool
            .acquire(&executor, Duration::from_millis(200), SECOND)
            .await
            .err()
            .unwrap();
        assert!(
            matches!(err, PoolError::ConnectTimeout { timeout } if timeout == Duration::from_millis(200))
        );
    }
}
