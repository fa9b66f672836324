//! # tidepool-client
//!
//! Pooled connections plus a race-free way to abort an operation that
//! overran its deadline.
//!
//! A caller acquires a connection through a [`Connector`], runs an
//! operation with [`execute`], and releases the connection back to the
//! [`Pool`]. If the operation's deadline passes, [`execute`] hands the
//! connection to [`cancel`], which races the driver's native cancel
//! request against a timer. Exactly one of the two completes; if the timer
//! wins the connection comes back marked bad and the pool closes it on
//! release.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use futures_util::FutureExt;
//! use tidepool_client::{execute, Pool, Timeouts};
//! use tokio::time::Instant;
//!
//! let pool = Pool::builder(driver)
//!     .connection_info(ConnectionInfo::from_connection_string("host=db dbname=app")?)
//!     .capacity(4)
//!     .build()?;
//! let connector = pool.connector(executor, Timeouts::default());
//!
//! let conn = connector.connect().await?;
//! let deadline = Instant::now() + Duration::from_secs(5);
//! let (result, conn) = execute(conn, deadline, Duration::from_secs(1), |session| {
//!     session.query("SELECT pg_sleep(10)").boxed()
//! })
//! .await;
//!
//! if let Err(e) = &result {
//!     eprintln!("{}: {}", e.code(), conn.error_context());
//! }
//! pool.release(conn)?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod cancel;
pub mod error;
pub mod execute;

pub use cancel::{CancelOutcome, CancelPhase, cancel, cancel_on, cancel_unbounded};
pub use error::{CancelError, Error, Result};
pub use execute::execute;

// Re-exports from the lower layers
pub use tidepool_core::{
    CancelToken, Connection, ConnectionId, ConnectionInfo, ConnectionState, Driver, DriverError,
    NativeConnection, Strand, Timer,
};
pub use tidepool_pool::{
    Checkin, Connector, Pool, PoolBuilder, PoolConfig, PoolError, PoolMetrics, PoolStatus,
    PooledConnection, Timeouts,
};
