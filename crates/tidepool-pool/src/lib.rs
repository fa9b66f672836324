//! # tidepool-pool
//!
//! Bounded connection pool with FIFO waiters and idle eviction.
//!
//! ## Features
//!
//! - Hard capacity: idle, leased and connecting connections together never
//!   exceed `capacity`
//! - Most-recently-used idle reuse with liveness check on checkout
//! - Bounded FIFO waiter queue; a full queue fails fast with `PoolOverflow`
//! - Separate connect and queue deadlines
//! - Idle sweeper that only runs while idle connections exist
//! - Dropped leases give their slot back to the pool
//! - Metrics and status snapshots for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use tidepool_pool::{Pool, Timeouts};
//! use std::time::Duration;
//!
//! let pool = Pool::builder(driver)
//!     .connection_info(info)
//!     .capacity(1)
//!     .queue_capacity(1)
//!     .idle_timeout(Duration::from_secs(60))
//!     .build()?;
//!
//! let connector = pool.connector(executor, Timeouts::default());
//! let conn = connector.connect().await?;
//! // Use connection...
//! pool.release(conn)?;
//!
//! // Check pool status
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//!
//! // Get metrics
//! let metrics = pool.metrics();
//! println!("Checkout success rate: {:.2}", metrics.checkout_success_rate());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connector;
pub mod error;
pub mod lifecycle;
pub mod pool;
mod sweep;
mod waiter;

// Configuration
pub use config::{PoolConfig, Timeouts};

// Error types
pub use error::PoolError;

// Pool types
pub use connector::Connector;
pub use lifecycle::Checkin;
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus, PooledConnection};
