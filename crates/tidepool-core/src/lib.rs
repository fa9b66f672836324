//! # tidepool-core
//!
//! Driver capability traits and the managed [`Connection`] handle shared by
//! the pool and the cancellation coordinator.
//!
//! The wire protocol itself is out of scope: a driver implements
//! [`Driver`], [`NativeConnection`] and [`CancelToken`], and everything
//! above works in terms of those traits.
//!
//! ## Serialization domains
//!
//! Every connection owns a [`Strand`]: the executor its work is spawned on
//! plus a gate that serializes completion handlers. Timers armed through
//! [`Timer`] run their expiry handler inside the strand, so an operation's
//! completion and its timeout can never interleave.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tidepool_core::{ConnectionInfo, Driver};
//!
//! let info = ConnectionInfo::from_connection_string("host=localhost dbname=test")?;
//! let handle = driver.connect(&info).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod driver;
pub mod error;
pub mod info;
pub mod strand;

pub use connection::{Connection, ConnectionId, ConnectionState, Lease, LeaseHolder};
pub use driver::{CancelToken, Driver, NativeConnection};
pub use error::{DriverError, Result};
pub use info::ConnectionInfo;
pub use strand::{Strand, Timer};
