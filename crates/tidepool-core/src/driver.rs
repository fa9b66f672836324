//! Driver capability traits.
//!
//! The wire protocol lives behind these traits. A driver opens native
//! sessions; each native session can report whether it is broken and can
//! hand out a cancel token that reaches the server over a channel
//! independent of normal query traffic.

use async_trait::async_trait;

use crate::error::Result;
use crate::info::ConnectionInfo;

/// Opens native sessions to the backend.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Native session type produced by this driver.
    type Handle: NativeConnection;

    /// Establish a new session (TCP connect, startup, authentication).
    async fn connect(&self, info: &ConnectionInfo) -> Result<Self::Handle>;
}

/// A native session owned by exactly one party at a time.
///
/// Dropping the handle closes the session.
pub trait NativeConnection: Send + 'static {
    /// Token type used to cancel the operation in flight on this session.
    type CancelToken: CancelToken;

    /// Whether the session is known to be broken.
    fn is_bad(&self) -> bool;

    /// Obtain a cancel token for the operation currently in flight.
    fn cancel_token(&self) -> Self::CancelToken;
}

/// Out-of-band cancellation channel for one native session.
#[async_trait]
pub trait CancelToken: Send + Sync + 'static {
    /// Ask the server to abort the current operation.
    ///
    /// Success means the request was delivered, not that the operation was
    /// actually interrupted.
    async fn send_cancel(&self) -> Result<()>;
}
