//! Deadline-bounded execution of driver operations.

use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::time::Instant;

use tidepool_core::{Connection, DriverError, NativeConnection};

use crate::cancel::cancel;
use crate::error::Error;

/// Run `operation` against the native session of `conn`, bounded by
/// `deadline`.
///
/// - On success the connection's error context is cleared.
/// - If the operation fails, its error is recorded in the error context
///   and the connection is marked bad when the failure leaves the session
///   unusable.
/// - If `deadline` passes first, the operation is dropped and the
///   connection cancelled with `cancel_timeout`; [`Error::Timeout`] carries
///   the cancel failure, if any.
///
/// The connection is always handed back, ready to be released to its pool.
///
/// # Example
///
/// ```rust,ignore
/// use futures_util::FutureExt;
///
/// let deadline = Instant::now() + Duration::from_secs(5);
/// let (rows, conn) = execute(conn, deadline, Duration::from_secs(1), |session| {
///     session.query("SELECT 1").boxed()
/// })
/// .await;
/// pool.release(conn)?;
/// ```
pub async fn execute<H, T, F>(
    mut conn: Connection<H>,
    deadline: Instant,
    cancel_timeout: Duration,
    operation: F,
) -> (Result<T, Error>, Connection<H>)
where
    H: NativeConnection,
    F: for<'c> FnOnce(&'c mut H) -> BoxFuture<'c, Result<T, DriverError>>,
{
    let id = conn.id();
    if conn.is_bad() {
        return (Err(Error::BadConnection { id }), conn);
    }
    let Some(session) = conn.handle_mut() else {
        return (Err(Error::BadConnection { id }), conn);
    };

    let outcome = tokio::time::timeout_at(deadline, operation(session)).await;

    match outcome {
        Ok(Ok(value)) => {
            conn.clear_error_context();
            (Ok(value), conn)
        }
        Ok(Err(e)) => {
            conn.set_error_context(e.to_string());
            if e.is_fatal() {
                conn.mark_bad();
            }
            tracing::debug!(
                connection_id = id.get(),
                error = %e,
                fatal = e.is_fatal(),
                "operation failed"
            );
            (Err(Error::Driver(e)), conn)
        }
        Err(_) => {
            tracing::debug!(
                connection_id = id.get(),
                "operation deadline exceeded, cancelling"
            );
            let (cancelled, mut conn) = cancel(conn, cancel_timeout).await;
            if cancelled.is_ok() {
                conn.set_error_context("operation deadline exceeded; cancelled");
            }
            (
                Err(Error::Timeout {
                    cancel: cancelled.err(),
                }),
                conn,
            )
        }
    }
}
