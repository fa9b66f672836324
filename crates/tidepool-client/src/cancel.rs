//! Timeout-bounded cancellation of an in-flight operation.
//!
//! [`cancel`] sends the driver's native cancel request on its own task
//! and races the acknowledgment against a timer armed on the connection's
//! strand. Both racers share a context that holds the connection.
//! Whichever racer moves the phase out of `Issued` first takes the
//! connection and publishes the outcome; the other finds the phase already
//! claimed and only drops its reference. A timeout also aborts the
//! request task, so nothing outlives the cancel.
//!
//! ```text
//! Idle -> Issued -> Acked    -> Done
//!                -> TimedOut -> Done
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use tidepool_core::{CancelToken, Connection, ConnectionState, DriverError, NativeConnection};

use crate::error::CancelError;

/// Outcome of a cancel, paired with the connection it ran on.
pub type CancelOutcome<H> = (Result<(), CancelError>, Connection<H>);

/// Progress of a cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CancelPhase {
    /// Nothing issued yet.
    Idle = 0,
    /// Native cancel sent, timer armed.
    Issued = 1,
    /// The driver acknowledged first.
    Acked = 2,
    /// The timer fired first.
    TimedOut = 3,
    /// The outcome has been delivered.
    Done = 4,
}

impl CancelPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Issued,
            2 => Self::Acked,
            3 => Self::TimedOut,
            4 => Self::Done,
            _ => Self::Idle,
        }
    }
}

/// State shared by the request task, the timeout handler and the caller.
struct CancelContext<H: NativeConnection> {
    phase: AtomicU8,
    timeout: Option<Duration>,
    pending: Mutex<Option<Connection<H>>>,
    request: Mutex<Option<AbortHandle>>,
    outcome: Mutex<Option<CancelOutcome<H>>>,
    done: Notify,
}

impl<H: NativeConnection> CancelContext<H> {
    fn new(timeout: Option<Duration>) -> Self {
        Self {
            phase: AtomicU8::new(CancelPhase::Issued as u8),
            timeout,
            pending: Mutex::new(None),
            request: Mutex::new(None),
            outcome: Mutex::new(None),
            done: Notify::new(),
        }
    }

    fn phase(&self) -> CancelPhase {
        CancelPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Claim the connection for `winner`. `None` if another racer already
    /// has it.
    fn claim(&self, winner: CancelPhase) -> Option<Connection<H>> {
        self.phase
            .compare_exchange(
                CancelPhase::Issued as u8,
                winner as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()?;
        self.pending.lock().take()
    }

    fn deliver(&self, conn: Connection<H>, result: Result<(), CancelError>) {
        self.phase.store(CancelPhase::Done as u8, Ordering::Release);
        *self.outcome.lock() = Some((result, conn));
        self.done.notify_one();
    }

    fn take_outcome(&self) -> Option<CancelOutcome<H>> {
        self.outcome.lock().take()
    }

    async fn wait(&self) -> CancelOutcome<H> {
        loop {
            if let Some(outcome) = self.take_outcome() {
                return outcome;
            }
            self.done.notified().await;
        }
    }

    /// The driver answered the cancel request.
    fn acknowledge(&self, result: Result<(), DriverError>) {
        let Some(mut conn) = self.claim(CancelPhase::Acked) else {
            tracing::debug!(
                phase = ?self.phase(),
                ok = result.is_ok(),
                "late cancel acknowledgment ignored"
            );
            return;
        };
        // Running inside the request task itself.
        self.request.lock().take();

        conn.timer_mut().disarm();
        conn.set_state(ConnectionState::Leased);

        let result = match result {
            Ok(()) => {
                tracing::debug!(connection_id = conn.id().get(), "cancel acknowledged");
                Ok(())
            }
            Err(e) => {
                tracing::debug!(connection_id = conn.id().get(), error = %e, "cancel failed");
                conn.set_error_context(format!("cancel request failed: {e}"));
                Err(CancelError::Native(e))
            }
        };
        self.deliver(conn, result);
    }

    /// The timer fired before the acknowledgment.
    fn expire(&self) {
        let Some(mut conn) = self.claim(CancelPhase::TimedOut) else {
            return;
        };
        let timeout = self.timeout.unwrap_or_default();

        // Running inside the timer's own task.
        conn.timer_mut().clear();
        conn.mark_bad();
        conn.set_error_context(format!(
            "cancel request not acknowledged within {timeout:?}; server state unknown"
        ));
        tracing::warn!(
            connection_id = conn.id().get(),
            timeout_ms = timeout.as_millis() as u64,
            "cancel timed out, connection marked bad"
        );

        if let Some(request) = self.request.lock().take() {
            request.abort();
        }
        self.deliver(conn, Err(CancelError::Timeout { timeout }));
    }

    /// The request task went away without an answer.
    fn abandon(&self) {
        let Some(mut conn) = self.claim(CancelPhase::Done) else {
            return;
        };
        conn.timer_mut().disarm();
        conn.mark_bad();
        conn.set_error_context("cancel request abandoned before completion");
        tracing::warn!(
            connection_id = conn.id().get(),
            "cancel request dropped unanswered, connection marked bad"
        );
        self.deliver(conn, Err(CancelError::Abandoned));
    }
}

/// Owned by the request task; completes the cancel as abandoned if the
/// task is dropped before the driver answers.
struct Acknowledger<H: NativeConnection> {
    context: Arc<CancelContext<H>>,
}

impl<H: NativeConnection> Drop for Acknowledger<H> {
    fn drop(&mut self) {
        self.context.abandon();
    }
}

/// Cancel the operation in flight on `conn`, giving up after `timeout`.
///
/// The native cancel request runs on the connection's executor. Exactly one
/// outcome is returned:
///
/// - the driver's own result if it answers within `timeout`; the
///   connection stays usable
/// - [`CancelError::Timeout`] otherwise; the connection is marked bad and
///   the unanswered request is aborted
///
/// On every error path the connection's error context is set before this
/// returns.
pub async fn cancel<H: NativeConnection>(
    conn: Connection<H>,
    timeout: Duration,
) -> CancelOutcome<H> {
    let executor = conn.executor().clone();
    issue(conn, &executor, Some(timeout)).await
}

/// Like [`cancel`], but sends the native cancel request from `executor`.
///
/// The timeout handler and the completion still run on the connection's
/// strand.
pub async fn cancel_on<H: NativeConnection>(
    conn: Connection<H>,
    executor: &Handle,
    timeout: Duration,
) -> CancelOutcome<H> {
    issue(conn, executor, Some(timeout)).await
}

/// Cancel the operation in flight on `conn` without a timeout.
///
/// Completes with the driver's own result, however long it takes.
pub async fn cancel_unbounded<H: NativeConnection>(conn: Connection<H>) -> CancelOutcome<H> {
    let executor = conn.executor().clone();
    issue(conn, &executor, None).await
}

async fn issue<H: NativeConnection>(
    mut conn: Connection<H>,
    executor: &Handle,
    timeout: Option<Duration>,
) -> CancelOutcome<H> {
    let Some(token) = conn.cancel_token() else {
        conn.set_error_context("cancel requested on a closed connection");
        return (Err(CancelError::Native(DriverError::ConnectionClosed)), conn);
    };

    let connection_id = conn.id().get();
    let strand = conn.strand().clone();
    conn.set_state(ConnectionState::CancelIssued);

    let context = Arc::new(CancelContext::new(timeout));
    {
        // Racers claim through `pending`, so neither can complete before
        // the timer and the request task are both installed.
        let mut pending = context.pending.lock();

        if let Some(after) = timeout {
            let racer = context.clone();
            conn.timer_mut()
                .arm(&strand, after, async move { racer.expire() });
        }

        let acknowledger = Acknowledger {
            context: context.clone(),
        };
        let domain = strand.clone();
        let request = executor.spawn(async move {
            let result = token.send_cancel().await;
            domain
                .run(async { acknowledger.context.acknowledge(result) })
                .await;
        });
        *context.request.lock() = Some(request.abort_handle());
        *pending = Some(conn);
    }

    tracing::debug!(connection_id, timeout = ?timeout, "cancel issued");
    context.wait().await
}
