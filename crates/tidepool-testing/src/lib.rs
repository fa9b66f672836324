//! # tidepool-testing
//!
//! Test infrastructure for the tidepool workspace.
//!
//! [`MockDriver`] is an in-memory driver whose connect and cancel behavior
//! is scripted per test: latencies, handshake failures, cancel failures,
//! and sessions that break mid-flight. Counters expose what the code under
//! test actually did, including how many native sessions are still open.

#![warn(missing_docs)]
#![deny(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tidepool_core::{CancelToken, ConnectionInfo, Driver, DriverError, NativeConnection};

/// Install a test-friendly tracing subscriber.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Default)]
struct Script {
    connect_delay: Duration,
    failing_connects: usize,
    cancel_delay: Duration,
    cancel_failure: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    script: Mutex<Script>,
    next_pid: AtomicU32,
    connect_attempts: AtomicUsize,
    connects: AtomicUsize,
    cancels_sent: AtomicUsize,
    cancels_completed: AtomicUsize,
    open_sessions: AtomicUsize,
    last_cancel_thread: Mutex<Option<String>>,
}

/// Scripted in-memory driver.
///
/// Clones share script and counters.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    /// Driver that connects and cancels instantly.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every handshake by `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.script.lock().connect_delay = delay;
    }

    /// Fail the next `count` handshakes.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.script.lock().failing_connects = count;
    }

    /// Delay every cancel acknowledgment by `delay`.
    pub fn set_cancel_delay(&self, delay: Duration) {
        self.state.script.lock().cancel_delay = delay;
    }

    /// Make cancel requests fail with `message` (or succeed again on `None`).
    pub fn set_cancel_failure(&self, message: Option<&str>) {
        self.state.script.lock().cancel_failure = message.map(str::to_string);
    }

    /// Handshakes started.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// Handshakes that produced a session.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Cancel requests issued.
    #[must_use]
    pub fn cancels_sent(&self) -> usize {
        self.state.cancels_sent.load(Ordering::SeqCst)
    }

    /// Name of the thread the most recent cancel request was sent from.
    #[must_use]
    pub fn last_cancel_thread(&self) -> Option<String> {
        self.state.last_cancel_thread.lock().clone()
    }

    /// Cancel requests that came back (acknowledged or failed).
    #[must_use]
    pub fn cancels_completed(&self) -> usize {
        self.state.cancels_completed.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet dropped.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.state.open_sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Driver for MockDriver {
    type Handle = MockSession;

    async fn connect(&self, info: &ConnectionInfo) -> Result<MockSession, DriverError> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.script.lock().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let mut script = self.state.script.lock();
            if script.failing_connects > 0 {
                script.failing_connects -= 1;
                return Err(DriverError::Handshake(format!(
                    "could not connect to {}",
                    info.address()
                )));
            }
        }

        self.state.connects.fetch_add(1, Ordering::SeqCst);
        self.state.open_sessions.fetch_add(1, Ordering::SeqCst);
        let pid = self.state.next_pid.fetch_add(1, Ordering::SeqCst) + 1000;
        tracing::trace!(pid, "mock session opened");

        Ok(MockSession {
            pid,
            broken: Arc::new(AtomicBool::new(false)),
            state: self.state.clone(),
        })
    }
}

/// Native session produced by [`MockDriver`].
#[derive(Debug)]
pub struct MockSession {
    pid: u32,
    broken: Arc<AtomicBool>,
    state: Arc<MockState>,
}

impl MockSession {
    /// Backend process id of this session.
    #[must_use]
    pub fn backend_pid(&self) -> u32 {
        self.pid
    }

    /// Simulate the server dropping the session.
    pub fn break_session(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Simulate a query running for `duration`, returning the backend pid.
    pub async fn query(&mut self, duration: Duration) -> Result<u32, DriverError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(DriverError::ConnectionClosed);
        }
        tokio::time::sleep(duration).await;
        Ok(self.pid)
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.state.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl NativeConnection for MockSession {
    type CancelToken = MockCancelToken;

    fn is_bad(&self) -> bool {
        self.broken.load(Ordering::SeqCst)
    }

    fn cancel_token(&self) -> MockCancelToken {
        MockCancelToken {
            pid: self.pid,
            state: self.state.clone(),
        }
    }
}

/// Cancel channel of a [`MockSession`].
#[derive(Debug, Clone)]
pub struct MockCancelToken {
    pid: u32,
    state: Arc<MockState>,
}

#[async_trait]
impl CancelToken for MockCancelToken {
    async fn send_cancel(&self) -> Result<(), DriverError> {
        self.state.cancels_sent.fetch_add(1, Ordering::SeqCst);
        let thread = std::thread::current().name().map(str::to_string);
        *self.state.last_cancel_thread.lock() = thread;

        let (delay, failure) = {
            let script = self.state.script.lock();
            (script.cancel_delay, script.cancel_failure.clone())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.state.cancels_completed.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(pid = self.pid, "mock cancel completed");

        match failure {
            Some(message) => Err(DriverError::Cancel(message)),
            None => Ok(()),
        }
    }
}
