//! Cancellation and deadline tests over pooled mock connections.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use futures_util::FutureExt;
use tidepool_client::{
    CancelError, Checkin, ConnectionState, Error, Pool, Timeouts, cancel, execute,
};
use tidepool_testing::{MockDriver, init_tracing};
use tokio::runtime::Handle;
use tokio::time::Instant;

fn pool(driver: &MockDriver) -> Pool<MockDriver> {
    init_tracing();
    Pool::builder(driver.clone())
        .capacity(1)
        .queue_capacity(1)
        .idle_timeout(Duration::from_secs(60))
        .build()
        .unwrap()
}

// =============================================================================
// Coordinator races
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_ack_before_timeout_keeps_connection() {
    let driver = MockDriver::new();
    driver.set_cancel_delay(Duration::from_millis(200));
    let pool = pool(&driver);
    let connector = pool.connector(Handle::current(), Timeouts::default());

    let conn = connector.connect().await.unwrap();
    let (result, conn) = cancel(conn, Duration::from_secs(2)).await;

    assert!(result.is_ok());
    assert_eq!(conn.state(), ConnectionState::Leased);
    assert_eq!(driver.cancels_completed(), 1);

    // Past the old timeout: no second completion, nothing fires.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!conn.is_bad());
    assert_eq!(pool.release(conn).unwrap(), Checkin::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_marks_connection_bad_and_pool_closes_it() {
    let driver = MockDriver::new();
    driver.set_cancel_delay(Duration::from_secs(10));
    let pool = pool(&driver);
    let connector = pool.connector(Handle::current(), Timeouts::default());

    let conn = connector.connect().await.unwrap();
    let started = Instant::now();
    let (result, conn) = cancel(conn, Duration::from_secs(1)).await;

    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(1) && waited < Duration::from_secs(2));
    let err = result.unwrap_err();
    assert_eq!(err.code(), "cancel_timeout");
    assert!(conn.is_bad());
    assert!(!conn.error_context().is_empty());

    // The unanswered request was aborted along with the timeout.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(driver.cancels_completed(), 0);
    assert!(conn.is_bad());

    assert_eq!(pool.release(conn).unwrap(), Checkin::Closed);
    assert_eq!(driver.open_sessions(), 0);
    assert_eq!(pool.status().total, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_error_sets_context() {
    let driver = MockDriver::new();
    driver.set_cancel_failure(Some("connection refused"));
    let pool = pool(&driver);
    let connector = pool.connector(Handle::current(), Timeouts::default());

    let conn = connector.connect().await.unwrap();
    let (result, conn) = cancel(conn, Duration::from_secs(1)).await;

    assert!(matches!(result, Err(CancelError::Native(_))));
    assert!(conn.error_context().contains("connection refused"));
    assert!(!conn.is_bad());
    assert_eq!(pool.release(conn).unwrap(), Checkin::Idle);
}

// =============================================================================
// Deadline-bounded execution
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_execute_within_deadline() {
    let driver = MockDriver::new();
    let pool = pool(&driver);
    let connector = pool.connector(Handle::current(), Timeouts::default());

    let conn = connector.connect().await.unwrap();
    let pid = conn.handle().unwrap().backend_pid();
    let deadline = Instant::now() + Duration::from_secs(5);

    let (result, conn) = execute(conn, deadline, Duration::from_secs(1), |session| {
        session.query(Duration::from_secs(1)).boxed()
    })
    .await;

    assert_eq!(result.unwrap(), pid);
    assert_eq!(driver.cancels_sent(), 0);
    pool.release(conn).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_execute_deadline_cancels_operation() {
    let driver = MockDriver::new();
    driver.set_cancel_delay(Duration::from_millis(100));
    let pool = pool(&driver);
    let connector = pool.connector(Handle::current(), Timeouts::default());

    let conn = connector.connect().await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(1);

    let (result, conn) = execute(conn, deadline, Duration::from_secs(1), |session| {
        session.query(Duration::from_secs(30)).boxed()
    })
    .await;

    assert!(matches!(result, Err(Error::Timeout { cancel: None })));
    assert_eq!(driver.cancels_sent(), 1);
    assert!(!conn.is_bad());
    assert!(conn.error_context().contains("deadline"));
    assert_eq!(pool.release(conn).unwrap(), Checkin::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_execute_deadline_with_unanswered_cancel() {
    let driver = MockDriver::new();
    driver.set_cancel_delay(Duration::from_secs(60));
    let pool = pool(&driver);
    let connector = pool.connector(Handle::current(), Timeouts::default());

    let conn = connector.connect().await.unwrap();
    let mut waiter = tokio_test::task::spawn(connector.connect());
    tokio_test::assert_pending!(waiter.poll());

    let deadline = Instant::now() + Duration::from_secs(1);
    let (result, conn) = execute(conn, deadline, Duration::from_secs(1), |session| {
        session.query(Duration::from_secs(30)).boxed()
    })
    .await;

    match result {
        Err(Error::Timeout {
            cancel: Some(CancelError::Timeout { .. }),
        }) => {}
        other => panic!("expected cancel timeout, got {other:?}"),
    }
    assert!(conn.is_bad());

    // The bad connection's slot goes to the waiter, which connects afresh.
    assert_eq!(pool.release(conn).unwrap(), Checkin::Closed);
    let fresh = tokio_test::assert_ready!(waiter.poll()).unwrap();
    assert!(!fresh.is_bad());
    assert_eq!(driver.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_execute_refuses_broken_session() {
    let driver = MockDriver::new();
    let pool = pool(&driver);
    let connector = pool.connector(Handle::current(), Timeouts::default());

    let conn = connector.connect().await.unwrap();
    conn.handle().unwrap().break_session();
    let deadline = Instant::now() + Duration::from_secs(5);

    // The session reports itself broken, so execute refuses to start.
    let (result, conn) = execute(conn, deadline, Duration::from_secs(1), |session| {
        session.query(Duration::from_secs(1)).boxed()
    })
    .await;
    assert_eq!(result.unwrap_err().code(), "bad_connection");
    assert_eq!(pool.release(conn).unwrap(), Checkin::Closed);
}
