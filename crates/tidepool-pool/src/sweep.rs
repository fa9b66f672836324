//! Idle connection sweeper.
//!
//! One task per pool, alive only while the idle set is non-empty. It sleeps
//! until the oldest idle connection expires, evicts everything past the
//! idle timeout, and goes again. The pool re-arms it on the next insertion
//! into an empty idle set.

use std::sync::Weak;

use tidepool_core::Driver;
use tokio::time::Instant;

use crate::pool::PoolInner;

pub(crate) async fn run<D: Driver>(pool: Weak<PoolInner<D>>) {
    tracing::trace!("idle sweeper started");

    loop {
        // Holding only a weak reference lets a dropped pool end the task.
        let deadline = match pool.upgrade() {
            Some(pool) => pool.next_expiry(),
            None => None,
        };
        let Some(deadline) = deadline else {
            break;
        };

        tokio::time::sleep_until(deadline).await;

        match pool.upgrade() {
            Some(pool) => {
                pool.evict_idle(Instant::now());
            }
            None => break,
        }
    }

    tracing::trace!("idle sweeper stopped");
}
