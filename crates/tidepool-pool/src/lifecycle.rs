//! Slot accounting and check-in outcomes.

use std::sync::Weak;

use tidepool_core::Driver;

use crate::pool::{PoolInner, PoolState};

/// What happened to a connection handed back with
/// [`Pool::release`](crate::Pool::release).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkin {
    /// Parked in the idle set.
    Idle,
    /// Given straight to the oldest waiter.
    HandedOff,
    /// Closed (bad connection or closed pool); its slot was freed.
    Closed,
}

/// A capacity slot reserved for a connection that is not open yet.
///
/// While armed it counts as "connecting" in the pool. Dropping an armed
/// reservation (failed handshake, abandoned acquisition) gives the slot
/// back, which may pass it on to the next waiter.
pub(crate) struct SlotReservation<D: Driver> {
    pool: Weak<PoolInner<D>>,
    armed: bool,
}

impl<D: Driver> SlotReservation<D> {
    /// Reserve a slot. The caller has already counted it in `state`.
    pub(crate) fn new(pool: Weak<PoolInner<D>>) -> Self {
        Self { pool, armed: true }
    }

    /// Un-count the slot while already holding the pool lock.
    ///
    /// Used when the slot becomes a leased connection, or when it could not
    /// be delivered to a waiter.
    pub(crate) fn settle(mut self, state: &mut PoolState<D>) {
        state.connecting = state.connecting.saturating_sub(1);
        self.armed = false;
    }
}

impl<D: Driver> Drop for SlotReservation<D> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(pool) = self.pool.upgrade() {
            pool.release_slot();
        }
    }
}
