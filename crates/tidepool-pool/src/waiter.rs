//! Queue of acquisitions waiting for a free slot.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio::time::Instant;

use tidepool_core::Driver;

use crate::lifecycle::SlotReservation;
use crate::pool::PooledConnection;

/// What a waiter is handed when it reaches the front of the queue.
pub(crate) enum Grant<D: Driver> {
    /// A released, healthy connection.
    Ready(PooledConnection<D>),
    /// A freed slot; the waiter opens its own connection.
    Slot(SlotReservation<D>),
}

/// A pending acquisition.
///
/// Dropping the waiter without offering it anything fails the
/// acquisition with `PoolClosed`.
pub(crate) struct Waiter<D: Driver> {
    id: u64,
    enqueued_at: Instant,
    tx: oneshot::Sender<Grant<D>>,
}

impl<D: Driver> Waiter<D> {
    pub(crate) fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Hand over `grant`. Gives it back untouched if the waiter is gone.
    pub(crate) fn offer(self, grant: Grant<D>) -> Result<(), Grant<D>> {
        self.tx.send(grant)
    }
}

/// FIFO of waiters with stable ids for out-of-order removal.
pub(crate) struct WaitQueue<D: Driver> {
    waiters: VecDeque<Waiter<D>>,
    next_id: u64,
}

impl<D: Driver> Default for WaitQueue<D> {
    fn default() -> Self {
        Self {
            waiters: VecDeque::new(),
            next_id: 1,
        }
    }
}

impl<D: Driver> WaitQueue<D> {
    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Enqueue a new waiter at the back.
    pub(crate) fn push(&mut self) -> (u64, oneshot::Receiver<Grant<D>>) {
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(Waiter {
            id,
            enqueued_at: Instant::now(),
            tx,
        });
        (id, rx)
    }

    /// Oldest waiter.
    pub(crate) fn pop_front(&mut self) -> Option<Waiter<D>> {
        self.waiters.pop_front()
    }

    /// Unlink waiter `id`, keeping the others in order.
    ///
    /// Returns `false` if it was already served.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        // Abandoned waiters are usually near the front.
        match self.waiters.iter().position(|w| w.id == id) {
            Some(index) => {
                self.waiters.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove every waiter.
    pub(crate) fn drain(&mut self) -> Vec<Waiter<D>> {
        self.waiters.drain(..).collect()
    }

    #[cfg(test)]
    pub(crate) fn ids(&self) -> Vec<u64> {
        self.waiters.iter().map(|w| w.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;
    use tidepool_testing::MockDriver;

    #[tokio::test]
    async fn test_remove_preserves_order() {
        let mut queue = WaitQueue::<MockDriver>::default();
        let receivers: Vec<_> = (0..4).map(|_| queue.push()).collect();
        let ids: Vec<u64> = receivers.iter().map(|(id, _)| *id).collect();

        assert!(queue.remove(ids[1]));
        assert!(!queue.remove(ids[1]));
        assert_eq!(queue.ids(), vec![ids[0], ids[2], ids[3]]);

        let front = queue.pop_front().unwrap();
        assert_eq!(front.id, ids[0]);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_offer_to_departed_waiter_returns_grant() {
        let mut queue = WaitQueue::<MockDriver>::default();
        let (_, rx) = queue.push();
        drop(rx);

        let waiter = queue.pop_front().unwrap();
        let back = waiter.offer(Grant::Slot(SlotReservation::new(Weak::new())));
        assert!(matches!(back, Err(Grant::Slot(_))));
    }

    #[tokio::test]
    async fn test_offer_delivers_grant() {
        let mut queue = WaitQueue::<MockDriver>::default();
        let (_, rx) = queue.push();

        let waiter = queue.pop_front().unwrap();
        assert!(
            waiter
                .offer(Grant::Slot(SlotReservation::new(Weak::new())))
                .is_ok()
        );
        assert!(matches!(rx.await, Ok(Grant::Slot(_))));
    }

    #[tokio::test]
    async fn test_dropped_waiter_closes_receiver() {
        let mut queue = WaitQueue::<MockDriver>::default();
        let (_, rx) = queue.push();
        drop(queue.drain());
        assert!(rx.await.is_err());
        assert!(queue.is_empty());
    }
}
