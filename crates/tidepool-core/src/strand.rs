//! Serialization domains and timers bound to them.
//!
//! A [`Strand`] is the explicit form of "the executor this connection
//! belongs to". It carries the runtime handle used to spawn work for the
//! connection and a gate that serializes completion handlers, so two
//! handlers for the same connection never interleave even when the
//! operations they complete run concurrently.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};

static NEXT_STRAND_ID: AtomicU64 = AtomicU64::new(1);

/// An exclusive execution sequence bound to an executor.
#[derive(Clone)]
pub struct Strand {
    id: u64,
    executor: Handle,
    gate: Arc<Mutex<()>>,
}

impl Strand {
    /// Create a new strand on the given executor.
    #[must_use]
    pub fn new(executor: Handle) -> Self {
        Self {
            id: NEXT_STRAND_ID.fetch_add(1, Ordering::Relaxed),
            executor,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Create a strand on the executor of the calling task.
    ///
    /// Returns `None` outside a tokio runtime.
    #[must_use]
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// Unique id of this strand.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Executor work for this strand is spawned on.
    #[must_use]
    pub fn executor(&self) -> &Handle {
        &self.executor
    }

    /// Move the strand to another executor, keeping its identity and gate.
    pub fn rebind(&mut self, executor: Handle) {
        self.executor = executor;
    }

    /// Whether a handler is currently running inside the strand.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// Run `f` exclusively with respect to every other `run` on this strand.
    pub async fn run<F>(&self, f: F) -> F::Output
    where
        F: Future,
    {
        let _exclusive = self.gate.lock().await;
        f.await
    }

    /// Spawn a task on the strand's executor.
    ///
    /// The task itself is not serialized; wrap its completion step in
    /// [`Strand::run`].
    pub fn spawn<F>(&self, f: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.executor.spawn(f)
    }
}

impl std::fmt::Debug for Strand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strand")
            .field("id", &self.id)
            .field("busy", &self.is_busy())
            .finish()
    }
}

/// A one-shot timer whose expiry handler runs on a strand.
///
/// Arming an armed timer replaces the pending expiry. Dropping the timer
/// disarms it.
#[derive(Debug, Default)]
pub struct Timer {
    pending: Option<AbortHandle>,
}

impl Timer {
    /// Create a disarmed timer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `on_expiry` on `strand` once `after` has elapsed.
    pub fn arm<F>(&mut self, strand: &Strand, after: Duration, on_expiry: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.disarm();

        let domain = strand.clone();
        let task = strand.spawn(async move {
            tokio::time::sleep(after).await;
            domain.run(on_expiry).await;
        });
        self.pending = Some(task.abort_handle());
    }

    /// Cancel a pending expiry. Returns `true` if one was pending.
    pub fn disarm(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }

    /// Forget the pending expiry without cancelling it.
    ///
    /// Used by the expiry handler itself once it has fired.
    pub fn clear(&mut self) {
        self.pending = None;
    }

    /// Whether an expiry is still pending.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.pending.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let strand = Strand::current().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = Timer::new();

        let counter = fired.clone();
        timer.arm(&strand, Duration::from_millis(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
        assert!(!timer.disarm());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_disarm_prevents_expiry() {
        let strand = Strand::current().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = Timer::new();

        let counter = fired.clone();
        timer.arm(&strand, Duration::from_millis(10), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.disarm());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_pending_expiry() {
        let strand = Strand::current().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let mut timer = Timer::new();

        for _ in 0..3 {
            let counter = fired.clone();
            timer.arm(&strand, Duration::from_millis(10), async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_strand_serializes_handlers() {
        let strand = Strand::current().unwrap();
        let inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let strand = strand.clone();
            let inside = inside.clone();
            tasks.push(tokio::spawn(async move {
                strand
                    .run(async {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        tokio::task::yield_now().await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(!strand.is_busy());
    }

    #[tokio::test]
    async fn test_rebind_keeps_identity() {
        let mut strand = Strand::current().unwrap();
        let id = strand.id();
        strand.rebind(Handle::current());
        assert_eq!(strand.id(), id);
        assert_ne!(Strand::current().unwrap().id(), id);
    }
}
