//! Managed connection handle.

use std::sync::Weak;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::driver::NativeConnection;
use crate::strand::{Strand, Timer};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-wide unique connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Parked in a pool's idle set.
    Idle,
    /// Held by a caller.
    Leased,
    /// A native cancel request is outstanding.
    CancelIssued,
    /// Indeterminate or broken; must not be reused.
    Bad,
    /// Native session closed.
    Closed,
}

impl ConnectionState {
    /// Short name for log fields.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Idle => "idle",
            Self::Leased => "leased",
            Self::CancelIssued => "cancel_issued",
            Self::Bad => "bad",
            Self::Closed => "closed",
        }
    }
}

/// Owner of leased connections, told when a lease is dropped unreturned.
pub trait LeaseHolder: Send + Sync {
    /// The connection `id` will never be released; free its slot.
    fn reclaim(&self, id: ConnectionId);
}

/// Proof that a connection occupies a slot in some holder.
///
/// Dropping an armed lease hands the slot back to its holder, so a
/// connection that is dropped instead of released does not leak capacity.
pub struct Lease {
    id: ConnectionId,
    holder: Option<Weak<dyn LeaseHolder>>,
}

impl Lease {
    /// Create an armed lease for connection `id`.
    #[must_use]
    pub fn new(id: ConnectionId, holder: Weak<dyn LeaseHolder>) -> Self {
        Self {
            id,
            holder: Some(holder),
        }
    }

    /// Connection this lease belongs to.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Consume the lease without notifying the holder.
    pub fn disarm(mut self) {
        self.holder = None;
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(holder) = self.holder.take().and_then(|weak| weak.upgrade()) {
            tracing::debug!(connection_id = self.id.get(), "leased connection dropped unreturned");
            holder.reclaim(self.id);
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("armed", &self.holder.is_some())
            .finish()
    }
}

/// One session to the backend together with its bookkeeping.
///
/// The native handle is owned exclusively by whoever owns the
/// `Connection`: the pool while idle, a caller while leased, or the
/// cancellation context while a cancel is in flight.
pub struct Connection<H: NativeConnection> {
    id: ConnectionId,
    handle: Option<H>,
    state: ConnectionState,
    created_at: Instant,
    last_used: Instant,
    strand: Strand,
    timer: Timer,
    error_context: String,
    lease: Option<Lease>,
}

impl<H: NativeConnection> Connection<H> {
    /// Wrap a freshly opened native session.
    pub fn new(handle: H, strand: Strand) -> Self {
        let now = Instant::now();
        Self {
            id: ConnectionId::next(),
            handle: Some(handle),
            state: ConnectionState::Connecting,
            created_at: now,
            last_used: now,
            strand,
            timer: Timer::new(),
            error_context: String::new(),
            lease: None,
        }
    }

    /// Connection identity.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Move to `state`.
    ///
    /// `Closed` is terminal and `Bad` can only be left for `Closed`.
    pub fn set_state(&mut self, state: ConnectionState) {
        match (self.state, state) {
            (ConnectionState::Closed, _) => {}
            (ConnectionState::Bad, next) if next != ConnectionState::Closed => {}
            _ => self.state = state,
        }
    }

    /// Flag the connection as unusable.
    pub fn mark_bad(&mut self) {
        self.set_state(ConnectionState::Bad);
    }

    /// Whether the connection must not be reused.
    #[must_use]
    pub fn is_bad(&self) -> bool {
        match (&self.handle, self.state) {
            (None, _) | (_, ConnectionState::Bad | ConnectionState::Closed) => true,
            (Some(handle), _) => handle.is_bad(),
        }
    }

    /// Native session, if still open.
    #[must_use]
    pub fn handle(&self) -> Option<&H> {
        self.handle.as_ref()
    }

    /// Mutable native session, if still open.
    pub fn handle_mut(&mut self) -> Option<&mut H> {
        self.handle.as_mut()
    }

    /// Cancel token for the operation in flight.
    #[must_use]
    pub fn cancel_token(&self) -> Option<H::CancelToken> {
        self.handle.as_ref().map(NativeConnection::cancel_token)
    }

    /// Serialization domain of this connection.
    #[must_use]
    pub fn strand(&self) -> &Strand {
        &self.strand
    }

    /// Executor this connection's work is scheduled on.
    #[must_use]
    pub fn executor(&self) -> &Handle {
        self.strand.executor()
    }

    /// Move the connection's work to another executor.
    pub fn rebind(&mut self, executor: Handle) {
        self.strand.rebind(executor);
    }

    /// Timer associated with this connection.
    pub fn timer_mut(&mut self) -> &mut Timer {
        &mut self.timer
    }

    /// Diagnostic text recorded by the last failure.
    ///
    /// Advisory only; nothing in the crate branches on it.
    #[must_use]
    pub fn error_context(&self) -> &str {
        &self.error_context
    }

    /// Replace the diagnostic text.
    pub fn set_error_context(&mut self, context: impl Into<String>) {
        self.error_context = context.into();
    }

    /// Clear the diagnostic text.
    pub fn clear_error_context(&mut self) {
        self.error_context.clear();
    }

    /// When the connection was opened.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the connection last changed hands.
    #[must_use]
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Record use at `now`.
    pub fn touch(&mut self, now: Instant) {
        self.last_used = now;
    }

    /// Time since last use.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_used)
    }

    /// Attach a lease, returning the previous one.
    pub fn install_lease(&mut self, lease: Lease) -> Option<Lease> {
        self.lease.replace(lease)
    }

    /// Detach the lease, if any.
    pub fn take_lease(&mut self) -> Option<Lease> {
        self.lease.take()
    }

    /// Whether the connection currently carries a lease.
    #[must_use]
    pub fn has_lease(&self) -> bool {
        self.lease.is_some()
    }

    /// Close the native session.
    pub fn close(&mut self) {
        self.timer.disarm();
        if self.handle.take().is_some() {
            tracing::debug!(
                connection_id = self.id.get(),
                state = self.state.as_str(),
                "closing connection"
            );
        }
        self.state = ConnectionState::Closed;
    }
}

impl<H: NativeConnection> std::fmt::Debug for Connection<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("strand", &self.strand.id())
            .field("error_context", &self.error_context)
            .field("leased", &self.lease.is_some())
            .finish()
    }
}
