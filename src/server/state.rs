//! State shared between the server, its accept loop and connection tasks.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Instant;

use arc_swap::{ArcSwap, ArcSwapOption};
use tokio::sync::watch;
use tokio_rustls::rustls::ServerConfig as TlsServerConfig;

use crate::config::{AcceptBackoffConfig, ListenConfig};
use crate::lifecycle::{DrainDeadline, Shutdown};
use crate::net::listener::Listener;
use crate::observability::metrics;

/// Phases of a server's life.
///
/// ```text
/// Idle → Listening → Accepting → Draining → Halted → Closed
/// ```
/// A server shut down before `serve` goes straight from `Listening` to `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerPhase {
    /// Constructed, not yet listening.
    Idle = 0,
    /// Listener bound, accept loop not started.
    Listening = 1,
    /// Accept loop running.
    Accepting = 2,
    /// No new accepts; waiting for in-flight handlers.
    Draining = 3,
    /// Drain finished or abandoned; releasing resources.
    Halted = 4,
    /// Listener and pool released. Counters remain readable.
    Closed = 5,
}

impl ServerPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Listening,
            2 => Self::Accepting,
            3 => Self::Draining,
            4 => Self::Halted,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ServerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Listening => "Listening",
            Self::Accepting => "Accepting",
            Self::Draining => "Draining",
            Self::Halted => "Halted",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Where the listener is in its single pass from bind to close.
#[derive(Debug)]
pub(crate) enum ListenerSlot {
    Empty,
    Parked(Listener),
    Serving,
    Closed,
}

pub(crate) struct ServerState {
    pub(crate) requested_addr: SocketAddr,
    pub(crate) bound_addr: OnceLock<SocketAddr>,
    pub(crate) listen_config: ArcSwap<ListenConfig>,
    pub(crate) tls_config: ArcSwapOption<TlsServerConfig>,
    pub(crate) tls_enabled: AtomicBool,
    pub(crate) accept_backoff: ArcSwap<AcceptBackoffConfig>,
    pub(crate) active: AtomicI64,
    pub(crate) accepted: AtomicU64,
    pub(crate) max_accept: AtomicI64,
    phase: AtomicU8,
    pub(crate) shutdown: Shutdown,
    in_flight: watch::Sender<usize>,
    listener: Mutex<ListenerSlot>,
    listener_closed: watch::Sender<bool>,
    ballast: Mutex<Vec<u8>>,
}

impl ServerState {
    pub(crate) fn new(requested_addr: SocketAddr) -> Self {
        Self {
            requested_addr,
            bound_addr: OnceLock::new(),
            listen_config: ArcSwap::from_pointee(ListenConfig::default()),
            tls_config: ArcSwapOption::empty(),
            tls_enabled: AtomicBool::new(false),
            accept_backoff: ArcSwap::from_pointee(AcceptBackoffConfig::default()),
            active: AtomicI64::new(0),
            accepted: AtomicU64::new(0),
            max_accept: AtomicI64::new(0),
            phase: AtomicU8::new(ServerPhase::Idle as u8),
            shutdown: Shutdown::new(),
            in_flight: watch::channel(0).0,
            listener: Mutex::new(ListenerSlot::Empty),
            listener_closed: watch::channel(false).0,
            ballast: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn phase(&self) -> ServerPhase {
        ServerPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub(crate) fn set_phase(&self, phase: ServerPhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
        tracing::debug!(%phase, "Server phase changed");
    }

    pub(crate) fn listener_slot(&self) -> MutexGuard<'_, ListenerSlot> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the listener slot and wake anyone waiting for it.
    pub(crate) fn mark_listener_closed(&self, slot: &mut ListenerSlot) {
        *slot = ListenerSlot::Closed;
        self.listener_closed.send_replace(true);
    }

    pub(crate) async fn wait_listener_closed(&self) {
        let mut rx = self.listener_closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// True once the accept ceiling (if any) has been reached.
    pub(crate) fn accept_limit_reached(&self) -> bool {
        let limit = self.max_accept.load(Ordering::SeqCst);
        limit > 0 && self.accepted.load(Ordering::SeqCst) >= limit as u64
    }

    pub(crate) fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Wait for in-flight handlers to finish, bounded by the shutdown deadline.
    ///
    /// Tightening the deadline while waiting takes effect immediately.
    /// Returns `false` when the deadline passed first.
    pub(crate) async fn drain(&self) -> bool {
        let mut requests = self.shutdown.subscribe();
        let mut in_flight = self.in_flight.subscribe();

        loop {
            let deadline = (*requests.borrow_and_update()).unwrap_or(DrainDeadline::Unbounded);
            if *in_flight.borrow_and_update() == 0 {
                return true;
            }

            let expired = async move {
                match deadline.instant() {
                    Some(at) => tokio::time::sleep_until(at.into()).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                changed = in_flight.changed() => {
                    if changed.is_err() {
                        return true;
                    }
                }
                _ = requests.changed() => {}
                _ = expired => return false,
            }
        }
    }

    pub(crate) fn set_ballast(&self, megabytes: usize) {
        let mut ballast = self.ballast.lock().unwrap_or_else(PoisonError::into_inner);
        *ballast = vec![0u8; megabytes << 20];
    }

    pub(crate) fn ballast_len(&self) -> usize {
        self.ballast.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl fmt::Debug for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerState")
            .field("requested_addr", &self.requested_addr)
            .field("bound_addr", &self.bound_addr.get())
            .field("phase", &self.phase())
            .field("active", &self.active.load(Ordering::Relaxed))
            .field("accepted", &self.accepted.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Holds one in-flight slot for a connection task.
///
/// Increments the active counter and the drain wait-group on creation and
/// decrements both when dropped, including during a panic unwind.
#[derive(Debug)]
pub(crate) struct ActiveGuard {
    state: Arc<ServerState>,
}

impl ActiveGuard {
    pub(crate) fn new(state: Arc<ServerState>) -> Self {
        state.active.fetch_add(1, Ordering::SeqCst);
        state.in_flight.send_modify(|n| *n += 1);
        metrics::connection_opened();
        Self { state }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::SeqCst);
        self.state.in_flight.send_modify(|n| *n = n.saturating_sub(1));
        metrics::connection_closed();
    }
}

/// Non-owning reference from a connection back to its server.
///
/// Read-only: exposes counters, addresses, TLS configuration and shutdown
/// state, but cannot drive the server's lifecycle. All accessors degrade
/// to empty values once the server has been dropped.
#[derive(Clone, Default)]
pub struct ServerHandle {
    inner: Weak<ServerState>,
}

impl ServerHandle {
    pub(crate) fn new(state: &Arc<ServerState>) -> Self {
        Self {
            inner: Arc::downgrade(state),
        }
    }

    /// A handle not attached to any server.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Whether the server is still alive.
    pub fn is_attached(&self) -> bool {
        self.inner.strong_count() > 0
    }

    pub fn active_connections(&self) -> i64 {
        self.inner
            .upgrade()
            .map_or(0, |s| s.active.load(Ordering::SeqCst))
    }

    pub fn accepted_connections(&self) -> u64 {
        self.inner
            .upgrade()
            .map_or(0, |s| s.accepted.load(Ordering::SeqCst))
    }

    /// Bound listen address.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.inner.upgrade().and_then(|s| s.bound_addr.get().copied())
    }

    pub fn tls_config(&self) -> Option<Arc<TlsServerConfig>> {
        self.inner.upgrade().and_then(|s| s.tls_config.load_full())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner
            .upgrade()
            .map_or(true, |s| s.shutdown.is_triggered())
    }

    /// Instant after which the server stops waiting for handlers, if bounded.
    pub fn shutdown_deadline(&self) -> Option<Instant> {
        self.inner
            .upgrade()
            .and_then(|s| s.shutdown.deadline())
            .and_then(|d| d.instant())
    }

    /// Resolve once shutdown has been requested (or the server is gone).
    pub async fn shutdown_requested(&self) {
        let Some(state) = self.inner.upgrade() else {
            return;
        };
        let mut rx = state.shutdown.subscribe();
        drop(state);
        let _ = rx.wait_for(Option::is_some).await;
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("listen_addr", &self.listen_addr())
            .field("attached", &self.is_attached())
            .finish()
    }
}
