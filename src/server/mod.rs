//! Server lifecycle.
//!
//! # Data Flow
//! ```text
//! Server::new(addr)
//!     → set_listen_config / set_tls_config / set_max_accept_connections
//!     → listen() or listen_tls()   (socket created, tuned, bound)
//!     → serve(handler)             (accept loop, accept.rs)
//!         per stream: counters ↑ → [TLS handshake] → pool checkout
//!                     → handler task → drop: reset, pool return, counters ↓
//!     → shutdown(d) / halt()       (stop accepting, drain, close)
//! ```
//!
//! # Design Decisions
//! - All mutable state lives in one `ServerState` per server; no globals
//! - Counters are plain atomics, no compound invariant spans two of them
//! - Connections see the server only through a weak, read-only `ServerHandle`

mod accept;
mod pooled;
mod state;

pub use pooled::PooledConnection;
pub use state::{ServerHandle, ServerPhase};

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_rustls::rustls::ServerConfig as TlsServerConfig;

use crate::config::{AcceptBackoffConfig, ListenConfig, PoolConfig, ServerConfig};
use crate::error::ServerError;
use crate::lifecycle::DrainDeadline;
use crate::net::connection::{Connection, TcpConn};
use crate::net::listener::{resolve_listen_addr, Listener};
use crate::net::pool::ConnectionPool;
use crate::net::tls::load_tls_config;
use state::{ListenerSlot, ServerState};

/// A TCP connection server.
///
/// Cheap to clone; clones share the same listener, pool and counters.
pub struct Server<C: Connection = TcpConn> {
    state: Arc<ServerState>,
    pool: Arc<ConnectionPool<C>>,
}

impl<C: Connection> Clone for Server<C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<C: Connection> std::fmt::Debug for Server<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("state", &self.state)
            .field("pool", &self.pool)
            .finish()
    }
}

impl Server<TcpConn> {
    /// Create a server for `listen_addr` using [`TcpConn`] connections.
    pub fn new(listen_addr: &str) -> Result<Self, ServerError> {
        Self::with_creator(listen_addr, TcpConn::new)
    }

    /// Build a server from a full configuration.
    ///
    /// Loads the TLS certificate and key when configured but does not enable
    /// TLS; use [`listen_tls`](Server::listen_tls) for that.
    pub fn from_config(config: &ServerConfig) -> Result<Self, ServerError> {
        let server = Self::new(&config.listen_address)?;
        server.set_listen_config(config.listen.clone())?;
        server.set_max_accept_connections(config.max_accept_connections);
        server.set_accept_backoff(config.accept_backoff.clone());
        server.set_pool_config(&config.pool);

        if let Some(tls) = &config.tls {
            let tls_config = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path))
                .map_err(|e| ServerError::Config(format!("loading TLS certificate: {}", e)))?;
            server.set_tls_config(tls_config);
        }

        Ok(server)
    }
}

impl<C: Connection> Server<C> {
    /// Create a server whose pool builds connection objects with `creator`.
    ///
    /// The address is resolved now; nothing is bound until
    /// [`listen`](Server::listen).
    pub fn with_creator<F>(listen_addr: &str, creator: F) -> Result<Self, ServerError>
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        let addr = resolve_listen_addr(listen_addr)?;
        let state = Arc::new(ServerState::new(addr));
        let pool = Arc::new(ConnectionPool::new(
            Arc::new(creator),
            ServerHandle::new(&state),
            PoolConfig::default().max_idle,
        ));

        tracing::debug!(address = %addr, "Server created");
        Ok(Self { state, pool })
    }

    /// Replace the socket options used by [`listen`](Server::listen).
    pub fn set_listen_config(&self, config: ListenConfig) -> Result<(), ServerError> {
        if self.state.phase() != ServerPhase::Idle {
            return Err(ServerError::State("listen config must be set before listening"));
        }
        self.state.listen_config.store(Arc::new(config));
        Ok(())
    }

    pub fn listen_config(&self) -> Arc<ListenConfig> {
        self.state.listen_config.load_full()
    }

    /// Store a TLS configuration without enabling it.
    ///
    /// TLS can then be enabled for every connection with
    /// [`listen_tls`](Server::listen_tls), or per connection with
    /// [`PooledConnection::start_tls`].
    pub fn set_tls_config(&self, config: Arc<TlsServerConfig>) {
        self.state.tls_config.store(Some(config));
    }

    pub fn tls_config(&self) -> Option<Arc<TlsServerConfig>> {
        self.state.tls_config.load_full()
    }

    /// Negotiate TLS on every accepted connection.
    pub fn enable_tls(&self) -> Result<(), ServerError> {
        if self.state.tls_config.load().is_none() {
            return Err(ServerError::Config("no TLS config set".to_string()));
        }
        self.state.tls_enabled.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_tls_enabled(&self) -> bool {
        self.state.tls_enabled.load(Ordering::SeqCst)
    }

    /// Create the listen socket, apply socket options, bind and listen.
    ///
    /// A server listens at most once; later calls fail with
    /// [`ServerError::State`].
    pub async fn listen(&self) -> Result<(), ServerError> {
        let mut slot = self.state.listener_slot();
        if !matches!(*slot, ListenerSlot::Empty) {
            return Err(ServerError::State("server has already listened"));
        }

        let address = self.state.requested_addr;
        let config = self.state.listen_config.load_full();
        let listener =
            Listener::bind(address, &config).map_err(|source| ServerError::Listen { address, source })?;

        let bound = listener.local_addr();
        let _ = self.state.bound_addr.set(bound);
        *slot = ListenerSlot::Parked(listener);
        drop(slot);
        self.state.set_phase(ServerPhase::Listening);

        tracing::info!(
            address = %bound,
            tls = self.is_tls_enabled(),
            "Listening for connections"
        );
        Ok(())
    }

    /// [`enable_tls`](Server::enable_tls) followed by [`listen`](Server::listen).
    pub async fn listen_tls(&self) -> Result<(), ServerError> {
        self.enable_tls()?;
        self.listen().await
    }

    /// Stop accepting after `limit` connections in total and shut down.
    /// Zero or negative means unlimited.
    pub fn set_max_accept_connections(&self, limit: i64) {
        self.state.max_accept.store(limit, Ordering::SeqCst);
    }

    pub fn max_accept_connections(&self) -> i64 {
        self.state.max_accept.load(Ordering::SeqCst)
    }

    /// Retry policy for failed accept calls; read when `serve` starts.
    pub fn set_accept_backoff(&self, config: AcceptBackoffConfig) {
        self.state.accept_backoff.store(Arc::new(config));
    }

    pub fn set_pool_config(&self, config: &PoolConfig) {
        self.pool.set_max_idle(config.max_idle);
    }

    /// Connections whose handler is still running.
    pub fn active_connections(&self) -> i64 {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Connections accepted over the server's lifetime.
    pub fn accepted_connections(&self) -> u64 {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// The bound address (with the OS-assigned port), once listening.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.state.bound_addr.get().copied()
    }

    pub fn phase(&self) -> ServerPhase {
        self.state.phase()
    }

    /// Read-only handle, as given to connection objects.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle::new(&self.state)
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    /// Keep a reserved, untouched buffer of `megabytes` for the server's lifetime.
    ///
    /// Runtimes with a tracing collector use such ballast to space out
    /// collections. Rust has none, so the default is no ballast and this is
    /// only a knob for matching memory baselines across deployments.
    pub fn set_ballast(&self, megabytes: usize) {
        self.state.set_ballast(megabytes);
    }

    pub fn ballast_bytes(&self) -> usize {
        self.state.ballast_len()
    }

    /// Stop accepting, close the listener, and wait for running handlers.
    ///
    /// With `grace == 0` this waits until every handler has returned.
    /// Otherwise it returns no later than `grace` from now, whether or not
    /// handlers finished; they are not cancelled. Calling again may tighten
    /// the deadline.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), ServerError> {
        self.stop(DrainDeadline::after(grace)).await
    }

    /// Close the listener without waiting for running handlers.
    pub async fn halt(&self) -> Result<(), ServerError> {
        self.stop(DrainDeadline::Immediate).await
    }

    async fn stop(&self, deadline: DrainDeadline) -> Result<(), ServerError> {
        {
            let mut slot = self.state.listener_slot();
            let parked = match *slot {
                ListenerSlot::Empty => return Err(ServerError::State("server is not listening")),
                ListenerSlot::Parked(_) => true,
                ListenerSlot::Serving | ListenerSlot::Closed => false,
            };
            self.state.shutdown.trigger(deadline);

            if parked {
                // serve() never ran; close the listener here.
                self.state.mark_listener_closed(&mut slot);
                drop(slot);
                self.pool.clear();
                self.state.set_phase(ServerPhase::Closed);
                tracing::info!("Server closed before serving");
                return Ok(());
            }
        }

        tracing::info!(
            ?deadline,
            active = self.active_connections(),
            "Shutdown requested"
        );

        self.state.wait_listener_closed().await;
        if deadline == DrainDeadline::Immediate {
            return Ok(());
        }
        if !self.state.drain().await {
            tracing::warn!(
                active = self.active_connections(),
                "Shutdown deadline passed with connections still active"
            );
        }
        Ok(())
    }
}
