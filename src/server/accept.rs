//! Accept loop and per-connection dispatch.
//!
//! # States
//! ```text
//! Listening → Accepting → Draining → Halted → Closed
//! ```
//! - Accepting: wait for streams; shutdown requests interrupt the wait
//! - Transient accept errors back off and retry; a persistent streak ends the loop
//! - Draining: listener closed, wait for handlers up to the shutdown deadline
//! - Halted/Closed: pool released, counters stay readable

use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use crate::error::ServerError;
use crate::lifecycle::DrainDeadline;
use crate::net::connection::Connection;
use crate::net::listener::Listener;
use crate::net::stream::Stream;
use crate::observability::metrics;
use crate::resilience::backoff::AcceptBackoff;
use crate::server::pooled::PooledConnection;
use crate::server::state::{ActiveGuard, ListenerSlot, ServerPhase};
use crate::server::Server;

impl<C: Connection> Server<C> {
    /// Run the accept loop, invoking `handler` once per accepted connection
    /// on its own task.
    ///
    /// Returns after the loop has stopped (shutdown, halt, or the accept
    /// ceiling) and in-flight handlers have drained or the shutdown deadline
    /// has passed. Fails with [`ServerError::State`] unless the server is
    /// listening and not yet serving, and with [`ServerError::Accept`] when
    /// accept failures persist past the backoff budget.
    ///
    /// The handler owns the stream: it reads, writes and closes it. A
    /// handler that panics is contained; its stream is closed and its
    /// connection object still goes back to the pool.
    pub async fn serve<F, Fut>(&self, handler: F) -> Result<(), ServerError>
    where
        F: Fn(PooledConnection<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = {
            let mut slot = self.state.listener_slot();
            match std::mem::replace(&mut *slot, ListenerSlot::Serving) {
                ListenerSlot::Parked(listener) => listener,
                other => {
                    *slot = other;
                    return Err(ServerError::State("serve requires a listening server"));
                }
            }
        };

        let mut teardown = ServeTeardown {
            server: self,
            listener: Some(listener),
        };
        self.state.set_phase(ServerPhase::Accepting);
        tracing::info!(
            address = %teardown.listener().local_addr(),
            tls = self.is_tls_enabled(),
            max_accept = self.max_accept_connections(),
            "Accepting connections"
        );

        let handler = Arc::new(handler);
        let result = self.accept_loop(teardown.listener(), &handler).await;

        teardown.close_listener();
        self.state.set_phase(ServerPhase::Draining);
        let drained = self.state.drain().await;
        drop(teardown);

        tracing::info!(
            accepted = self.accepted_connections(),
            active = self.active_connections(),
            drained,
            "Server stopped"
        );
        result
    }

    async fn accept_loop<F, Fut>(&self, listener: &Listener, handler: &Arc<F>) -> Result<(), ServerError>
    where
        F: Fn(PooledConnection<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.state.shutdown.subscribe();
        let mut backoff = AcceptBackoff::new((**self.state.accept_backoff.load()).clone());

        loop {
            if shutdown.borrow_and_update().is_some() {
                tracing::debug!("Shutdown requested, leaving accept loop");
                return Ok(());
            }

            let accepted = tokio::select! {
                biased;
                _ = shutdown.changed() => continue,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    backoff.reset();

                    if self.state.accept_limit_reached() {
                        metrics::connection_rejected();
                        tracing::debug!(peer_addr = %peer, "Accept ceiling reached, refusing connection");
                        drop(stream);
                        self.state.shutdown.trigger(DrainDeadline::Unbounded);
                        return Ok(());
                    }

                    self.dispatch(stream, peer, handler);

                    if self.state.accept_limit_reached() {
                        tracing::info!(
                            limit = self.max_accept_connections(),
                            "Maximum accepted connections reached, no longer accepting"
                        );
                        self.state.shutdown.trigger(DrainDeadline::Unbounded);
                        return Ok(());
                    }
                }
                Err(e) => {
                    metrics::accept_error();
                    let Some(delay) = backoff.next_delay() else {
                        tracing::error!(
                            error = %e,
                            failures = backoff.failures(),
                            "Accept keeps failing, giving up"
                        );
                        self.state.shutdown.trigger(DrainDeadline::Unbounded);
                        return Err(ServerError::Accept {
                            attempts: backoff.failures(),
                            source: e,
                        });
                    };

                    tracing::warn!(error = %e, retry_in = ?delay, "Accept failed, retrying");
                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn dispatch<F, Fut>(&self, stream: TcpStream, peer: SocketAddr, handler: &Arc<F>)
    where
        F: Fn(PooledConnection<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.state.accepted.fetch_add(1, Ordering::SeqCst) + 1;
        let active = ActiveGuard::new(Arc::clone(&self.state));
        metrics::connection_accepted();

        let acceptor = if self.is_tls_enabled() {
            self.state.tls_config.load_full().map(TlsAcceptor::from)
        } else {
            None
        };
        let pool = Arc::clone(&self.pool);
        let handler = Arc::clone(handler);
        let span = tracing::debug_span!("connection", id, peer_addr = %peer);

        tokio::spawn(
            async move {
                let stream = match acceptor {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls) => Stream::Tls(Box::new(tls)),
                        Err(e) => {
                            metrics::tls_handshake_failed();
                            tracing::debug!(error = %e, "TLS handshake failed");
                            return;
                        }
                    },
                    None => Stream::Plain(stream),
                };

                let conn = PooledConnection::checkout(pool, stream, active);
                tracing::trace!("Handler started");

                let invocation = AssertUnwindSafe(async move { handler(conn).await }).catch_unwind();
                if invocation.await.is_err() {
                    metrics::handler_panic();
                    tracing::error!("Connection handler panicked; stream closed");
                } else {
                    tracing::trace!("Handler finished");
                }
            }
            .instrument(span),
        );
    }
}

/// Closes the listener and releases the pool when `serve` ends, including
/// when the `serve` future is dropped before the loop finishes.
struct ServeTeardown<'a, C: Connection> {
    server: &'a Server<C>,
    listener: Option<Listener>,
}

impl<C: Connection> ServeTeardown<'_, C> {
    fn listener(&self) -> &Listener {
        self.listener
            .as_ref()
            .expect("listener is present until closed")
    }

    fn close_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            drop(listener);
            let mut slot = self.server.state.listener_slot();
            self.server.state.mark_listener_closed(&mut slot);
        }
    }
}

impl<C: Connection> Drop for ServeTeardown<'_, C> {
    fn drop(&mut self) {
        if self.listener.is_some() {
            tracing::warn!("Accept loop cancelled, closing listener");
            self.server.state.shutdown.trigger(DrainDeadline::Unbounded);
            self.close_listener();
        }
        self.server.state.set_phase(ServerPhase::Halted);
        self.server.pool.clear();
        self.server.state.set_phase(ServerPhase::Closed);
    }
}
