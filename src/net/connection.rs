//! Per-client connection state.
//!
//! # Responsibilities
//! - Define the [`Connection`] capability the server and pool rely on
//! - Provide the default implementation, [`TcpConn`]
//! - Carry the stream, the server back-reference, a context slot and the
//!   start time for one tenant at a time
//!
//! Connection objects are long-lived: the pool hands the same object to many
//! accepted streams in turn, calling [`Connection::reset`] between tenants.

use std::any::Any;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::net::stream::Stream;
use crate::server::ServerHandle;

/// Request-scoped value attached to a connection by the handler.
pub type ConnectionContext = Box<dyn Any + Send + Sync>;

/// Capability contract for connection objects managed by a server.
///
/// `start`, `reset`, `set_server`, `take_stream` and `set_stream` are driven by
/// the server and pool; handlers normally only read.
pub trait Connection: Send + 'static {
    /// The stream of the current tenant, if any.
    fn stream(&self) -> Option<&Stream>;

    fn stream_mut(&mut self) -> Option<&mut Stream>;

    /// Detach the stream, leaving the connection without one.
    fn take_stream(&mut self) -> Option<Stream>;

    /// Replace the stream without touching the rest of the tenant state.
    fn set_stream(&mut self, stream: Stream);

    /// Back-reference to the owning server.
    fn server(&self) -> Option<&ServerHandle>;

    /// Remote address of the current stream.
    fn client_addr(&self) -> Option<SocketAddr> {
        self.stream().and_then(|s| s.peer_addr().ok())
    }

    /// Local address of the current stream.
    fn server_addr(&self) -> Option<SocketAddr> {
        self.stream().and_then(|s| s.local_addr().ok())
    }

    /// When the current tenant was handed to the handler.
    fn start_time(&self) -> Option<Instant>;

    fn context(&self) -> Option<&(dyn Any + Send + Sync)>;

    fn set_context(&mut self, context: Option<ConnectionContext>);

    /// Mark the beginning of a tenant.
    fn start(&mut self);

    /// Drop all tenant state and install `stream` (or none).
    ///
    /// Must clear the context and start time so nothing leaks between
    /// tenants of the same object. The server back-reference is kept.
    fn reset(&mut self, stream: Option<Stream>);

    fn set_server(&mut self, server: ServerHandle);
}

/// Default connection implementation.
///
/// Reads and writes go straight to the underlying stream.
#[derive(Default)]
pub struct TcpConn {
    stream: Option<Stream>,
    server: Option<ServerHandle>,
    context: Option<ConnectionContext>,
    started_at: Option<Instant>,
}

impl TcpConn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time since [`Connection::start`] was called for the current tenant.
    pub fn elapsed(&self) -> Option<std::time::Duration> {
        self.started_at.map(|t| t.elapsed())
    }

    fn stream_pin(&mut self) -> io::Result<Pin<&mut Stream>> {
        self.stream
            .as_mut()
            .map(Pin::new)
            .ok_or_else(not_connected)
    }
}

pub(crate) fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection has no stream")
}

impl fmt::Debug for TcpConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConn")
            .field("stream", &self.stream)
            .field("server", &self.server)
            .field("has_context", &self.context.is_some())
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl Connection for TcpConn {
    fn stream(&self) -> Option<&Stream> {
        self.stream.as_ref()
    }

    fn stream_mut(&mut self) -> Option<&mut Stream> {
        self.stream.as_mut()
    }

    fn take_stream(&mut self) -> Option<Stream> {
        self.stream.take()
    }

    fn set_stream(&mut self, stream: Stream) {
        self.stream = Some(stream);
    }

    fn server(&self) -> Option<&ServerHandle> {
        self.server.as_ref()
    }

    fn start_time(&self) -> Option<Instant> {
        self.started_at
    }

    fn context(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.context.as_deref()
    }

    fn set_context(&mut self, context: Option<ConnectionContext>) {
        self.context = context;
    }

    fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    fn reset(&mut self, stream: Option<Stream>) {
        self.stream = stream;
        self.context = None;
        self.started_at = None;
    }

    fn set_server(&mut self, server: ServerHandle) {
        self.server = Some(server);
    }
}

impl AsyncRead for TcpConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().stream_pin() {
            Ok(stream) => stream.poll_read(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl AsyncWrite for TcpConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut().stream_pin() {
            Ok(stream) => stream.poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stream_pin() {
            Ok(stream) => stream.poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut().stream_pin() {
            Ok(stream) => stream.poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}
