//! The connection object lent to a handler for one accepted stream.

use std::fmt;
use std::io;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::error::ServerError;
use crate::net::connection::{not_connected, Connection, TcpConn};
use crate::net::pool::ConnectionPool;
use crate::net::stream::Stream;
use crate::net::tls;
use crate::server::state::ActiveGuard;

/// A connection checked out of the pool for the lifetime of one handler
/// invocation.
///
/// Dereferences to the connection object and reads/writes its stream
/// directly. Dropping it (normally, or while unwinding from a handler panic)
/// resets the object, which closes any stream still attached, returns it to
/// the pool, and releases the server's in-flight slot.
pub struct PooledConnection<C: Connection = TcpConn> {
    conn: Option<C>,
    pool: Arc<ConnectionPool<C>>,
    _active: ActiveGuard,
}

impl<C: Connection> PooledConnection<C> {
    /// Take an object from the pool and install `stream` as its new tenant.
    pub(crate) fn checkout(pool: Arc<ConnectionPool<C>>, stream: Stream, active: ActiveGuard) -> Self {
        let mut conn = pool.acquire();
        conn.reset(Some(stream));
        conn.start();
        Self {
            conn: Some(conn),
            pool,
            _active: active,
        }
    }

    /// Switch a plain stream to TLS in-band using the server's TLS config.
    pub async fn start_tls(&mut self) -> Result<(), ServerError> {
        tls::upgrade(&mut **self).await
    }

    /// Shut down the write side and release the stream.
    pub async fn close(&mut self) -> io::Result<()> {
        let Some(mut stream) = self.take_stream() else {
            return Ok(());
        };
        stream.shutdown().await
    }

    fn stream_pin(&mut self) -> io::Result<Pin<&mut Stream>> {
        self.stream_mut().map(Pin::new).ok_or_else(not_connected)
    }
}

impl<C: Connection> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.conn
            .as_ref()
            .expect("connection is present until the guard drops")
    }
}

impl<C: Connection> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.conn
            .as_mut()
            .expect("connection is present until the guard drops")
    }
}

impl<C: Connection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

// Never pin-projects into `C`.
impl<C: Connection> Unpin for PooledConnection<C> {}

impl<C: Connection> AsyncRead for PooledConnection<C> {
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

impl<C: Connection> AsyncWrite for PooledConnection<C> {
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

impl<C: Connection + fmt::Debug> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}
