//! Free list of idle connection objects.
//!
//! # Responsibilities
//! - Hand out an idle connection object, or build one with the creator
//! - Wire the server back-reference into every object it builds
//! - Reset objects on release so no stream or context survives a tenant
//! - Cap the number of idle objects retained
//!
//! Objects are moved in and out of the free list, so one object can never
//! be issued to two handlers at once.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::net::connection::Connection;
use crate::server::ServerHandle;

/// Factory producing fresh connection objects.
pub type ConnectionCreator<C> = Arc<dyn Fn() -> C + Send + Sync>;

/// Pool of reusable connection objects of a single type.
pub struct ConnectionPool<C> {
    idle: Mutex<Vec<C>>,
    creator: ConnectionCreator<C>,
    server: ServerHandle,
    max_idle: AtomicUsize,
    created: AtomicU64,
    reused: AtomicU64,
    closed: AtomicBool,
}

impl<C: Connection> ConnectionPool<C> {
    /// Create an empty pool. `max_idle == 0` keeps every released object.
    pub fn new(creator: ConnectionCreator<C>, server: ServerHandle, max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            creator,
            server,
            max_idle: AtomicUsize::new(max_idle),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Take an idle object, or build a new one when none is available.
    pub fn acquire(&self) -> C {
        let idle = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        match idle {
            Some(conn) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                conn
            }
            None => {
                let mut conn = (self.creator)();
                conn.set_server(self.server.clone());
                self.created.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(created = self.created_count(), "Pool allocated connection object");
                conn
            }
        }
    }

    /// Reset `conn` and return it to the free list.
    ///
    /// The object is dropped instead when the pool already holds `max_idle`
    /// idle objects, or once the pool has been cleared.
    pub fn release(&self, mut conn: C) {
        conn.reset(None);
        if self.closed.load(Ordering::Acquire) {
            return;
        }

        let max_idle = self.max_idle.load(Ordering::Relaxed);
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if max_idle == 0 || idle.len() < max_idle {
            idle.push(conn);
        }
    }

    /// Drop every idle object and stop retaining released ones.
    ///
    /// Called when the server closes; handlers that outlive the shutdown
    /// deadline still release their objects, which are then dropped.
    pub fn clear(&self) {
        self.closed.store(true, Ordering::Release);
        let drained = std::mem::take(&mut *self.idle.lock().unwrap_or_else(PoisonError::into_inner));
        tracing::debug!(released = drained.len(), "Connection pool cleared");
    }

    pub fn set_max_idle(&self, max_idle: usize) {
        self.max_idle.store(max_idle, Ordering::Relaxed);
    }

    /// Number of idle objects currently held.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Objects built by the creator over the pool's lifetime.
    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Acquisitions served from the free list.
    pub fn reused_count(&self) -> u64 {
        self.reused.load(Ordering::Relaxed)
    }
}

impl<C> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_idle", &self.max_idle.load(Ordering::Relaxed))
            .field("created", &self.created.load(Ordering::Relaxed))
            .field("reused", &self.reused.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
