//! Shutdown coordination for the server.

use std::time::{Duration, Instant};

use tokio::sync::watch;

/// How long a shutdown waits for in-flight handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainDeadline {
    /// Wait until every handler has returned.
    Unbounded,
    /// Stop waiting at this instant.
    At(Instant),
    /// Do not wait at all.
    Immediate,
}

impl DrainDeadline {
    /// Deadline for a grace period; zero means wait indefinitely.
    pub fn after(grace: Duration) -> Self {
        if grace.is_zero() {
            DrainDeadline::Unbounded
        } else {
            DrainDeadline::At(Instant::now() + grace)
        }
    }

    /// The stricter of two deadlines.
    pub fn tighter(self, other: Self) -> Self {
        use DrainDeadline::*;
        match (self, other) {
            (Immediate, _) | (_, Immediate) => Immediate,
            (At(a), At(b)) => At(a.min(b)),
            (At(a), Unbounded) | (Unbounded, At(a)) => At(a),
            (Unbounded, Unbounded) => Unbounded,
        }
    }

    /// Wall-clock instant after which waiting stops, if bounded.
    pub fn instant(&self) -> Option<Instant> {
        match self {
            DrainDeadline::Unbounded => None,
            DrainDeadline::At(at) => Some(*at),
            DrainDeadline::Immediate => Some(Instant::now()),
        }
    }
}

/// Coordinator for graceful shutdown.
///
/// Holds the pending request in a watch channel so tasks that subscribe after
/// the trigger still observe it. Repeated triggers can only tighten the
/// deadline.
#[derive(Debug)]
pub struct Shutdown {
    tx: watch::Sender<Option<DrainDeadline>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Subscribe to the shutdown request.
    pub fn subscribe(&self) -> watch::Receiver<Option<DrainDeadline>> {
        self.tx.subscribe()
    }

    /// Request shutdown. Returns `true` for the first request.
    pub fn trigger(&self, deadline: DrainDeadline) -> bool {
        let mut first = false;
        self.tx.send_modify(|current| {
            first = current.is_none();
            *current = Some(match *current {
                Some(existing) => existing.tighter(deadline),
                None => deadline,
            });
        });
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// The effective deadline, once triggered.
    pub fn deadline(&self) -> Option<DrainDeadline> {
        *self.tx.borrow()
    }

    /// Resolve once shutdown has been requested.
    pub async fn triggered(&self) {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(Option::is_some).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
