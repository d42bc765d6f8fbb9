//! Resilience helpers for the accept loop.
//!
//! # Data Flow
//! ```text
//! accept() fails
//!     → backoff.rs (record failure, compute jittered delay)
//!     → sleep (interruptible by shutdown) and retry
//!     → failure streak exceeds budget → loop drains and reports the error
//! ```
//!
//! # Design Decisions
//! - Jittered backoff keeps several processes sharing a port from retrying in lockstep
//! - A successful accept resets the streak
//! - Persistent failures are terminal instead of retrying forever

pub mod backoff;
