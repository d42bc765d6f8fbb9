//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Server::new → listen / listen_tls → serve (accept loop)
//!
//! Shutdown (shutdown.rs):
//!     shutdown(d) / halt() / accept ceiling
//!     → Shutdown::trigger(deadline)
//!     → accept loop stops and closes the listener
//!     → drain in-flight handlers until idle or deadline
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close
//! - Shutdown has a deadline; past it the server stops waiting but does not
//!   cancel running handlers

pub mod shutdown;

pub use shutdown::{DrainDeadline, Shutdown};
