//! Network layer.
//!
//! # Data Flow
//! ```text
//! ListenConfig
//!     → sockopt.rs (reuse, fast-open, defer-accept on the raw socket)
//!     → listener.rs (bind, listen, accept)
//!     → stream.rs (plain TCP or TLS over TCP)
//!     → tls.rs (certificate loading, handshake, in-band upgrade)
//!     → pool.rs (reusable connection objects)
//!     → connection.rs (per-tenant state handed to the handler)
//! ```
//!
//! # Design Decisions
//! - Socket options the OS lacks are skipped, not fatal
//! - Connection objects are recycled, never shared between two tenants
//! - TLS is optional and negotiated per connection, off the accept path

pub mod connection;
pub mod listener;
pub mod pool;
pub mod sockopt;
pub mod stream;
pub mod tls;
