//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Server, accept loop, connection tasks produce:
//!     → tracing events (structured key/value fields, per-connection span)
//!     → metrics.rs (counters and gauges through the `metrics` facade)
//!
//! Consumers (installed by the embedding binary):
//!     → logging.rs (fmt subscriber with env filter)
//!     → metrics.rs (Prometheus scrape endpoint)
//! ```
//!
//! # Design Decisions
//! - The library never installs global subscribers or recorders itself
//! - Metrics are cheap (atomic increments) and aggregate across servers

pub mod logging;
pub mod metrics;
