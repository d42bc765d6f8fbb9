//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tcpserver_connections_accepted_total` (counter): streams handed to handlers
//! - `tcpserver_connections_rejected_total` (counter): streams refused at the accept ceiling
//! - `tcpserver_active_connections` (gauge): connections currently being handled
//! - `tcpserver_accept_errors_total` (counter): failed accept calls
//! - `tcpserver_handler_panics_total` (counter): handler invocations that panicked
//! - `tcpserver_tls_handshake_failures_total` (counter): failed TLS negotiations
//!
//! Updates go through the `metrics` facade and are no-ops until a recorder
//! is installed, e.g. with [`init_metrics`].

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with an HTTP scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint started");
    Ok(())
}

pub fn connection_accepted() {
    counter!("tcpserver_connections_accepted_total").increment(1);
}

pub fn connection_rejected() {
    counter!("tcpserver_connections_rejected_total").increment(1);
}

pub fn connection_opened() {
    gauge!("tcpserver_active_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("tcpserver_active_connections").decrement(1.0);
}

pub fn accept_error() {
    counter!("tcpserver_accept_errors_total").increment(1);
}

pub fn handler_panic() {
    counter!("tcpserver_handler_panics_total").increment(1);
}

pub fn tls_handshake_failed() {
    counter!("tcpserver_tls_handshake_failures_total").increment(1);
}
