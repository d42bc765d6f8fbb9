//! Configuration schema definitions.
//!
//! These are the typed structs the server core consumes. All of them derive
//! Serde traits so embedding applications can deserialize them from config
//! files; the core itself never reads a file on its own.

use serde::{Deserialize, Serialize};

/// Root configuration for a server instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:8080", ":8080", "localhost:0").
    pub listen_address: String,

    /// Socket tuning applied when the listener is created.
    pub listen: ListenConfig,

    /// Optional TLS certificate and key.
    pub tls: Option<TlsConfig>,

    /// Total connections accepted before the server stops accepting.
    /// Zero or negative means unlimited.
    pub max_accept_connections: i64,

    /// Grace period for a graceful shutdown in seconds (0 = wait indefinitely).
    pub shutdown_timeout_secs: u64,

    /// Retry policy for transient accept failures.
    pub accept_backoff: AcceptBackoffConfig,

    /// Connection reuse pool settings.
    pub pool: PoolConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
            listen: ListenConfig::default(),
            tls: None,
            max_accept_connections: 0,
            shutdown_timeout_secs: 30,
            accept_backoff: AcceptBackoffConfig::default(),
            pool: PoolConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listen socket options.
///
/// Applied exactly once, between socket creation and bind. Options the
/// platform does not support are skipped rather than treated as errors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Enable SO_REUSEPORT so several processes can share the port (Linux >= 3.9, BSDs).
    pub reuse_port: bool,

    /// Enable TCP_FASTOPEN on the listener (Linux >= 3.7).
    ///
    /// The kernel also needs `net.ipv4.tcp_fastopen` set to 2 or 3.
    pub fast_open: bool,

    /// Pending fast-open request queue length.
    pub fast_open_queue_len: u32,

    /// Enable TCP_DEFER_ACCEPT so accept only wakes once the peer sent data (Linux).
    pub defer_accept: bool,

    /// listen(2) backlog.
    pub backlog: u32,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            reuse_port: true,
            fast_open: false,
            fast_open_queue_len: 256,
            defer_accept: false,
            backlog: 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Backoff applied between failed accept calls.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AcceptBackoffConfig {
    /// Delay after the first failure in milliseconds.
    pub base_delay_ms: u64,

    /// Upper bound for a single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Consecutive failures after which the accept loop gives up (0 = never).
    pub max_consecutive_failures: u32,
}

impl Default for AcceptBackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 5,
            max_delay_ms: 1000,
            max_consecutive_failures: 64,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum idle connection objects retained for reuse (0 = unbounded).
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_idle: 1024 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
