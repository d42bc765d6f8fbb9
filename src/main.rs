//! Echo server built on the `tcpserver` core.
//!
//! Every byte a client sends is written back. Useful as a smoke test for
//! socket tuning, TLS setup and shutdown behaviour.
//!
//! ```text
//! tcpserver-echo --listen 127.0.0.1:7000
//! tcpserver-echo --config server.toml --metrics 127.0.0.1:9090
//! tcpserver-echo --listen :7443 --tls-cert cert.pem --tls-key key.pem
//! ```
//!
//! Ctrl+C starts a graceful shutdown; a second Ctrl+C halts immediately.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use tcpserver::config::{load_config, ServerConfig, TlsConfig};
use tcpserver::observability::{logging, metrics};
use tcpserver::{PooledConnection, Server};

#[derive(Parser, Debug)]
#[command(name = "tcpserver-echo")]
#[command(about = "TCP echo server", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(short, long)]
    listen: Option<String>,

    /// Stop after accepting this many connections
    #[arg(long)]
    max_accept: Option<i64>,

    /// PEM certificate chain; enables TLS together with --tls-key
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// PEM private key
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics: Option<SocketAddr>,

    /// Seconds to wait for connections on shutdown (0 = no limit)
    #[arg(long)]
    shutdown_timeout: Option<u64>,
}

impl Cli {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ServerConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen_address = listen;
        }
        if let Some(limit) = self.max_accept {
            config.max_accept_connections = limit;
        }
        if let (Some(cert), Some(key)) = (self.tls_cert, self.tls_key) {
            config.tls = Some(TlsConfig {
                cert_path: cert.display().to_string(),
                key_path: key.display().to_string(),
            });
        }
        if let Some(addr) = self.metrics {
            config.observability.metrics_enabled = true;
            config.observability.metrics_address = addr.to_string();
        }
        if let Some(secs) = self.shutdown_timeout {
            config.shutdown_timeout_secs = secs;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config()?;
    logging::init_logging(&config.observability.log_level)?;

    tracing::info!("tcpserver-echo v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = Server::from_config(&config)?;
    if config.tls.is_some() {
        server.listen_tls().await?;
    } else {
        server.listen().await?;
    }

    let mut serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve(echo).await }
    });

    tokio::select! {
        result = &mut serving => {
            result??;
            tracing::info!("Accept loop finished");
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => signal?,
    }

    tracing::info!(
        active = server.active_connections(),
        timeout_secs = config.shutdown_timeout_secs,
        "Shutdown signal received, draining connections"
    );

    let halt_on_second_signal = tokio::spawn({
        let server = server.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Second interrupt, halting");
                let _ = server.halt().await;
            }
        }
    });

    server
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await?;
    halt_on_second_signal.abort();
    serving.await??;

    tracing::info!(
        accepted = server.accepted_connections(),
        "Shutdown complete"
    );
    Ok(())
}

async fn echo(mut conn: PooledConnection) {
    let mut buf = [0u8; 4096];
    loop {
        match conn.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = conn.write_all(&buf[..n]).await {
                    tracing::debug!(error = %e, "Write failed");
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Read failed");
                break;
            }
        }
    }
    let _ = conn.close().await;
}
