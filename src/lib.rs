//! Protocol-agnostic TCP connection server.
//!
//! A [`Server`] owns a listening socket, accepts connections, recycles
//! per-connection objects through a pool, and runs a user-supplied handler
//! for each connection on its own task. It supports graceful and immediate
//! shutdown, TLS (for every connection or upgraded in-band), and listen
//! socket tuning (port reuse, fast open, deferred accept).
//!
//! ```no_run
//! use std::time::Duration;
//! use tcpserver::{PooledConnection, Server};
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//!
//! # async fn run() -> Result<(), tcpserver::ServerError> {
//! let server = Server::new("127.0.0.1:7000")?;
//! server.listen().await?;
//!
//! let serving = server.clone();
//! tokio::spawn(async move {
//!     serving
//!         .serve(|mut conn: PooledConnection| async move {
//!             let mut buf = [0u8; 1024];
//!             while let Ok(n) = conn.read(&mut buf).await {
//!                 if n == 0 || conn.write_all(&buf[..n]).await.is_err() {
//!                     break;
//!                 }
//!             }
//!         })
//!         .await
//! });
//!
//! server.shutdown(Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod server;

pub use config::{ListenConfig, ServerConfig};
pub use error::ServerError;
pub use net::connection::{Connection, ConnectionContext, TcpConn};
pub use net::stream::Stream;
pub use server::{PooledConnection, Server, ServerHandle, ServerPhase};
