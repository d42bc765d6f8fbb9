//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tcpserver::{Connection, PooledConnection, Server, ServerError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

/// Path of a file under `tests/fixtures`.
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Echo every byte back until the peer closes.
pub async fn echo<C: Connection>(mut conn: PooledConnection<C>) {
    let mut buf = [0u8; 1024];
    loop {
        match conn.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if conn.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Bind a plain echo server on an ephemeral loopback port and start serving.
pub async fn start_echo_server() -> (Server, SocketAddr, JoinHandle<Result<(), ServerError>>) {
    let server = Server::new("127.0.0.1:0").unwrap();
    server.listen().await.unwrap();
    let addr = server.listen_addr().unwrap();
    let serving = spawn_serve(&server, echo);
    (server, addr, serving)
}

/// Run `serve` on its own task.
pub fn spawn_serve<C, F, Fut>(server: &Server<C>, handler: F) -> JoinHandle<Result<(), ServerError>>
where
    C: Connection,
    F: Fn(PooledConnection<C>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let server = server.clone();
    tokio::spawn(async move { server.serve(handler).await })
}

/// Send `msg` on a fresh connection and read the same number of bytes back.
pub async fn roundtrip(addr: SocketAddr, msg: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(msg).await.unwrap();
    let mut reply = vec![0u8; msg.len()];
    stream.read_exact(&mut reply).await.unwrap();
    reply
}

/// Poll `check` every 10ms until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// TLS client that trusts the self-signed fixture certificate.
pub fn tls_connector() -> TlsConnector {
    let pem = std::fs::read(fixture("cert.pem")).unwrap();
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        roots.add(cert.unwrap()).unwrap();
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}
