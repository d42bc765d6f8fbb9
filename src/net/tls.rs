//! TLS configuration loading and in-band upgrade.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::error::ServerError;
use crate::net::connection::Connection;
use crate::net::stream::Stream;

/// Load TLS configuration from certificate and key files (PEM).
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, io::Error> {
    // Basic validation
    if !cert_path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        ));
    }
    if !key_path.exists() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        ));
    }

    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("No certificates found in {:?}", cert_path),
        ));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("No private key found in {:?}", key_path),
            )
        })?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    Ok(Arc::new(config))
}

/// Negotiate TLS on a connection's plain stream using the server's TLS config.
///
/// Used for protocols that switch to TLS in-band (STARTTLS style). On a
/// failed handshake the stream is consumed and the connection is left
/// without one.
pub async fn upgrade<C: Connection>(conn: &mut C) -> Result<(), ServerError> {
    let config = conn
        .server()
        .and_then(|server| server.tls_config())
        .ok_or_else(|| ServerError::Config("no TLS config set".to_string()))?;

    let tcp = match conn.take_stream() {
        Some(Stream::Plain(tcp)) => tcp,
        Some(tls @ Stream::Tls(_)) => {
            conn.set_stream(tls);
            return Err(ServerError::State("connection already uses TLS"));
        }
        None => return Err(ServerError::State("connection has no stream")),
    };

    let tls = TlsAcceptor::from(config)
        .accept(tcp)
        .await
        .map_err(ServerError::Tls)?;
    conn.set_stream(Stream::Tls(Box::new(tls)));

    tracing::debug!(peer_addr = ?conn.client_addr(), "Connection upgraded to TLS");
    Ok(())
}
