//! TCP listener creation with tuned socket options.
//!
//! # Responsibilities
//! - Resolve the configured listen address
//! - Create the socket for the address family (IPv4 vs IPv6)
//! - Apply socket options before bind
//! - Bind, listen, and hand the socket to Tokio

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};

use crate::config::ListenConfig;
use crate::error::ServerError;
use crate::net::sockopt::{apply_listen_socket_options, AppliedOptions};

/// Resolve a listen address string.
///
/// Accepts `host:port`, `ip:port`, `[v6]:port` and the bare `:port` form,
/// which listens on all IPv4 interfaces. Hostnames resolving to several
/// addresses prefer the first IPv4 result.
pub fn resolve_listen_addr(address: &str) -> Result<SocketAddr, ServerError> {
    let candidate = if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    };

    let addrs: Vec<SocketAddr> = candidate
        .to_socket_addrs()
        .map_err(|e| ServerError::address(address, e))?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| ServerError::address(address, "no addresses found"))
}

/// A bound TCP listener.
#[derive(Debug)]
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Address the OS actually bound (resolves port 0).
    local_addr: SocketAddr,
    /// Which socket options took effect.
    applied: AppliedOptions,
}

impl Listener {
    /// Create, tune, bind and listen.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(addr: SocketAddr, config: &ListenConfig) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        let applied = apply_listen_socket_options(&socket, config)?;
        if addr.is_ipv6() {
            // IPv6 listeners never claim the IPv4 port as well.
            socket.set_only_v6(true)?;
        }

        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        let backlog = i32::try_from(config.backlog).unwrap_or(i32::MAX);
        socket.listen(backlog)?;

        let listener: std::net::TcpListener = socket.into();
        let inner = TcpListener::from_std(listener)?;
        let local_addr = inner.local_addr()?;

        tracing::info!(
            address = %local_addr,
            backlog = config.backlog,
            options = ?applied,
            "Listener bound"
        );

        Ok(Self {
            inner,
            local_addr,
            applied,
        })
    }

    /// Accept a new connection.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, addr) = self.inner.accept().await?;
        tracing::trace!(peer_addr = %addr, "Connection accepted");
        Ok((stream, addr))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Socket options as applied at creation time.
    pub fn applied_options(&self) -> &AppliedOptions {
        &self.applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::sockopt::{OptionOutcome, SocketOption};

    #[test]
    fn resolves_literal_addresses() {
        assert_eq!(
            resolve_listen_addr("127.0.0.1:8080").unwrap(),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );
        assert!(resolve_listen_addr("[::1]:9000").unwrap().is_ipv6());
    }

    #[test]
    fn bare_port_listens_on_all_interfaces() {
        let addr = resolve_listen_addr(":7001").unwrap();
        assert_eq!(addr, "0.0.0.0:7001".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            resolve_listen_addr("no-port-here"),
            Err(ServerError::Address { .. })
        ));
        assert!(resolve_listen_addr("127.0.0.1:99999").is_err());
    }

    #[tokio::test]
    async fn binds_ephemeral_port() {
        let config = ListenConfig {
            reuse_port: false,
            ..ListenConfig::default()
        };
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), &config).unwrap();

        assert_ne!(listener.local_addr().port(), 0);
        assert_eq!(
            listener.applied_options().outcome(SocketOption::ReusePort),
            Some(OptionOutcome::Disabled)
        );

        let client = TcpStream::connect(listener.local_addr()).await.unwrap();
        let (_, peer) = listener.accept().await.unwrap();
        assert_eq!(peer, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn ipv6_listener_leaves_ipv4_port_free() {
        let Ok(loopback_v6) = std::net::TcpListener::bind("[::1]:0") else {
            return; // no IPv6 on this host
        };
        drop(loopback_v6);

        let v4 = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        let port = v4.local_addr().unwrap().port();
        let config = ListenConfig {
            reuse_port: false,
            ..ListenConfig::default()
        };

        let addr: SocketAddr = format!("[::]:{}", port).parse().unwrap();
        let listener = Listener::bind(addr, &config).unwrap();
        assert_eq!(listener.local_addr().port(), port);
        assert!(listener.local_addr().is_ipv6());
    }
}
