//! Error types surfaced by the server core.
//!
//! Construction, configuration and listen failures are returned to the
//! caller synchronously. Accept-loop failures are handled inside the loop
//! (retry or drain) and only escape as [`ServerError::Accept`] once transient
//! failures have persisted past the configured backoff budget.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors returned by [`Server`](crate::server::Server) operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be parsed or resolved.
    #[error("error resolving address '{address}': {reason}")]
    Address { address: String, reason: String },

    /// A required piece of configuration is missing or inconsistent.
    #[error("configuration error: {0}")]
    Config(String),

    /// Binding or listening on the socket failed.
    #[error("failed to listen on {address}: {source}")]
    Listen {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The operation is not valid in the server's current lifecycle phase.
    #[error("invalid server state: {0}")]
    State(&'static str),

    /// Accepting connections kept failing and the loop gave up.
    #[error("accept failed {attempts} consecutive times: {source}")]
    Accept {
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// TLS negotiation on an accepted stream failed.
    #[error("TLS negotiation failed: {0}")]
    Tls(#[source] io::Error),
}

impl ServerError {
    pub(crate) fn address(address: &str, reason: impl ToString) -> Self {
        ServerError::Address {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn listen_error_keeps_os_source() {
        let err = ServerError::Listen {
            address: "127.0.0.1:80".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert!(err.to_string().starts_with("failed to listen on 127.0.0.1:80"));
        let source = err.source().and_then(|s| s.downcast_ref::<io::Error>());
        assert_eq!(source.map(io::Error::kind), Some(io::ErrorKind::AddrInUse));
    }

    #[test]
    fn address_error_names_input() {
        let err = ServerError::address("nope", "invalid socket address");
        assert_eq!(
            err.to_string(),
            "error resolving address 'nope': invalid socket address"
        );
    }
}
