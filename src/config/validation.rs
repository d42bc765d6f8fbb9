//! Configuration validation.
//!
//! Serde handles syntax; this module checks values. Every problem is
//! reported, not just the first one.

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::net::listener::resolve_listen_addr;

/// A single semantic problem in a [`ServerConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listen_address '{address}' is invalid: {reason}")]
    ListenAddress { address: String, reason: String },

    #[error("listen.fast_open_queue_len must be greater than 0 when fast_open is enabled")]
    FastOpenQueueLen,

    #[error("listen.backlog must be greater than 0")]
    Backlog,

    #[error("accept_backoff.base_delay_ms ({base}) exceeds max_delay_ms ({max})")]
    BackoffRange { base: u64, max: u64 },

    #[error("tls.{0} must not be empty")]
    EmptyTlsPath(&'static str),
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = resolve_listen_addr(&config.listen_address) {
        errors.push(ValidationError::ListenAddress {
            address: config.listen_address.clone(),
            reason: e.to_string(),
        });
    }

    if config.listen.fast_open && config.listen.fast_open_queue_len == 0 {
        errors.push(ValidationError::FastOpenQueueLen);
    }
    if config.listen.backlog == 0 {
        errors.push(ValidationError::Backlog);
    }

    let backoff = &config.accept_backoff;
    if backoff.base_delay_ms > backoff.max_delay_ms {
        errors.push(ValidationError::BackoffRange {
            base: backoff.base_delay_ms,
            max: backoff.max_delay_ms,
        });
    }

    if let Some(tls) = &config.tls {
        if tls.cert_path.trim().is_empty() {
            errors.push(ValidationError::EmptyTlsPath("cert_path"));
        }
        if tls.key_path.trim().is_empty() {
            errors.push(ValidationError::EmptyTlsPath("key_path"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
