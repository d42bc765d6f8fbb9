//! Configuration types and the optional file-based wiring layer.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (typed, plain values)
//!     → Server::from_config / Server setters
//! ```
//!
//! # Design Decisions
//! - The server core only consumes the typed structs; loading files is the
//!   embedding application's choice
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::AcceptBackoffConfig;
pub use schema::ListenConfig;
pub use schema::ObservabilityConfig;
pub use schema::PoolConfig;
pub use schema::ServerConfig;
pub use schema::TlsConfig;
