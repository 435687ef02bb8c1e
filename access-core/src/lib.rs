//! Access Core - building blocks of the authorization decision service
//!
//! This crate holds the gRPC wire contract, the single-shot connection state,
//! configuration, the error taxonomy and the two external capabilities every
//! decision depends on: the token authority and the policy engine.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod authority;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
pub mod policy;
#[allow(missing_docs)]
pub mod proto;

pub use authority::{AuthorityError, StaticTokenAuthority, TokenAuthority, TokenOwner};
pub use cache::{PolicyCache, RefreshPolicy};
pub use config::{AppConfig, AuthorityConfig, ClientConfig, ConfigError, LogConfig, ServerConfig};
pub use connection::{ConnectionState, ConnectionStatus, StateError};
pub use error::{AccessError, Result};
pub use identity::Subject;
pub use policy::{
    AdapterEnforcerFactory, Enforcer, EnforcerFactory, FileAdapter, MemoryAdapter, PolicyAdapter,
    PolicyEngine, PolicyError, PolicyRule,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
