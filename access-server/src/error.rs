//! Error types for server startup and serving

use access_core::{AuthorityError, StateError};
use thiserror::Error;

/// Why the server could not start or stopped serving
#[derive(Error, Debug)]
pub enum ServerError {
    /// Certificate or key could not be loaded
    #[error("failed to load TLS credentials from {path}: {source}")]
    Tls {
        /// File that failed
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// Token authority connect or ping failed
    #[error("token authority check failed: {0}")]
    Authority(#[from] AuthorityError),

    /// Listening socket could not be bound
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),

    /// The gRPC transport failed
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// `start` was called while another start or serve loop owns the server
    #[error("server is already running")]
    AlreadyRunning,

    /// The connection state refused the transition
    #[error("server state error: {0}")]
    State(#[from] StateError),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;
