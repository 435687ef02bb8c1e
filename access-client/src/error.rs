//! Error types for the access client

use access_core::StateError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by [`crate::Client`]
#[derive(Error, Debug)]
pub enum ClientError {
    /// The call needs a live connection
    #[error("client not connected")]
    NotConnected,

    /// Connect or close lost the race against another caller
    #[error("client state not transitioned: {0}")]
    NotTransitioned(StateError),

    /// The CA certificate could not be read
    #[error("failed to read certificate {path}: {source}")]
    Credentials {
        /// Certificate path
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// The client was closed while this connect was still dialing
    #[error("connection closed while dialing")]
    Interrupted,

    /// Endpoint setup or dial failed
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The dial did not finish in time
    #[error("dial timed out after {0:?}")]
    DialTimeout(Duration),

    /// The overall call deadline passed
    #[error("call deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// The server answered with an error status
    #[error(transparent)]
    Status(#[from] tonic::Status),
}

impl From<StateError> for ClientError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotConnected => ClientError::NotConnected,
            other => ClientError::NotTransitioned(other),
        }
    }
}

impl ClientError {
    /// gRPC code carried by a server status, if any
    pub fn code(&self) -> Option<tonic::Code> {
        match self {
            ClientError::Status(status) => Some(status.code()),
            _ => None,
        }
    }
}
