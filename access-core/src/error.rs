//! Error types for authorization decisions

use crate::authority::AuthorityError;
use crate::connection::StateError;
use crate::policy::PolicyError;
use thiserror::Error;
use tonic::{Code, Status};

/// Why an authorization decision could not be made
///
/// A denial is not an error: handlers return `Ok(false)` for it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// The server has not finished its dependency checks
    #[error("server not connected")]
    NotConnected,

    /// A required request field is empty
    #[error("{field} field is required")]
    MissingField {
        /// Name of the first empty field
        field: &'static str,
    },

    /// Policy engine could not be built or loaded
    #[error("policy engine unavailable: {0}")]
    PolicyEngineUnavailable(PolicyError),

    /// Policy engine failed while evaluating
    #[error("policy evaluation failed: {0}")]
    PolicyEvaluation(PolicyError),

    /// Token authority refused or could not validate the token
    #[error(transparent)]
    TokenAuthority(#[from] AuthorityError),

    /// Unexpected fault inside the handler
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for authorization decisions
pub type Result<T> = std::result::Result<T, AccessError>;

impl From<StateError> for AccessError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotConnected => AccessError::NotConnected,
            other => AccessError::Internal(other.to_string()),
        }
    }
}

impl AccessError {
    /// gRPC code reported for this error
    pub fn code(&self) -> Code {
        match self {
            AccessError::NotConnected => Code::FailedPrecondition,
            AccessError::MissingField { .. } => Code::InvalidArgument,
            AccessError::PolicyEngineUnavailable(_) => Code::Unavailable,
            AccessError::PolicyEvaluation(_) => Code::Internal,
            AccessError::TokenAuthority(AuthorityError::Rejected(_)) => Code::Unauthenticated,
            AccessError::TokenAuthority(AuthorityError::Unavailable(_)) => Code::Unavailable,
            AccessError::Internal(_) => Code::Internal,
        }
    }
}

impl From<AccessError> for Status {
    fn from(err: AccessError) -> Self {
        Status::new(err.code(), err.to_string())
    }
}
