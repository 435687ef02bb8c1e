//! Token-validation authority contract
//!
//! The authority turns a management token into the customer and user that own
//! it. The server connects and pings it before serving and consults it for
//! every `AuthorizeToken` call.

use crate::identity::Subject;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Identity that owns a validated token
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenOwner {
    /// Owning customer
    pub customer_id: String,
    /// Owning user
    pub user_id: String,
}

impl TokenOwner {
    /// Create a token owner
    pub fn new(customer_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Subject used for policy evaluation
    pub fn subject(&self) -> Subject {
        Subject::from_owner(self)
    }
}

/// Errors reported by a token authority
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    /// The authority answered and refused the token
    #[error("token rejected: {0}")]
    Rejected(String),

    /// The authority could not be reached or is not connected
    #[error("token authority unavailable: {0}")]
    Unavailable(String),
}

/// Capability the server needs from the token authority
#[async_trait]
pub trait TokenAuthority: Send + Sync {
    /// Establish the connection to the authority
    async fn connect(&self) -> Result<(), AuthorityError>;

    /// Round-trip liveness check
    async fn ping(&self) -> Result<(), AuthorityError>;

    /// Validate a management token and return its owner
    async fn validate_management_token(&self, token: &str) -> Result<TokenOwner, AuthorityError>;
}

/// Authority backed by a fixed token table
///
/// Meant for development setups and tests; production deployments inject
/// their own [`TokenAuthority`].
#[derive(Debug)]
pub struct StaticTokenAuthority {
    tokens: HashMap<String, TokenOwner>,
    connected: AtomicBool,
    reachable: AtomicBool,
}

impl StaticTokenAuthority {
    /// Create an authority that knows the given tokens
    pub fn new(tokens: HashMap<String, TokenOwner>) -> Self {
        Self {
            tokens,
            connected: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
        }
    }

    /// Register one more token
    pub fn with_token(mut self, token: impl Into<String>, owner: TokenOwner) -> Self {
        self.tokens.insert(token.into(), owner);
        self
    }

    /// Simulate the authority going away or coming back
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), AuthorityError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(AuthorityError::Unavailable("authority unreachable".into()));
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(AuthorityError::Unavailable("authority not connected".into()));
        }
        Ok(())
    }
}

impl Default for StaticTokenAuthority {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

#[async_trait]
impl TokenAuthority for StaticTokenAuthority {
    async fn connect(&self) -> Result<(), AuthorityError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(AuthorityError::Unavailable("authority unreachable".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&self) -> Result<(), AuthorityError> {
        self.check_available()
    }

    async fn validate_management_token(&self, token: &str) -> Result<TokenOwner, AuthorityError> {
        self.check_available()?;
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AuthorityError::Rejected("unknown management token".into()))
    }
}
