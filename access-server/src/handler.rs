//! Authorization handler for the `access.Access` service

use crate::metrics::record_decision;
use crate::telemetry::authorization_span;
use access_core::proto::access_server::Access;
use access_core::proto::{AuthorizeReply, AuthorizeRequest, AuthorizeTokenRequest};
use access_core::{
    AccessError, ConnectionState, PolicyCache, PolicyEngine, Result, Subject, TokenAuthority,
};
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{debug, Instrument, Span};

/// Decides authorization queries
///
/// Each request runs through the same steps and stops at the first failure:
/// connection check, policy engine acquisition, field validation (first empty
/// field wins), token validation for the token form, then enforcement. A
/// denial is `Ok(false)`; every failure is an [`AccessError`].
#[derive(Clone)]
pub struct AccessService {
    state: Arc<ConnectionState>,
    authority: Arc<dyn TokenAuthority>,
    policies: Arc<PolicyCache>,
}

impl AccessService {
    /// Create a handler sharing the server's state and dependencies
    pub fn new(
        state: Arc<ConnectionState>,
        authority: Arc<dyn TokenAuthority>,
        policies: Arc<PolicyCache>,
    ) -> Self {
        Self {
            state,
            authority,
            policies,
        }
    }

    /// Decide for the owner of `token`
    pub async fn decide_token(&self, token: &str, resource: &str, action: &str) -> Result<bool> {
        self.state.ensure_connected()?;
        let engine = self.acquire_engine().await?;

        require(token, "token")?;
        require(resource, "resource")?;
        require(action, "action")?;

        let owner = self.authority.validate_management_token(token).await?;
        let subject = owner.subject();

        enforce(engine.as_ref(), &subject, resource, action)
    }

    /// Decide for an explicitly named subject
    pub async fn decide(&self, subject: &str, resource: &str, action: &str) -> Result<bool> {
        self.state.ensure_connected()?;
        let engine = self.acquire_engine().await?;

        require(subject, "subject")?;
        require(resource, "resource")?;
        require(action, "action")?;

        enforce(engine.as_ref(), &Subject::provided(subject), resource, action)
    }

    async fn acquire_engine(&self) -> Result<Arc<dyn PolicyEngine>> {
        self.policies
            .acquire()
            .await
            .map_err(AccessError::PolicyEngineUnavailable)
    }
}

fn require(value: &str, field: &'static str) -> Result<()> {
    if value.is_empty() {
        Err(AccessError::MissingField { field })
    } else {
        Ok(())
    }
}

fn enforce(engine: &dyn PolicyEngine, subject: &Subject, resource: &str, action: &str) -> Result<bool> {
    Span::current().record("subject", subject.as_str());

    let authorized = engine
        .enforce(subject.as_str(), resource, action)
        .map_err(AccessError::PolicyEvaluation)?;

    Span::current().record("authorized", authorized);
    debug!(subject = %subject, resource, action, authorized, "Decision made");
    Ok(authorized)
}

#[tonic::async_trait]
impl Access for AccessService {
    async fn authorize_token(
        &self,
        request: Request<AuthorizeTokenRequest>,
    ) -> std::result::Result<Response<AuthorizeReply>, Status> {
        let req = request.into_inner();
        let span = authorization_span("AuthorizeToken", &req.resource, &req.action);

        let authorized = self
            .decide_token(&req.token, &req.resource, &req.action)
            .instrument(span)
            .await?;

        record_decision("AuthorizeToken", authorized);
        Ok(Response::new(AuthorizeReply { authorized }))
    }

    async fn authorize(
        &self,
        request: Request<AuthorizeRequest>,
    ) -> std::result::Result<Response<AuthorizeReply>, Status> {
        let req = request.into_inner();
        let span = authorization_span("Authorize", &req.resource, &req.action);

        let authorized = self
            .decide(&req.subject, &req.resource, &req.action)
            .instrument(span)
            .await?;

        record_decision("Authorize", authorized);
        Ok(Response::new(AuthorizeReply { authorized }))
    }
}
