//! gRPC client for the access service

use crate::chain::ClientChain;
use crate::error::ClientError;
use access_core::proto::access_client::AccessClient;
use access_core::proto::{AuthorizeReply, AuthorizeRequest, AuthorizeTokenRequest};
use access_core::{ClientConfig, ConnectionState};
use parking_lot::RwLock;
use std::future::Future;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};
use tonic::{Response, Status};
use tracing::{debug, error, info, warn, Span};

const AUTHORIZE_TOKEN: &str = "/access.Access/AuthorizeToken";
const AUTHORIZE: &str = "/access.Access/Authorize";

/// Client for the access decision service
///
/// A client connects once. Every call checks the connection state first and
/// fails with [`ClientError::NotConnected`] without touching the network when
/// the client is not connected.
pub struct Client {
    config: ClientConfig,
    state: ConnectionState,
    chain: ClientChain,
    slot: RwLock<Slot>,
    span: Span,
}

/// Live stub plus the generation of the connect that owns it
///
/// Every state transition happens under the slot lock and bumps the
/// generation, so a dial can tell whether it still owns the state.
#[derive(Default)]
struct Slot {
    generation: u64,
    rpc: Option<AccessClient<Channel>>,
}

impl Client {
    /// Create a disconnected client; zero config values resolve to defaults
    pub fn new(config: ClientConfig) -> Self {
        let config = config.with_defaults();
        let chain = ClientChain::from_config(&config);
        let span = tracing::info_span!("access_client", addr = %config.addr);
        Self {
            config,
            state: ConnectionState::new(),
            chain,
            slot: RwLock::new(Slot::default()),
            span,
        }
    }

    /// Log under the caller's span instead of the default one
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Replace the interceptor chain built from the config
    pub fn with_chain(mut self, chain: ClientChain) -> Self {
        self.chain = chain;
        self
    }

    /// Resolved configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Dial the server
    ///
    /// The state moves to connected before dialing, so only one concurrent
    /// caller dials. A failed dial moves it back, unless the client was closed
    /// in the meantime.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let generation = self.begin_connect()?;
        let dialed = self.dial().await;
        self.finish_connect(generation, dialed)
    }

    /// Drop the connection
    pub fn close(&self) -> Result<(), ClientError> {
        let mut slot = self.slot.write();
        self.state.close()?;
        slot.generation += 1;
        slot.rpc = None;
        debug!(parent: &self.span, "Connection closed");
        Ok(())
    }

    fn begin_connect(&self) -> Result<u64, ClientError> {
        let mut slot = self.slot.write();
        self.state.connect()?;
        slot.generation += 1;
        Ok(slot.generation)
    }

    fn finish_connect(
        &self,
        generation: u64,
        dialed: Result<Channel, ClientError>,
    ) -> Result<(), ClientError> {
        let mut slot = self.slot.write();
        if slot.generation != generation {
            debug!(parent: &self.span, "Dial finished after the connection was closed");
            return Err(dialed.err().unwrap_or(ClientError::Interrupted));
        }

        match dialed {
            Ok(channel) => {
                slot.rpc = Some(AccessClient::new(channel));
                info!(parent: &self.span, "Connected to access server");
                Ok(())
            }
            Err(e) => {
                if let Err(state) = self.state.close() {
                    warn!(parent: &self.span, error = %state, "Connection state already closed");
                }
                slot.generation += 1;
                error!(parent: &self.span, error = %e, "Failed to connect to access server");
                Err(e)
            }
        }
    }

    /// Whether the client is connected
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Local liveness: Ok exactly when connected
    pub fn health(&self) -> Result<(), ClientError> {
        self.state.ensure_connected().map_err(Into::into)
    }

    /// Ask whether the owner of `token` may perform `action` on `resource`
    pub async fn authorize_token(
        &self,
        token: &str,
        resource: &str,
        action: &str,
    ) -> Result<bool, ClientError> {
        let rpc = self.live_rpc()?;
        let request = AuthorizeTokenRequest {
            token: token.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
        };

        let reply = self
            .invoke(AUTHORIZE_TOKEN, move || {
                let mut rpc = rpc.clone();
                let request = request.clone();
                async move { rpc.authorize_token(request).await.map(Response::into_inner) }
            })
            .await?;

        Ok(reply.authorized)
    }

    /// Ask whether `subject` may perform `action` on `resource`
    pub async fn authorize(
        &self,
        subject: &str,
        resource: &str,
        action: &str,
    ) -> Result<bool, ClientError> {
        let rpc = self.live_rpc()?;
        let request = AuthorizeRequest {
            subject: subject.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
        };

        let reply = self
            .invoke(AUTHORIZE, move || {
                let mut rpc = rpc.clone();
                let request = request.clone();
                async move { rpc.authorize(request).await.map(Response::into_inner) }
            })
            .await?;

        Ok(reply.authorized)
    }

    fn live_rpc(&self) -> Result<AccessClient<Channel>, ClientError> {
        self.state.ensure_connected()?;
        // connected but not yet dialed counts as not connected
        self.slot.read().rpc.clone().ok_or(ClientError::NotConnected)
    }

    async fn invoke<F, Fut>(&self, method: &'static str, call: F) -> Result<AuthorizeReply, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<AuthorizeReply, Status>>,
    {
        let call = self.chain.unary(method, call);

        let result = match self.config.call_timeout() {
            Some(deadline) => tokio::time::timeout(deadline, call)
                .await
                .map_err(|_| ClientError::DeadlineExceeded(deadline))?,
            None => call.await,
        };

        result.map_err(|status| {
            debug!(parent: &self.span, method, code = ?status.code(), "Call failed");
            ClientError::Status(status)
        })
    }

    async fn dial(&self) -> Result<Channel, ClientError> {
        let scheme = if self.config.cert.is_empty() { "http" } else { "https" };
        let timeout = self.config.dial_timeout();

        let mut endpoint = Endpoint::from_shared(format!("{}://{}", scheme, self.config.addr))?
            .connect_timeout(timeout);

        if !self.config.cert.is_empty() {
            let pem = tokio::fs::read(&self.config.cert)
                .await
                .map_err(|source| ClientError::Credentials {
                    path: self.config.cert.clone(),
                    source,
                })?;
            let tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(pem));
            endpoint = endpoint.tls_config(tls)?;
        }

        match tokio::time::timeout(timeout, endpoint.connect()).await {
            Ok(channel) => Ok(channel?),
            Err(_) => Err(ClientError::DialTimeout(timeout)),
        }
    }
}
