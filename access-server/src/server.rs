//! gRPC server lifecycle

use crate::error::{ServerError, ServerResult};
use crate::handler::AccessService;
use crate::health::{HealthMonitor, HealthStatus, ServerProbe};
use crate::interceptors::server_layers;
use crate::metrics::{metrics_router, prometheus_handle};
use access_core::proto::access_server::AccessServer;
use access_core::{
    ConnectionState, ConnectionStatus, EnforcerFactory, PolicyCache, ServerConfig, TokenAuthority,
};
use parking_lot::Mutex;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Identity, ServerTlsConfig};
use tracing::{error, info, warn, Span};

/// Access decision server
///
/// Dependencies are checked in [`Server::start`] before any traffic is
/// accepted; the connection state only becomes connected once they pass.
/// One start runs at a time: a concurrent or repeated start fails with
/// [`ServerError::AlreadyRunning`] before touching the running instance.
pub struct Server {
    config: ServerConfig,
    state: Arc<ConnectionState>,
    running: AtomicBool,
    authority: Arc<dyn TokenAuthority>,
    policies: Arc<PolicyCache>,
    monitor: HealthMonitor,
    metrics_task: Mutex<Option<JoinHandle<()>>>,
    span: Span,
}

impl Server {
    /// Create a disconnected server; zero config values resolve to defaults
    pub fn new(
        config: ServerConfig,
        authority: Arc<dyn TokenAuthority>,
        factory: Arc<dyn EnforcerFactory>,
        span: Span,
    ) -> Self {
        let config = config.with_defaults();
        let policies = Arc::new(PolicyCache::new(factory, config.refresh_policy()));
        let monitor = HealthMonitor::new(
            config.service.clone(),
            config.health_interval(),
            span.clone(),
        );

        Self {
            config,
            state: Arc::new(ConnectionState::new()),
            running: AtomicBool::new(false),
            authority,
            policies,
            monitor,
            metrics_task: Mutex::new(None),
            span,
        }
    }

    /// Resolved configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    /// Last status published by the health monitor
    pub fn health_status(&self) -> HealthStatus {
        self.monitor.status()
    }

    /// Policy cache used by the handler
    pub fn policies(&self) -> &Arc<PolicyCache> {
        &self.policies
    }

    /// Local health check: connected and the token authority answers
    pub async fn health(&self) -> ServerResult<()> {
        self.state.ensure_connected()?;
        self.authority.ping().await?;
        Ok(())
    }

    /// Bind the configured port and serve until `shutdown` resolves
    pub async fn start<F>(&self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let _run = self.claim_run()?;
        let tls = self.load_tls().await?;
        self.check_authority().await?;
        self.serve(None, tls, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn start_on<F>(&self, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let _run = self.claim_run()?;
        let tls = self.load_tls().await?;
        self.check_authority().await?;
        self.serve(Some(listener), tls, shutdown).await
    }

    fn claim_run(&self) -> ServerResult<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ServerError::AlreadyRunning)?;
        Ok(RunGuard(&self.running))
    }

    async fn load_tls(&self) -> ServerResult<Option<ServerTlsConfig>> {
        if !self.config.tls_enabled() {
            return Ok(None);
        }

        let cert = read_pem(&self.config.cert).await?;
        let key = read_pem(&self.config.key).await?;
        Ok(Some(
            ServerTlsConfig::new().identity(Identity::from_pem(cert, key)),
        ))
    }

    async fn check_authority(&self) -> ServerResult<()> {
        self.authority.connect().await?;
        self.authority.ping().await?;
        info!(parent: &self.span, "Token authority reachable");
        Ok(())
    }

    async fn serve<F>(
        &self,
        listener: Option<TcpListener>,
        tls: Option<ServerTlsConfig>,
        shutdown: F,
    ) -> ServerResult<()>
    where
        F: Future<Output = ()> + Send,
    {
        let layers = server_layers(&self.config, self.span.clone());

        let mut builder = tonic::transport::Server::builder();
        if let Some(tls) = tls {
            builder = builder.tls_config(tls)?;
        }

        let (reporter, health_service) = tonic_health::server::health_reporter();
        let service = AccessService::new(
            self.state.clone(),
            self.authority.clone(),
            self.policies.clone(),
        );
        let router = builder
            .layer(layers)
            .add_service(health_service)
            .add_service(AccessServer::new(service));

        self.monitor
            .start(
                reporter,
                Arc::new(ServerProbe::new(self.state.clone(), self.authority.clone())),
            )
            .await;

        let (listener, addr) = match self.bind(listener).await {
            Ok(bound) => bound,
            Err(e) => {
                self.monitor.stop().await;
                return Err(e);
            }
        };

        if let Some(port) = self.config.metrics_port() {
            self.spawn_metrics_endpoint(port);
        }

        if let Err(e) = self.state.connect() {
            self.shutdown_background().await;
            return Err(e.into());
        }

        info!(
            parent: &self.span,
            %addr,
            tls = self.config.tls_enabled(),
            service = %self.config.service,
            "Access server listening"
        );

        let result = router
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await;

        self.shutdown_background().await;
        if let Err(e) = self.state.close() {
            warn!(parent: &self.span, error = %e, "Connection state already closed");
        }

        match result {
            Ok(()) => {
                info!(parent: &self.span, "Access server stopped");
                Ok(())
            }
            Err(e) => {
                error!(parent: &self.span, error = %e, "Access server failed");
                Err(e.into())
            }
        }
    }

    async fn bind(&self, listener: Option<TcpListener>) -> ServerResult<(TcpListener, SocketAddr)> {
        let listener = match listener {
            Some(listener) => listener,
            None => {
                let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
                TcpListener::bind(addr).await.map_err(ServerError::Bind)?
            }
        };
        let addr = listener.local_addr().map_err(ServerError::Bind)?;
        Ok((listener, addr))
    }

    fn spawn_metrics_endpoint(&self, port: u16) {
        let handle = prometheus_handle();
        let span = self.span.clone();

        let task = tokio::spawn(async move {
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let listener = match TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(parent: &span, %addr, error = %e, "Failed to bind metrics endpoint");
                    return;
                }
            };

            info!(parent: &span, %addr, "Metrics endpoint listening");
            if let Err(e) = axum::serve(listener, metrics_router(handle)).await {
                error!(parent: &span, error = %e, "Metrics endpoint failed");
            }
        });

        if let Some(previous) = self.metrics_task.lock().replace(task) {
            previous.abort();
        }
    }

    async fn shutdown_background(&self) {
        self.monitor.stop().await;
        if let Some(task) = self.metrics_task.lock().take() {
            task.abort();
        }
    }
}

/// Releases the running flag when a start attempt ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn read_pem(path: &str) -> ServerResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|source| ServerError::Tls {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use access_core::config::METRICS_DISABLED;
    use access_core::{AdapterEnforcerFactory, MemoryAdapter, StaticTokenAuthority};

    fn server(config: ServerConfig, authority: Arc<StaticTokenAuthority>) -> Server {
        Server::new(
            ServerConfig {
                metrics: METRICS_DISABLED,
                ..config
            },
            authority,
            Arc::new(AdapterEnforcerFactory::new(Arc::new(MemoryAdapter::default()))),
            Span::none(),
        )
    }

    #[tokio::test]
    async fn test_new_server_disconnected() {
        let server = server(ServerConfig::default(), Arc::new(StaticTokenAuthority::default()));
        assert_eq!(server.status(), ConnectionStatus::Disconnected);
        assert_eq!(server.health_status(), HealthStatus::NotServing);
        assert_eq!(server.config().port, 8003);
        assert!(matches!(
            server.health().await,
            Err(ServerError::State(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_tls_files_abort_start() {
        let dir = tempfile::tempdir().unwrap();
        let server = server(
            ServerConfig {
                cert: dir.path().join("server.pem").display().to_string(),
                key: dir.path().join("server.key").display().to_string(),
                ..Default::default()
            },
            Arc::new(StaticTokenAuthority::default()),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = server.start_on(listener, std::future::pending()).await;
        assert!(matches!(result, Err(ServerError::Tls { .. })));
        assert_eq!(server.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_unreachable_authority_aborts_start() {
        let authority = Arc::new(StaticTokenAuthority::default());
        authority.set_reachable(false);
        let server = server(ServerConfig::default(), authority);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = server.start_on(listener, std::future::pending()).await;
        assert!(matches!(result, Err(ServerError::Authority(_))));
        assert_eq!(server.status(), ConnectionStatus::Disconnected);

        // a failed start releases the server for the next attempt
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = server.start_on(listener, std::future::pending()).await;
        assert!(matches!(result, Err(ServerError::Authority(_))));
    }

    #[tokio::test]
    async fn test_port_in_use_aborts_start() {
        let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let server = server(
            ServerConfig {
                port,
                ..Default::default()
            },
            Arc::new(StaticTokenAuthority::default()),
        );

        let result = server.start(std::future::pending()).await;
        assert!(matches!(result, Err(ServerError::Bind(_))));
        assert_eq!(server.status(), ConnectionStatus::Disconnected);
        assert!(!server.monitor.is_running());
    }
}
