//! End-to-end tests: a real server on 127.0.0.1:0 and the access client

use access_client::{Client, ClientError};
use access_core::config::METRICS_DISABLED;
use access_core::{
    AdapterEnforcerFactory, ClientConfig, ConnectionStatus, EnforcerFactory, MemoryAdapter,
    PolicyEngine, PolicyError, PolicyRule, ServerConfig, StaticTokenAuthority, TokenOwner,
};
use access_server::{HealthStatus, Server, ServerError};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tonic::transport::Endpoint;
use tonic::Code;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;
use tracing::Span;

/// Engine wrapper counting enforcements; panics on the `explode` resource
struct CountingEngine {
    inner: Arc<dyn PolicyEngine>,
    enforced: Arc<AtomicUsize>,
}

#[async_trait]
impl PolicyEngine for CountingEngine {
    async fn load_policy(&self) -> Result<(), PolicyError> {
        self.inner.load_policy().await
    }

    fn enforce(&self, subject: &str, resource: &str, action: &str) -> Result<bool, PolicyError> {
        self.enforced.fetch_add(1, Ordering::SeqCst);
        if resource == "explode" {
            panic!("policy engine exploded");
        }
        self.inner.enforce(subject, resource, action)
    }
}

struct CountingFactory {
    inner: AdapterEnforcerFactory,
    created: AtomicUsize,
    enforced: Arc<AtomicUsize>,
    fail: AtomicBool,
}

#[async_trait]
impl EnforcerFactory for CountingFactory {
    async fn create(&self) -> Result<Arc<dyn PolicyEngine>, PolicyError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PolicyError::Adapter("policy store down".into()));
        }
        Ok(Arc::new(CountingEngine {
            inner: self.inner.create().await?,
            enforced: self.enforced.clone(),
        }))
    }
}

struct Harness {
    server: Arc<Server>,
    addr: SocketAddr,
    adapter: Arc<MemoryAdapter>,
    factory: Arc<CountingFactory>,
    authority: Arc<StaticTokenAuthority>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), ServerError>>>,
}

impl Harness {
    async fn start() -> Self {
        let adapter = Arc::new(MemoryAdapter::new(vec![PolicyRule::new(
            "user1_cust1",
            "data",
            "read",
        )]));
        let factory = Arc::new(CountingFactory {
            inner: AdapterEnforcerFactory::new(adapter.clone()),
            created: AtomicUsize::new(0),
            enforced: Arc::new(AtomicUsize::new(0)),
            fail: AtomicBool::new(false),
        });
        let authority = Arc::new(
            StaticTokenAuthority::default().with_token("goodtoken", TokenOwner::new("cust1", "user1")),
        );

        let server = Arc::new(Server::new(
            ServerConfig {
                metrics: METRICS_DISABLED,
                health_interval_ms: 50,
                ..Default::default()
            },
            authority.clone(),
            factory.clone(),
            Span::none(),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();

        let task = tokio::spawn({
            let server = server.clone();
            async move {
                server
                    .start_on(listener, async {
                        let _ = stopped.await;
                    })
                    .await
            }
        });

        for _ in 0..100 {
            if server.status() == ConnectionStatus::Connected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.status(), ConnectionStatus::Connected);

        Self {
            server,
            addr,
            adapter,
            factory,
            authority,
            stop: Some(stop),
            task: Some(task),
        }
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            addr: self.addr.to_string(),
            ..Default::default()
        }
    }

    async fn client(&self) -> Client {
        let client = Client::new(self.client_config());
        client.connect().await.unwrap();
        client
    }

    async fn wait_for_health(&self, expected: HealthStatus) -> HealthStatus {
        for _ in 0..100 {
            if self.server.health_status() == expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.server.health_status()
    }

    fn enforced(&self) -> usize {
        self.factory.enforced.load(Ordering::SeqCst)
    }

    async fn shutdown(mut self) -> Result<(), ServerError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.take().unwrap().await.unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[tokio::test]
async fn test_authorize_allow_and_deny() {
    let harness = Harness::start().await;
    let client = harness.client().await;

    assert!(client.authorize("user1_cust1", "data", "read").await.unwrap());
    assert!(!client.authorize("user1_cust1", "data", "write").await.unwrap());
    assert!(!client.authorize("user2_cust1", "data", "read").await.unwrap());

    harness.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_empty_store_denies() {
    let harness = Harness::start().await;
    harness
        .adapter
        .remove_rule(&PolicyRule::new("user1_cust1", "data", "read"));
    let client = harness.client().await;

    assert!(!client.authorize("user1_cust1", "data", "read").await.unwrap());
}

#[tokio::test]
async fn test_policy_changes_seen_by_next_request() {
    let harness = Harness::start().await;
    let client = harness.client().await;

    assert!(!client.authorize("user2_cust1", "data", "write").await.unwrap());
    harness
        .adapter
        .add_rule(PolicyRule::new("user2_cust1", "data", "write"));
    assert!(client.authorize("user2_cust1", "data", "write").await.unwrap());
}

#[tokio::test]
async fn test_authorize_token() {
    let harness = Harness::start().await;
    let client = harness.client().await;

    assert!(client.authorize_token("goodtoken", "data", "read").await.unwrap());
    assert!(!client.authorize_token("goodtoken", "data", "delete").await.unwrap());
}

#[tokio::test]
async fn test_bad_token_rejected_without_enforcement() {
    let harness = Harness::start().await;
    let client = harness.client().await;

    let err = client
        .authorize_token("badtoken", "data", "read")
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some(Code::Unauthenticated));
    assert_eq!(harness.enforced(), 0);
}

#[tokio::test]
async fn test_missing_field_reported() {
    let harness = Harness::start().await;
    let client = harness.client().await;

    match client.authorize("user1_cust1", "", "read").await {
        Err(ClientError::Status(status)) => {
            assert_eq!(status.code(), Code::InvalidArgument);
            assert_eq!(status.message(), "resource field is required");
        }
        other => panic!("unexpected result: {:?}", other),
    }

    let err = client.authorize_token("", "", "").await.unwrap_err();
    match err {
        ClientError::Status(status) => assert_eq!(status.message(), "token field is required"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(harness.enforced(), 0);
}

#[tokio::test]
async fn test_panic_recovered_and_server_keeps_serving() {
    let harness = Harness::start().await;
    let client = harness.client().await;

    let err = client
        .authorize("user1_cust1", "explode", "read")
        .await
        .unwrap_err();
    match err {
        ClientError::Status(status) => {
            assert_eq!(status.code(), Code::Unknown);
            assert_eq!(status.message(), "panic triggered: policy engine exploded");
        }
        other => panic!("unexpected error: {:?}", other),
    }

    assert!(client.authorize("user1_cust1", "data", "read").await.unwrap());
}

#[tokio::test]
async fn test_disconnected_client_makes_no_calls() {
    let harness = Harness::start().await;
    let client = Client::new(harness.client_config());

    assert!(matches!(
        client.authorize("user1_cust1", "data", "read").await,
        Err(ClientError::NotConnected)
    ));
    assert!(matches!(
        client.authorize_token("goodtoken", "data", "read").await,
        Err(ClientError::NotConnected)
    ));
    assert_eq!(harness.factory.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_client_retries_unavailable() {
    let harness = Harness::start().await;
    harness.factory.fail.store(true, Ordering::SeqCst);

    let client = Client::new(ClientConfig {
        retry: true,
        ..harness.client_config()
    });
    client.connect().await.unwrap();

    let err = client.authorize("user1_cust1", "data", "read").await.unwrap_err();
    assert_eq!(err.code(), Some(Code::Unavailable));
    assert_eq!(harness.factory.created.load(Ordering::SeqCst), 3);

    harness.factory.fail.store(false, Ordering::SeqCst);
    assert!(client.authorize("user1_cust1", "data", "read").await.unwrap());
}

#[tokio::test]
async fn test_call_deadline_bounds_retries() {
    let harness = Harness::start().await;
    harness.factory.fail.store(true, Ordering::SeqCst);

    let client = Client::new(ClientConfig {
        retry: true,
        call_timeout: 50,
        ..harness.client_config()
    });
    client.connect().await.unwrap();

    assert!(matches!(
        client.authorize("user1_cust1", "data", "read").await,
        Err(ClientError::DeadlineExceeded(_))
    ));
}

#[tokio::test]
async fn test_concurrent_connects_single_winner() {
    let harness = Harness::start().await;
    let client = Arc::new(Client::new(harness.client_config()));

    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.connect().await })
        })
        .collect();

    let mut connected = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(()) => connected += 1,
            Err(e) => assert!(matches!(e, ClientError::NotTransitioned(_)), "{:?}", e),
        }
    }

    assert_eq!(connected, 1);
    assert!(client.health().is_ok());
}

#[tokio::test]
async fn test_health_service_reports_serving() {
    let harness = Harness::start().await;
    let channel = Endpoint::from_shared(format!("http://{}", harness.addr))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut health = HealthClient::new(channel);

    let mut status = ServingStatus::Unknown;
    for _ in 0..50 {
        status = health
            .check(HealthCheckRequest {
                service: "access".into(),
            })
            .await
            .unwrap()
            .into_inner()
            .status();
        if status == ServingStatus::Serving {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(status, ServingStatus::Serving);
    assert_eq!(harness.server.health_status(), HealthStatus::Serving);
    assert!(harness.server.health().await.is_ok());
}

#[tokio::test]
async fn test_shutdown_disconnects() {
    let harness = Harness::start().await;
    let server = harness.server.clone();

    harness.shutdown().await.unwrap();

    assert_eq!(server.status(), ConnectionStatus::Disconnected);
    assert!(server.health().await.is_err());
}

#[tokio::test]
async fn test_second_start_leaves_running_server_untouched() {
    let harness = Harness::start().await;
    assert_eq!(
        harness.wait_for_health(HealthStatus::Serving).await,
        HealthStatus::Serving
    );

    let other = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let result = harness
        .server
        .start_on(other, std::future::pending())
        .await;
    assert!(matches!(result, Err(ServerError::AlreadyRunning)));
    assert_eq!(harness.server.status(), ConnectionStatus::Connected);

    // the running instance still monitors its dependencies
    harness.authority.set_reachable(false);
    assert_eq!(
        harness.wait_for_health(HealthStatus::NotServing).await,
        HealthStatus::NotServing
    );

    let client = harness.client().await;
    assert!(client.authorize("user1_cust1", "data", "read").await.unwrap());
}
