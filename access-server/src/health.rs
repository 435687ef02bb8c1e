//! Health monitor publishing serving status through `grpc.health.v1`

use crate::metrics::set_health;
use access_core::{ConnectionState, TokenAuthority};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tonic_health::server::HealthReporter;
use tonic_health::ServingStatus;
use tracing::{debug, info, warn, Span};

/// Serving status owned by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Last check passed
    Serving,
    /// Last check failed, or no check has run yet
    NotServing,
}

impl HealthStatus {
    fn from_check(healthy: bool) -> Self {
        if healthy {
            HealthStatus::Serving
        } else {
            HealthStatus::NotServing
        }
    }

    fn serving_status(self) -> ServingStatus {
        match self {
            HealthStatus::Serving => ServingStatus::Serving,
            HealthStatus::NotServing => ServingStatus::NotServing,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Serving => write!(f, "SERVING"),
            HealthStatus::NotServing => write!(f, "NOT_SERVING"),
        }
    }
}

/// Liveness check run on every tick
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Whether the instance can serve right now
    async fn check(&self) -> bool;
}

/// Probe used by the server: connected and the token authority answers
pub struct ServerProbe {
    state: Arc<ConnectionState>,
    authority: Arc<dyn TokenAuthority>,
}

impl ServerProbe {
    /// Probe over the server's state and authority
    pub fn new(state: Arc<ConnectionState>, authority: Arc<dyn TokenAuthority>) -> Self {
        Self { state, authority }
    }
}

#[async_trait]
impl HealthProbe for ServerProbe {
    async fn check(&self) -> bool {
        if !self.state.is_connected() {
            return false;
        }
        match self.authority.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Token authority ping failed");
                false
            }
        }
    }
}

/// Periodically re-checks liveness and republishes the serving status
pub struct HealthMonitor {
    service: String,
    interval: Duration,
    status: Arc<RwLock<HealthStatus>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    span: Span,
}

impl HealthMonitor {
    /// Monitor publishing under `service` every `interval`
    pub fn new(service: impl Into<String>, interval: Duration, span: Span) -> Self {
        Self {
            service: service.into(),
            interval,
            status: Arc::new(RwLock::new(HealthStatus::NotServing)),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
            span,
        }
    }

    /// Last published status
    pub fn status(&self) -> HealthStatus {
        *self.status.read()
    }

    /// Whether the background loop is running
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Publish `NotServing`, then check every interval until stopped
    ///
    /// Calling `start` on a running monitor is a no-op.
    pub async fn start(&self, mut reporter: HealthReporter, probe: Arc<dyn HealthProbe>) {
        if self.is_running() {
            return;
        }

        *self.status.write() = HealthStatus::NotServing;
        reporter
            .set_service_status(&self.service, ServingStatus::NotServing)
            .await;
        set_health(false);

        let (tx, mut rx) = watch::channel(false);
        let service = self.service.clone();
        let status = self.status.clone();
        let span = self.span.clone();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let task = tokio::spawn(async move {
            info!(parent: &span, service = %service, "Health monitor started");
            loop {
                tokio::select! {
                    biased;
                    _ = rx.changed() => break,
                    _ = ticker.tick() => {
                        let next = HealthStatus::from_check(probe.check().await);
                        if *rx.borrow() {
                            break;
                        }
                        let previous = std::mem::replace(&mut *status.write(), next);
                        if previous != next {
                            info!(parent: &span, service = %service, status = %next, "Health status changed");
                        }
                        reporter.set_service_status(&service, next.serving_status()).await;
                        set_health(next == HealthStatus::Serving);
                    }
                }
            }
            debug!(parent: &span, service = %service, "Health monitor stopped");
        });

        *self.shutdown.lock() = Some(tx);
        *self.task.lock() = Some(task);
    }

    /// Signal the loop and wait for it; no status is published afterwards
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(parent: &self.span, error = %e, "Health monitor task failed");
            }
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
