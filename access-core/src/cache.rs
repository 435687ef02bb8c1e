//! Policy cache with an explicit refresh policy
//!
//! The handler asks the cache for an engine on every request. With
//! [`RefreshPolicy::EveryRequest`] a fresh engine is built and loaded each time,
//! so every decision sees the latest stored rules. [`RefreshPolicy::Interval`]
//! reuses a loaded engine until it is older than the interval.

use crate::policy::{EnforcerFactory, PolicyEngine, PolicyError};
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// When a cached policy engine is rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Build and load a new engine for every acquisition
    EveryRequest,
    /// Reuse the loaded engine until it is older than the interval
    Interval(Duration),
}

struct CachedEngine {
    engine: Arc<dyn PolicyEngine>,
    loaded_at: Instant,
}

/// Hands out policy engines according to a [`RefreshPolicy`]
pub struct PolicyCache {
    factory: Arc<dyn EnforcerFactory>,
    policy: RefreshPolicy,
    slot: ArcSwapOption<CachedEngine>,
    reloads: AtomicU64,
}

impl PolicyCache {
    /// Create a cache over `factory`
    pub fn new(factory: Arc<dyn EnforcerFactory>, policy: RefreshPolicy) -> Self {
        Self {
            factory,
            policy,
            slot: ArcSwapOption::empty(),
            reloads: AtomicU64::new(0),
        }
    }

    /// Configured refresh policy
    pub fn refresh_policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Number of engines built so far
    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }

    /// Engine to evaluate the current request with
    pub async fn acquire(&self) -> Result<Arc<dyn PolicyEngine>, PolicyError> {
        match self.policy {
            RefreshPolicy::EveryRequest => self.rebuild().await,
            RefreshPolicy::Interval(max_age) => {
                if let Some(cached) = self.slot.load_full() {
                    if cached.loaded_at.elapsed() < max_age {
                        return Ok(cached.engine.clone());
                    }
                }
                let engine = self.rebuild().await.map_err(|e| {
                    warn!(error = %e, "Policy refresh failed");
                    e
                })?;
                self.slot.store(Some(Arc::new(CachedEngine {
                    engine: engine.clone(),
                    loaded_at: Instant::now(),
                })));
                Ok(engine)
            }
        }
    }

    /// Force the next acquisition to rebuild the engine
    pub fn invalidate(&self) {
        debug!("Policy cache invalidated");
        self.slot.store(None);
    }

    async fn rebuild(&self) -> Result<Arc<dyn PolicyEngine>, PolicyError> {
        let engine = self.factory.create().await?;
        self.reloads.fetch_add(1, Ordering::Relaxed);
        Ok(engine)
    }
}
