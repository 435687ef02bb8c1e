//! Client interceptor chain: metrics → retry
//!
//! Every unary call goes through [`ClientChain::unary`]. The metrics layer
//! wraps the retry layer, so it records the final outcome of a call once,
//! however many attempts it took.

use crate::metrics::{init_metrics, record_client_call};
use access_core::ClientConfig;
use std::future::Future;
use std::time::{Duration, Instant};
use tonic::{Code, Status};
use tracing::warn;

/// Status codes worth another attempt
pub const RETRYABLE_CODES: [Code; 4] = [
    Code::ResourceExhausted,
    Code::NotFound,
    Code::Aborted,
    Code::Unavailable,
];

/// Retry behaviour of the client chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay unit; the wait after attempt `n` is `base_backoff * n`
    pub base_backoff: Duration,
    /// Codes that trigger another attempt
    pub codes: Vec<Code>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            codes: RETRYABLE_CODES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff after the given 1-based attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * attempt
    }

    /// Whether a failure with `code` may be retried
    pub fn is_retryable(&self, code: Code) -> bool {
        self.codes.contains(&code)
    }
}

/// Composed client-side interceptors
#[derive(Debug, Clone, Default)]
pub struct ClientChain {
    metrics: bool,
    retry: Option<RetryPolicy>,
}

impl ClientChain {
    /// Chain with no layers
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain matching the toggles of a client config
    pub fn from_config(config: &ClientConfig) -> Self {
        let chain = Self::new().with_metrics(config.metrics);
        if config.retry {
            chain.with_retry(RetryPolicy::default())
        } else {
            chain
        }
    }

    /// Toggle the metrics layer, registering its descriptions when enabled
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        if enabled {
            init_metrics();
        }
        self.metrics = enabled;
        self
    }

    /// Install the retry layer
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Whether the metrics layer is installed
    pub fn metrics_enabled(&self) -> bool {
        self.metrics
    }

    /// Installed retry policy
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    /// Run a unary call through the chain
    ///
    /// `call` is invoked once per attempt and must build a fresh request each
    /// time.
    pub async fn unary<T, F, Fut>(&self, method: &'static str, mut call: F) -> Result<T, Status>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let start = Instant::now();

        let result = match &self.retry {
            Some(policy) => retry(policy, method, &mut call).await,
            None => call().await,
        };

        if self.metrics {
            let code = match &result {
                Ok(_) => Code::Ok,
                Err(status) => status.code(),
            };
            record_client_call(method, code, start.elapsed());
        }

        result
    }
}

async fn retry<T, F, Fut>(policy: &RetryPolicy, method: &str, call: &mut F) -> Result<T, Status>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Status>>,
{
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(status) if attempt < policy.max_attempts && policy.is_retryable(status.code()) => {
                let delay = policy.backoff(attempt);
                warn!(
                    method,
                    attempt,
                    code = ?status.code(),
                    delay_ms = delay.as_millis() as u64,
                    "Retrying call"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(status) => return Err(status),
        }
    }
}
