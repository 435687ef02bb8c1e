//! Server interceptor chain: metrics → logging → recovery
//!
//! Every interceptor is a tower layer around the tonic router. The layers see
//! the HTTP/2 exchange of a call, so the same stack serves unary and
//! streaming methods. The gRPC outcome is read from the `grpc-status` response
//! header; a response without one (status sent in trailers) counts as `Ok`.

use crate::metrics::{record_panic, record_server_call};
use access_core::proto::HEALTH_CHECK_METHOD;
use access_core::ServerConfig;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tonic::body::BoxBody;
use tonic::{Code, Status};
use tower::layer::util::{Identity, Stack};
use tower::util::Either;
use tower::{Layer, Service, ServiceBuilder};
use tracing::{error, info, warn, Span};

type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

/// Layer stack installed on the server
pub type ServerLayers = Stack<
    Either<RecoveryLayer, Identity>,
    Stack<Either<LoggingLayer, Identity>, Stack<Either<MetricsLayer, Identity>, Identity>>,
>;

/// Build the server interceptor stack from the config toggles
///
/// Metrics is on whenever the metrics endpoint is. A disabled layer is left
/// out; with every toggle off the stack is the identity.
pub fn server_layers(config: &ServerConfig, span: Span) -> ServerLayers {
    ServiceBuilder::new()
        .option_layer(config.metrics_port().map(|_| MetricsLayer))
        .option_layer(config.logging.then(|| LoggingLayer::new(span.clone())))
        .option_layer(config.recovery.then(|| RecoveryLayer::new(span)))
        .into_inner()
}

/// Outcome code carried by a response
fn response_code<B>(response: &http::Response<B>) -> Code {
    Status::from_header_map(response.headers())
        .map(|status| status.code())
        .unwrap_or(Code::Ok)
}

/// Records call count and latency per method
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

/// Service produced by [`MetricsLayer`]
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for MetricsService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let method = req.uri().path().to_string();

        Box::pin(async move {
            let start = Instant::now();
            let result = inner.call(req).await;
            let code = match &result {
                Ok(response) => response_code(response),
                Err(_) => Code::Internal,
            };
            record_server_call(&method, code, start.elapsed());
            result
        })
    }
}

/// Whether a finished call is logged
///
/// Successful health checks are polled constantly and are left out.
pub fn should_log(method: &str, code: Code) -> bool {
    !(code == Code::Ok && method == HEALTH_CHECK_METHOD)
}

/// Log severity for a gRPC code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallLevel {
    /// Expected outcomes, including caller mistakes
    Info,
    /// Outcomes an operator may want to look at
    Warn,
    /// Server-side faults
    Error,
}

/// Map a gRPC code to the severity it is logged at
pub fn level_for(code: Code) -> CallLevel {
    match code {
        Code::Ok
        | Code::Cancelled
        | Code::InvalidArgument
        | Code::NotFound
        | Code::AlreadyExists
        | Code::Unauthenticated => CallLevel::Info,
        Code::DeadlineExceeded
        | Code::PermissionDenied
        | Code::ResourceExhausted
        | Code::FailedPrecondition
        | Code::Aborted
        | Code::OutOfRange
        | Code::Unavailable => CallLevel::Warn,
        Code::Unknown | Code::Unimplemented | Code::Internal | Code::DataLoss => CallLevel::Error,
    }
}

/// Emits one structured event per call
#[derive(Debug, Clone)]
pub struct LoggingLayer {
    span: Span,
}

impl LoggingLayer {
    /// Log under `span`
    pub fn new(span: Span) -> Self {
        Self { span }
    }
}

impl<S> Layer<S> for LoggingLayer {
    type Service = LoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        LoggingService {
            inner,
            span: self.span.clone(),
        }
    }
}

/// Service produced by [`LoggingLayer`]
#[derive(Debug, Clone)]
pub struct LoggingService<S> {
    inner: S,
    span: Span,
}

impl<S, ReqBody, ResBody> Service<http::Request<ReqBody>> for LoggingService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: std::fmt::Display,
    ReqBody: Send + 'static,
    ResBody: 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let span = self.span.clone();
        let method = req.uri().path().to_string();

        Box::pin(async move {
            let start = Instant::now();
            let result = inner.call(req).await;
            let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

            match &result {
                Ok(response) => {
                    let code = response_code(response);
                    if should_log(&method, code) {
                        match level_for(code) {
                            CallLevel::Info => {
                                info!(parent: &span, method = %method, code = ?code, latency_ms, "finished call")
                            }
                            CallLevel::Warn => {
                                warn!(parent: &span, method = %method, code = ?code, latency_ms, "finished call")
                            }
                            CallLevel::Error => {
                                error!(parent: &span, method = %method, code = ?code, latency_ms, "finished call")
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(parent: &span, method = %method, error = %e, latency_ms, "call failed")
                }
            }

            result
        })
    }
}

/// Turns handler panics into `Unknown` statuses
#[derive(Debug, Clone)]
pub struct RecoveryLayer {
    span: Span,
}

impl RecoveryLayer {
    /// Report recovered panics under `span`
    pub fn new(span: Span) -> Self {
        Self { span }
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = RecoveryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoveryService {
            inner,
            span: self.span.clone(),
        }
    }
}

/// Service produced by [`RecoveryLayer`]
#[derive(Debug, Clone)]
pub struct RecoveryService<S> {
    inner: S,
    span: Span,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for RecoveryService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let span = self.span.clone();
        let method = req.uri().path().to_string();

        Box::pin(async move {
            match AssertUnwindSafe(async move { inner.call(req).await })
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(parent: &span, method = %method, panic = %message, "Recovered from handler panic");
                    record_panic(&method);
                    Ok(Status::unknown(format!("panic triggered: {}", message)).into_http())
                }
            }
        })
    }
}
