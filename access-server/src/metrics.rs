//! Prometheus metrics collection for the access server

use axum::{routing::get, Router};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;
use tonic::Code;
use tracing::warn;

/// Initialize all metric descriptions
pub fn init_metrics() {
    // Counters
    describe_counter!(
        "access_grpc_requests_total",
        "Total number of gRPC calls by method and status code"
    );
    describe_counter!(
        "access_authorization_decisions_total",
        "Total number of authorization decisions by method and verdict"
    );
    describe_counter!(
        "access_panics_recovered_total",
        "Total number of handler panics converted into Unknown statuses"
    );

    // Histograms
    describe_histogram!(
        "access_grpc_request_duration_seconds",
        "gRPC call latency in seconds"
    );

    // Gauges
    describe_gauge!(
        "access_health_serving",
        "1 when the health monitor last published SERVING, 0 otherwise"
    );
}

/// Record one finished gRPC call
pub fn record_server_call(method: &str, code: Code, elapsed: Duration) {
    counter!(
        "access_grpc_requests_total",
        "method" => method.to_string(),
        "code" => format!("{:?}", code)
    )
    .increment(1);
    histogram!(
        "access_grpc_request_duration_seconds",
        "method" => method.to_string()
    )
    .record(elapsed.as_secs_f64());
}

/// Record an authorization verdict
pub fn record_decision(method: &'static str, authorized: bool) {
    let verdict = if authorized { "allow" } else { "deny" };
    counter!(
        "access_authorization_decisions_total",
        "method" => method,
        "verdict" => verdict
    )
    .increment(1);
}

/// Record a recovered panic
pub fn record_panic(method: &str) {
    counter!("access_panics_recovered_total", "method" => method.to_string()).increment(1);
}

/// Update the health gauge
pub fn set_health(serving: bool) {
    gauge!("access_health_serving").set(if serving { 1.0 } else { 0.0 });
}

/// Storage for Prometheus handle
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Process-wide Prometheus handle, installing the recorder on first use
///
/// When another recorder is already installed the handle still renders, but
/// only its own (empty) registry.
pub fn prometheus_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                warn!("A metrics recorder is already installed");
            } else {
                init_metrics();
            }
            handle
        })
        .clone()
}

/// Router serving `GET /metrics` in Prometheus text format
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    )
}
