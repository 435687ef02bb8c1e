//! Client call metrics

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Duration;
use tonic::Code;

/// Initialize client metric descriptions
pub fn init_metrics() {
    describe_counter!(
        "access_client_requests_total",
        "Total number of client calls by method and final status code"
    );
    describe_histogram!(
        "access_client_request_duration_seconds",
        "Client call latency in seconds, retries included"
    );
}

/// Record the final outcome of one client call
pub fn record_client_call(method: &'static str, code: Code, elapsed: Duration) {
    counter!(
        "access_client_requests_total",
        "method" => method,
        "code" => format!("{:?}", code)
    )
    .increment(1);
    histogram!("access_client_request_duration_seconds", "method" => method)
        .record(elapsed.as_secs_f64());
}
