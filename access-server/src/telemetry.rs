//! Logging and OpenTelemetry setup for the access server

use access_core::LogConfig;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    runtime,
    trace::{self, RandomIdGenerator, Sampler},
    Resource,
};
use std::time::Duration;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Upper bound on one OTLP export round trip
const OTLP_EXPORT_TIMEOUT: Duration = Duration::from_secs(3);

/// OTLP tracer for the configured collector, `None` when export is off
pub fn otlp_tracer(
    config: &LogConfig,
    service_name: &str,
) -> anyhow::Result<Option<opentelemetry_sdk::trace::Tracer>> {
    if config.otlp_endpoint.is_empty() {
        return Ok(None);
    }

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(config.otlp_endpoint.as_str())
        .with_timeout(OTLP_EXPORT_TIMEOUT);

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            trace::config()
                .with_sampler(sampler_for(sample_ratio(config)))
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", service_name.to_string()),
                    KeyValue::new("service.version", access_core::VERSION),
                ])),
        )
        .install_batch(runtime::Tokio)?;

    Ok(Some(tracer))
}

/// `OTEL_TRACES_SAMPLER_ARG` when it parses, the configured percentage otherwise
fn sample_ratio(config: &LogConfig) -> f64 {
    std::env::var("OTEL_TRACES_SAMPLER_ARG")
        .ok()
        .and_then(|arg| arg.parse::<f64>().ok())
        .unwrap_or_else(|| f64::from(config.trace_sample_percent) / 100.0)
}

fn sampler_for(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio <= 0.0 {
        Sampler::AlwaysOff
    } else {
        Sampler::TraceIdRatioBased(ratio)
    }
}

/// Install the global subscriber described by `config`
///
/// `RUST_LOG` overrides `config.level`. OTLP export is enabled only when an
/// endpoint is configured.
pub fn init_logging(config: &LogConfig, service_name: &str) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let otel_layer = otlp_tracer(config, service_name)?.map(OpenTelemetryLayer::new);

    let registry = Registry::default().with(filter).with(otel_layer);

    if config.json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry
            .with(fmt::layer().with_thread_ids(true).with_thread_names(true))
            .try_init()?;
    }

    Ok(())
}

/// Shutdown OpenTelemetry provider
pub fn shutdown_telemetry() {
    opentelemetry::global::shutdown_tracer_provider();
}

/// Root span handed to server components
pub fn server_span(service: &str, port: u16) -> Span {
    tracing::info_span!("access_server", service = %service, port)
}

/// Span covering one authorization decision
pub fn authorization_span(method: &'static str, resource: &str, action: &str) -> Span {
    tracing::info_span!(
        "authorize_request",
        method,
        resource = %resource,
        action = %action,
        otel.kind = "server",
        subject = tracing::field::Empty,
        authorized = tracing::field::Empty,
    )
}
