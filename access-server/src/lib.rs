//! Access Server - gRPC authorization decision service
//!
//! This crate serves `access.Access` and `grpc.health.v1.Health` behind a
//! tower interceptor stack (metrics, logging, panic recovery), keeps the
//! health status current in the background and exposes Prometheus metrics on
//! a separate HTTP port.

pub mod error;
pub mod handler;
pub mod health;
pub mod interceptors;
pub mod metrics;
pub mod server;
pub mod telemetry;

pub use error::{ServerError, ServerResult};
pub use handler::AccessService;
pub use health::{HealthMonitor, HealthProbe, HealthStatus, ServerProbe};
pub use interceptors::{server_layers, LoggingLayer, MetricsLayer, RecoveryLayer};
pub use server::Server;
