//! Access gRPC server binary

use access_core::{
    AdapterEnforcerFactory, AppConfig, FileAdapter, MemoryAdapter, PolicyAdapter,
    StaticTokenAuthority,
};
use access_server::{telemetry, Server};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "access-server")]
#[command(about = "gRPC authorization decision service", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "ACCESS_CONFIG")]
    config: Option<PathBuf>,

    /// Override the gRPC listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the policy file
    #[arg(long)]
    policy: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(policy) = &cli.policy {
        config.server.policy_path = policy.display().to_string();
    }

    telemetry::init_logging(&config.log, "access-server")?;
    info!("Starting access server v{}", env!("CARGO_PKG_VERSION"));

    let adapter: Arc<dyn PolicyAdapter> = if config.server.policy_path.is_empty() {
        warn!("No policy file configured, every request will be denied");
        Arc::new(MemoryAdapter::default())
    } else {
        info!(path = %config.server.policy_path, "Using policy file");
        Arc::new(FileAdapter::new(&config.server.policy_path))
    };

    let authority = Arc::new(StaticTokenAuthority::new(config.auth.tokens.clone()));
    let span = {
        let resolved = config.server.clone().with_defaults();
        telemetry::server_span(&resolved.service, resolved.port)
    };

    let server = Server::new(
        config.server,
        authority,
        Arc::new(AdapterEnforcerFactory::new(adapter)),
        span,
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, shutting down gracefully...");
    };

    let result = server.start(shutdown).await;

    if !config.log.otlp_endpoint.is_empty() {
        info!("Flushing OpenTelemetry traces...");
        telemetry::shutdown_telemetry();
    }

    result.context("Server error")?;
    info!("Server shutdown complete");
    Ok(())
}
