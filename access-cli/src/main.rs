//! Access CLI - command-line client for the access decision service

use access_client::Client;
use access_core::{policy::parse_policy_csv, AppConfig, ClientConfig};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::fs;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "access")]
#[command(about = "Access - query the authorization decision service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Server address as host:port
    #[arg(short, long, global = true, env = "ACCESS_ADDR", default_value = "localhost:8003")]
    addr: String,

    /// CA certificate enabling TLS
    #[arg(long, global = true)]
    cert: Option<String>,

    /// Dial timeout in milliseconds
    #[arg(long, global = true, default_value = "5000")]
    dial_timeout: u64,

    /// Retry calls failing with retryable codes
    #[arg(long, global = true)]
    retry: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "text")]
    format: Format,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the server and report liveness
    Health,

    /// Ask whether a subject may perform an action on a resource
    Authorize {
        /// Subject identity, usually user_customer
        #[arg(long)]
        subject: String,

        /// Resource being accessed
        #[arg(long)]
        resource: String,

        /// Action being performed
        #[arg(long)]
        action: String,
    },

    /// Ask whether the owner of a management token may perform an action
    AuthorizeToken {
        /// Management token
        #[arg(long)]
        token: String,

        /// Resource being accessed
        #[arg(long)]
        resource: String,

        /// Action being performed
        #[arg(long)]
        action: String,
    },

    /// Validate a server configuration or policy file offline
    Validate {
        /// Policy CSV file
        #[arg(long)]
        policy: Option<String>,

        /// Server TOML configuration
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("access_client=debug,access_core=debug")
            .init();
    }

    let config = ClientConfig {
        addr: cli.addr.clone(),
        cert: cli.cert.clone().unwrap_or_default(),
        dial_timeout: cli.dial_timeout,
        retry: cli.retry,
        ..Default::default()
    };

    match cli.command {
        Commands::Health => health_command(config, cli.format).await,
        Commands::Authorize {
            subject,
            resource,
            action,
        } => {
            let query = Query {
                kind: QueryKind::Subject(subject),
                resource,
                action,
            };
            authorize_command(config, query, cli.format).await
        }
        Commands::AuthorizeToken {
            token,
            resource,
            action,
        } => {
            let query = Query {
                kind: QueryKind::Token(token),
                resource,
                action,
            };
            authorize_command(config, query, cli.format).await
        }
        Commands::Validate { policy, config } => validate_command(policy, config),
    }
}

enum QueryKind {
    Subject(String),
    Token(String),
}

struct Query {
    kind: QueryKind,
    resource: String,
    action: String,
}

async fn connect(config: ClientConfig) -> Result<Client> {
    let addr = config.addr.clone();
    let client = Client::new(config);
    client
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", addr))?;
    Ok(client)
}

async fn health_command(config: ClientConfig, format: Format) -> Result<()> {
    let addr = config.addr.clone();
    let client = connect(config).await?;
    client.health()?;

    match format {
        Format::Json => println!(
            "{}",
            serde_json::json!({ "addr": addr, "status": "connected" })
        ),
        Format::Text => println!("{} Connected to {}", "✓".green(), addr),
    }

    client.close()?;
    Ok(())
}

async fn authorize_command(config: ClientConfig, query: Query, format: Format) -> Result<()> {
    let start = Instant::now();
    let client = connect(config).await?;

    let (who, authorized) = match &query.kind {
        QueryKind::Subject(subject) => (
            subject.clone(),
            client
                .authorize(subject, &query.resource, &query.action)
                .await
                .context("Authorization failed")?,
        ),
        QueryKind::Token(token) => (
            "<token>".to_string(),
            client
                .authorize_token(token, &query.resource, &query.action)
                .await
                .context("Authorization failed")?,
        ),
    };
    let elapsed = start.elapsed();

    match format {
        Format::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "authorized": authorized,
                "subject": who,
                "resource": query.resource,
                "action": query.action,
            }))?
        ),
        Format::Text => {
            let status = if authorized {
                "PERMITTED".green()
            } else {
                "DENIED".red()
            };

            println!("\n{} Authorization Result", "═".blue().bold());
            println!("{} Status: {}", "▸".blue(), status);
            println!("{} Subject: {}", "▸".blue(), who);
            println!("{} Resource: {}", "▸".blue(), query.resource);
            println!("{} Action: {}", "▸".blue(), query.action);
            println!(
                "{} Round trip: {:.3}ms",
                "▸".blue(),
                elapsed.as_secs_f64() * 1000.0
            );
        }
    }

    client.close()?;

    if !authorized {
        std::process::exit(1);
    }
    Ok(())
}

fn validate_command(policy: Option<String>, config: Option<String>) -> Result<()> {
    if policy.is_none() && config.is_none() {
        anyhow::bail!("Nothing to validate, pass --policy or --config");
    }

    let mut valid = true;

    if let Some(path) = config {
        println!("{} Validating {}...", "→".blue(), path);
        match AppConfig::load(&path) {
            Ok(config) => {
                let server = config.server.with_defaults();
                println!("{} Configuration is valid!", "✓".green());
                println!("  Port: {}", server.port);
                match server.metrics_port() {
                    Some(port) => println!("  Metrics port: {}", port),
                    None => println!("  Metrics: disabled"),
                }
                println!("  TLS: {}", server.tls_enabled());
                println!("  Tokens: {}", config.auth.tokens.len());
            }
            Err(e) => {
                println!("{} Configuration is invalid:", "✗".red());
                println!("  {}", e);
                valid = false;
            }
        }
    }

    if let Some(path) = policy {
        println!("{} Validating {}...", "→".blue(), path);
        let contents =
            fs::read_to_string(&path).with_context(|| format!("Failed to read file: {}", path))?;
        match parse_policy_csv(&contents) {
            Ok(rules) => {
                println!("{} Policy is valid!", "✓".green());
                println!("  Rules: {}", rules.len());
            }
            Err(e) => {
                println!("{} Policy is invalid:", "✗".red());
                println!("  {}", e);
                valid = false;
            }
        }
    }

    if !valid {
        std::process::exit(1);
    }
    Ok(())
}
