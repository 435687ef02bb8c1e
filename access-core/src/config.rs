//! Configuration for the access server and client
//!
//! Configs deserialize from TOML with every field optional. Zero values mean
//! "use the default"; `with_defaults` resolves them once, at component
//! construction, and the result is never mutated afterwards.

use crate::authority::TokenOwner;
use crate::cache::RefreshPolicy;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Default gRPC port of the server
pub const DEFAULT_PORT: u16 = 8003;
/// Default metrics port of the server
pub const DEFAULT_METRICS_PORT: i32 = 5053;
/// Metrics port value that disables the metrics endpoint
pub const METRICS_DISABLED: i32 = -1;
/// Default health monitor period
pub const DEFAULT_HEALTH_INTERVAL_MS: u64 = 5000;
/// Default policy refresh period when caching is enabled
pub const DEFAULT_POLICY_REFRESH_SECS: u64 = 30;
/// Default registered service name
pub const DEFAULT_SERVICE: &str = "access";
/// Default server address used by the client
pub const DEFAULT_ADDR: &str = "localhost:8009";
/// Default dial timeout of the client
pub const DEFAULT_DIAL_TIMEOUT_MS: u64 = 5000;
/// Dial timeouts below this are replaced by the default
pub const MIN_DIAL_TIMEOUT_MS: u64 = 1000;

/// Errors raised while reading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that failed
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// gRPC listen port, 0 selects [`DEFAULT_PORT`]
    pub port: u16,
    /// PEM certificate; TLS is enabled only when `key` is set too
    pub cert: String,
    /// PEM private key
    pub key: String,
    /// Metrics port, 0 selects the default and -1 disables the endpoint
    pub metrics: i32,
    /// Log every call through the logging layer
    pub logging: bool,
    /// Convert handler panics into `Unknown` statuses
    pub recovery: bool,
    /// Reuse loaded policy between requests
    pub caching: bool,
    /// Policy refresh period when caching, 0 selects the default
    pub policy_refresh_secs: u64,
    /// Health monitor period, 0 selects the default
    pub health_interval_ms: u64,
    /// Casbin-style CSV policy file
    pub policy_path: String,
    /// Name registered with the health service
    pub service: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            cert: String::new(),
            key: String::new(),
            metrics: 0,
            logging: true,
            recovery: true,
            caching: false,
            policy_refresh_secs: 0,
            health_interval_ms: 0,
            policy_path: String::new(),
            service: String::new(),
        }
    }
}

impl ServerConfig {
    /// Resolve zero values to defaults
    pub fn with_defaults(mut self) -> Self {
        if self.port == 0 {
            self.port = DEFAULT_PORT;
        }
        if self.metrics == 0 {
            self.metrics = DEFAULT_METRICS_PORT;
        }
        if self.health_interval_ms == 0 {
            self.health_interval_ms = DEFAULT_HEALTH_INTERVAL_MS;
        }
        if self.caching && self.policy_refresh_secs == 0 {
            self.policy_refresh_secs = DEFAULT_POLICY_REFRESH_SECS;
        }
        if self.service.is_empty() {
            self.service = DEFAULT_SERVICE.to_string();
        }
        self
    }

    /// Whether both TLS files are configured
    pub fn tls_enabled(&self) -> bool {
        !self.cert.is_empty() && !self.key.is_empty()
    }

    /// Metrics port, if the endpoint is enabled
    pub fn metrics_port(&self) -> Option<u16> {
        u16::try_from(self.metrics).ok().filter(|port| *port > 0)
    }

    /// Health monitor period
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    /// Policy refresh policy derived from the caching toggle
    pub fn refresh_policy(&self) -> RefreshPolicy {
        if self.caching {
            RefreshPolicy::Interval(Duration::from_secs(self.policy_refresh_secs))
        } else {
            RefreshPolicy::EveryRequest
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address as `host:port`
    pub addr: String,
    /// PEM CA certificate; plaintext when empty
    pub cert: String,
    /// Dial timeout in milliseconds
    pub dial_timeout: u64,
    /// Overall deadline per call (including retries) in milliseconds, 0 for none
    pub call_timeout: u64,
    /// Record client call metrics
    pub metrics: bool,
    /// Retry calls failing with retryable codes
    pub retry: bool,
}

impl ClientConfig {
    /// Resolve zero values to defaults
    pub fn with_defaults(mut self) -> Self {
        if self.addr.is_empty() {
            self.addr = DEFAULT_ADDR.to_string();
        }
        if self.dial_timeout < MIN_DIAL_TIMEOUT_MS {
            self.dial_timeout = DEFAULT_DIAL_TIMEOUT_MS;
        }
        self
    }

    /// Dial timeout
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout)
    }

    /// Overall call deadline, if any
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout > 0).then(|| Duration::from_millis(self.call_timeout))
    }
}

/// Token table for the static token authority
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Known tokens and their owners
    pub tokens: HashMap<String, TokenOwner>,
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// OTLP collector endpoint; tracing export is off when empty
    pub otlp_endpoint: String,
    /// Share of traces exported, in percent
    pub trace_sample_percent: u8,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info,access=debug".to_string(),
            json: false,
            otlp_endpoint: String::new(),
            trace_sample_percent: 100,
        }
    }
}

/// Top-level configuration file of the server binary
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `[server]` table
    pub server: ServerConfig,
    /// `[auth]` table
    pub auth: AuthorityConfig,
    /// `[log]` table
    pub log: LogConfig,
}

impl AppConfig {
    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default().with_defaults();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.metrics_port(), Some(5053));
        assert!(config.logging);
        assert!(config.recovery);
        assert!(!config.tls_enabled());
        assert_eq!(config.health_interval(), Duration::from_secs(5));
        assert_eq!(config.refresh_policy(), RefreshPolicy::EveryRequest);
        assert_eq!(config.service, "access");
    }

    #[test]
    fn test_metrics_can_be_disabled() {
        let config = ServerConfig {
            metrics: METRICS_DISABLED,
            ..Default::default()
        }
        .with_defaults();
        assert_eq!(config.metrics_port(), None);
    }

    #[test]
    fn test_defaults_keep_explicit_values() {
        let config = ServerConfig {
            port: 9000,
            metrics: 9100,
            caching: true,
            policy_refresh_secs: 7,
            ..Default::default()
        }
        .with_defaults();
        assert_eq!(config.port, 9000);
        assert_eq!(config.metrics_port(), Some(9100));
        assert_eq!(
            config.refresh_policy(),
            RefreshPolicy::Interval(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_caching_default_refresh() {
        let config = ServerConfig {
            caching: true,
            ..Default::default()
        }
        .with_defaults();
        assert_eq!(
            config.refresh_policy(),
            RefreshPolicy::Interval(Duration::from_secs(DEFAULT_POLICY_REFRESH_SECS))
        );
    }

    #[test]
    fn test_tls_needs_cert_and_key() {
        let config = ServerConfig {
            cert: "server.pem".into(),
            ..Default::default()
        };
        assert!(!config.tls_enabled());

        let config = ServerConfig {
            cert: "server.pem".into(),
            key: "server.key".into(),
            ..Default::default()
        };
        assert!(config.tls_enabled());
    }

    #[test]
    fn test_client_defaults() {
        let config = ClientConfig::default().with_defaults();
        assert_eq!(config.addr, DEFAULT_ADDR);
        assert_eq!(config.dial_timeout(), Duration::from_millis(5000));
        assert_eq!(config.call_timeout(), None);
        assert!(!config.retry);
    }

    #[test]
    fn test_client_short_dial_timeout_replaced() {
        let config = ClientConfig {
            dial_timeout: 200,
            ..Default::default()
        }
        .with_defaults();
        assert_eq!(config.dial_timeout, DEFAULT_DIAL_TIMEOUT_MS);

        let config = ClientConfig {
            dial_timeout: 2500,
            call_timeout: 800,
            ..Default::default()
        }
        .with_defaults();
        assert_eq!(config.dial_timeout, 2500);
        assert_eq!(config.call_timeout(), Some(Duration::from_millis(800)));
    }

    #[test]
    fn test_parse_app_config() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            port = 9001
            metrics = -1
            logging = false
            policy_path = "policy.csv"

            [auth.tokens.tok1]
            customer_id = "cust1"
            user_id = "user1"

            [log]
            json = true
            otlp_endpoint = "http://collector:4317"
            trace_sample_percent = 25
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9001);
        assert!(!config.server.logging);
        assert!(config.server.recovery);
        assert_eq!(config.server.policy_path, "policy.csv");
        assert_eq!(
            config.auth.tokens.get("tok1"),
            Some(&TokenOwner::new("cust1", "user1"))
        );
        assert!(config.log.json);
        assert_eq!(config.log.level, "info,access=debug");
        assert_eq!(config.log.otlp_endpoint, "http://collector:4317");
        assert_eq!(config.log.trace_sample_percent, 25);
    }

    #[test]
    fn test_parse_empty_config() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_parse_rejects_bad_types() {
        assert!(matches!(
            AppConfig::from_toml("[server]\nport = \"high\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            AppConfig::load("/nonexistent/access.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
