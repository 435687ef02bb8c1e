//! Policy engine contract and the default ACL enforcer
//!
//! Rules come from a [`PolicyAdapter`]. The bundled adapters read casbin-style
//! CSV files (`p, subject, resource, action`) or keep rules in memory. The
//! [`Enforcer`] allows a request only when a rule matches all three fields
//! exactly.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading or evaluating policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// The rule store could not be read
    #[error("policy adapter error: {0}")]
    Adapter(String),

    /// A rule line could not be parsed
    #[error("invalid policy rule at line {line}: {message}")]
    InvalidRule {
        /// 1-based line number
        line: usize,
        /// What was wrong with it
        message: String,
    },

    /// Enforcement was attempted before any policy was loaded
    #[error("policy not loaded")]
    NotLoaded,
}

/// One allow rule
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyRule {
    /// Subject the rule applies to
    pub subject: String,
    /// Resource the rule applies to
    pub resource: String,
    /// Allowed action
    pub action: String,
}

impl PolicyRule {
    /// Create a rule
    pub fn new(
        subject: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            resource: resource.into(),
            action: action.into(),
        }
    }
}

/// Pluggable rule store
#[async_trait]
pub trait PolicyAdapter: Send + Sync {
    /// Read every rule currently stored
    async fn load_policy(&self) -> Result<Vec<PolicyRule>, PolicyError>;
}

/// Capability the authorization handler needs from a policy engine
#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// (Re)load the rules from the backing store
    async fn load_policy(&self) -> Result<(), PolicyError>;

    /// Decide whether `subject` may perform `action` on `resource`
    fn enforce(&self, subject: &str, resource: &str, action: &str) -> Result<bool, PolicyError>;
}

/// Builds ready-to-use policy engines
#[async_trait]
pub trait EnforcerFactory: Send + Sync {
    /// Construct an engine and load its current rules
    async fn create(&self) -> Result<Arc<dyn PolicyEngine>, PolicyError>;
}

/// Parse casbin-style policy CSV
///
/// Only `p` lines are understood; blank lines and `#` comments are skipped.
pub fn parse_policy_csv(content: &str) -> Result<Vec<PolicyRule>, PolicyError> {
    let mut rules = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        let invalid = |message: &str| PolicyError::InvalidRule {
            line: idx + 1,
            message: message.to_string(),
        };

        match fields.as_slice() {
            ["p", sub, obj, act] => {
                if sub.is_empty() || obj.is_empty() || act.is_empty() {
                    return Err(invalid("empty field"));
                }
                rules.push(PolicyRule::new(*sub, *obj, *act));
            }
            ["p", ..] => return Err(invalid("expected `p, subject, resource, action`")),
            [kind, ..] => return Err(invalid(&format!("unsupported rule type `{}`", kind))),
            [] => return Err(invalid("empty rule")),
        }
    }

    Ok(rules)
}

/// Adapter reading rules from a CSV file on every load
#[derive(Debug, Clone)]
pub struct FileAdapter {
    path: PathBuf,
}

impl FileAdapter {
    /// Create an adapter for `path`
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PolicyAdapter for FileAdapter {
    async fn load_policy(&self) -> Result<Vec<PolicyRule>, PolicyError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| PolicyError::Adapter(format!("{}: {}", self.path.display(), e)))?;
        parse_policy_csv(&content)
    }
}

/// Adapter keeping rules in memory
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    rules: RwLock<Vec<PolicyRule>>,
}

impl MemoryAdapter {
    /// Create an adapter with initial rules
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    /// Store another rule
    pub fn add_rule(&self, rule: PolicyRule) {
        self.rules.write().push(rule);
    }

    /// Drop every rule equal to `rule`, returning whether any was removed
    pub fn remove_rule(&self, rule: &PolicyRule) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r != rule);
        rules.len() != before
    }
}

#[async_trait]
impl PolicyAdapter for MemoryAdapter {
    async fn load_policy(&self) -> Result<Vec<PolicyRule>, PolicyError> {
        Ok(self.rules.read().clone())
    }
}

/// Exact-match ACL enforcer
pub struct Enforcer {
    adapter: Arc<dyn PolicyAdapter>,
    rules: RwLock<Option<HashSet<PolicyRule>>>,
}

impl Enforcer {
    /// Create an enforcer over `adapter`; rules are read by `load_policy`
    pub fn new(adapter: Arc<dyn PolicyAdapter>) -> Self {
        Self {
            adapter,
            rules: RwLock::new(None),
        }
    }

    /// Number of loaded rules
    pub fn rule_count(&self) -> usize {
        self.rules.read().as_ref().map_or(0, HashSet::len)
    }
}

#[async_trait]
impl PolicyEngine for Enforcer {
    async fn load_policy(&self) -> Result<(), PolicyError> {
        let rules: HashSet<PolicyRule> = self.adapter.load_policy().await?.into_iter().collect();
        debug!(rules = rules.len(), "Loaded policy rules");
        *self.rules.write() = Some(rules);
        Ok(())
    }

    fn enforce(&self, subject: &str, resource: &str, action: &str) -> Result<bool, PolicyError> {
        let guard = self.rules.read();
        let rules = guard.as_ref().ok_or(PolicyError::NotLoaded)?;
        Ok(rules.contains(&PolicyRule::new(subject, resource, action)))
    }
}

/// Factory producing [`Enforcer`]s over a shared adapter
#[derive(Clone)]
pub struct AdapterEnforcerFactory {
    adapter: Arc<dyn PolicyAdapter>,
}

impl AdapterEnforcerFactory {
    /// Create a factory over `adapter`
    pub fn new(adapter: Arc<dyn PolicyAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl EnforcerFactory for AdapterEnforcerFactory {
    async fn create(&self) -> Result<Arc<dyn PolicyEngine>, PolicyError> {
        let enforcer = Enforcer::new(self.adapter.clone());
        enforcer.load_policy().await?;
        Ok(Arc::new(enforcer))
    }
}
