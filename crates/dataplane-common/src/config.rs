//! Layered configuration: client, transaction coordinator, reconciler rules.
//!
//! Every section has defaults, so an empty document is a valid config.
//!
//! ```yaml
//! client:
//!   base_url: http://127.0.0.1:5555/v2
//!   username: admin
//!   password: secret
//! transaction:
//!   max_attempts: 4
//!   backoff: exponential
//! reconcile:
//!   kinds:
//!     http_check:
//!       update:
//!         type: allowlist
//!         fields: [type, uri]
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DataplaneError, DataplaneResult};
use crate::types::ResourceKind;

/// Default values for every section.
pub mod defaults {
    /// Base URL of a locally running API.
    pub const BASE_URL: &str = "http://127.0.0.1:5555/v2";

    /// Per-request HTTP timeout.
    pub const REQUEST_TIMEOUT_MS: u64 = 10_000;

    /// Full version-read/open/commit cycles before giving up.
    pub const MAX_ATTEMPTS: u32 = 5;

    /// Delay between attempts (fixed) or first delay (exponential).
    pub const RETRY_DELAY_MS: u64 = 1_000;

    /// Upper bound for exponential backoff.
    pub const MAX_RETRY_DELAY_MS: u64 = 10_000;

    /// Growth factor for exponential backoff.
    pub const BACKOFF_MULTIPLIER: u32 = 2;

    /// Bound on each coordinator call (version, open, commit).
    pub const CALL_TIMEOUT_MS: u64 = 30_000;
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataplaneConfig {
    /// Remote API connection settings.
    pub client: ClientConfig,
    /// Transaction coordinator settings.
    pub transaction: TransactionConfig,
    /// Per-kind reconciliation rules.
    pub reconcile: ReconcileConfig,
}

impl DataplaneConfig {
    /// Parses a YAML document.
    pub fn from_yaml_str(text: &str) -> DataplaneResult<Self> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| DataplaneError::validation(format!("invalid YAML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parses a JSON document.
    pub fn from_json_str(text: &str) -> DataplaneResult<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| DataplaneError::validation(format!("invalid JSON config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a config file; `.json` is parsed as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> DataplaneResult<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading configuration");
        let text = std::fs::read_to_string(path).map_err(|e| {
            DataplaneError::validation(format!("cannot read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> DataplaneResult<()> {
        self.client.validate()?;
        self.transaction.validate()?;
        self.reconcile.validate()
    }
}

/// Remote API connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API root, including the version prefix (e.g. `/v2`).
    pub base_url: String,
    /// Basic auth user.
    pub username: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BASE_URL.to_string(),
            username: None,
            password: None,
            request_timeout_ms: defaults::REQUEST_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    /// Creates a config pointing at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Sets basic auth credentials.
    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Per-request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Checks URL scheme, timeout and credential pairing.
    pub fn validate(&self) -> DataplaneResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(DataplaneError::validation(format!(
                "client.base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(DataplaneError::validation(
                "client.request_timeout_ms must be greater than zero",
            ));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(DataplaneError::validation(
                "client.password is set without client.username",
            ));
        }
        Ok(())
    }
}

/// Backoff shape between coordinator attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Same delay before every retry.
    #[default]
    Fixed,
    /// Delay grows by `backoff_multiplier`, capped at `max_retry_delay_ms`.
    Exponential,
}

/// Transaction coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Maximum full cycles, including the first.
    pub max_attempts: u32,
    /// Base delay between cycles in milliseconds.
    pub retry_delay_ms: u64,
    /// Backoff shape.
    pub backoff: BackoffKind,
    /// Exponential growth factor.
    pub backoff_multiplier: u32,
    /// Exponential delay cap in milliseconds.
    pub max_retry_delay_ms: u64,
    /// Bound on each version/open/commit call in milliseconds.
    pub call_timeout_ms: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            retry_delay_ms: defaults::RETRY_DELAY_MS,
            backoff: BackoffKind::Fixed,
            backoff_multiplier: defaults::BACKOFF_MULTIPLIER,
            max_retry_delay_ms: defaults::MAX_RETRY_DELAY_MS,
            call_timeout_ms: defaults::CALL_TIMEOUT_MS,
        }
    }
}

impl TransactionConfig {
    /// Base retry delay.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Exponential backoff cap.
    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    /// Per-call timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    fn validate(&self) -> DataplaneResult<()> {
        if self.max_attempts == 0 {
            return Err(DataplaneError::validation(
                "transaction.max_attempts must be at least 1",
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(DataplaneError::validation(
                "transaction.call_timeout_ms must be greater than zero",
            ));
        }
        if self.backoff == BackoffKind::Exponential && self.backoff_multiplier < 1 {
            return Err(DataplaneError::validation(
                "transaction.backoff_multiplier must be at least 1",
            ));
        }
        Ok(())
    }
}

/// How two items at the same index are recognised as the same entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentityRule {
    /// Position is identity (rule chains, checks).
    Position,
    /// Same entity iff the named payload field is equal.
    Field {
        /// Payload field holding the identity key.
        name: String,
    },
}

impl IdentityRule {
    /// Default identity for a kind.
    pub fn default_for(kind: ResourceKind) -> Self {
        match kind.identity_field() {
            Some(name) => IdentityRule::Field {
                name: name.to_string(),
            },
            None => IdentityRule::Position,
        }
    }
}

/// Which changed fields the remote accepts through an in-place update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Any field can be updated in place.
    #[default]
    AllFields,
    /// Only these fields; any other change forces delete + recreate.
    Allowlist {
        /// Fields safe to update in place.
        fields: BTreeSet<String>,
    },
}

impl UpdatePolicy {
    /// Builds an allowlist policy.
    pub fn allowlist<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        UpdatePolicy::Allowlist {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if `field` may change in place.
    pub fn allows(&self, field: &str) -> bool {
        match self {
            UpdatePolicy::AllFields => true,
            UpdatePolicy::Allowlist { fields } => fields.contains(field),
        }
    }
}

/// Rules for one resource kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindRules {
    /// Identity rule.
    pub identity: IdentityRule,
    /// Update policy.
    #[serde(default)]
    pub update: UpdatePolicy,
}

impl KindRules {
    /// Default rules for a kind.
    pub fn default_for(kind: ResourceKind) -> Self {
        Self {
            identity: IdentityRule::default_for(kind),
            update: UpdatePolicy::AllFields,
        }
    }
}

/// Per-kind rule overrides. Kinds without an entry use their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Overrides keyed by kind.
    pub kinds: BTreeMap<ResourceKind, KindRulesOverride>,
}

/// Partial rules as written in a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KindRulesOverride {
    /// Identity override.
    pub identity: Option<IdentityRule>,
    /// Update policy override.
    pub update: Option<UpdatePolicy>,
}

impl ReconcileConfig {
    /// Resolves the effective rules for `kind`.
    pub fn rules_for(&self, kind: ResourceKind) -> KindRules {
        let mut rules = KindRules::default_for(kind);
        if let Some(over) = self.kinds.get(&kind) {
            if let Some(identity) = &over.identity {
                rules.identity = identity.clone();
            }
            if let Some(update) = &over.update {
                rules.update = update.clone();
            }
        }
        rules
    }

    /// Sets an update policy for one kind.
    pub fn with_update_policy(mut self, kind: ResourceKind, policy: UpdatePolicy) -> Self {
        self.kinds.entry(kind).or_default().update = Some(policy);
        self
    }

    /// Sets an identity rule for one kind.
    pub fn with_identity(mut self, kind: ResourceKind, identity: IdentityRule) -> Self {
        self.kinds.entry(kind).or_default().identity = Some(identity);
        self
    }

    fn validate(&self) -> DataplaneResult<()> {
        for (kind, over) in &self.kinds {
            if let Some(IdentityRule::Field { name }) = &over.identity {
                if name.is_empty() {
                    return Err(DataplaneError::validation(format!(
                        "reconcile.kinds.{}: identity field name is empty",
                        kind
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = DataplaneConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, DataplaneConfig::default());
        assert_eq!(config.transaction.max_attempts, defaults::MAX_ATTEMPTS);
        assert_eq!(config.client.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = r#"
client:
  base_url: https://lb1.example.net:5555/v2
  username: admin
  password: secret
transaction:
  max_attempts: 3
  retry_delay_ms: 50
  backoff: exponential
reconcile:
  kinds:
    http_check:
      update:
        type: allowlist
        fields: [type, uri]
    acl:
      identity:
        type: position
"#;
        let config = DataplaneConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.client.username.as_deref(), Some("admin"));
        assert_eq!(config.transaction.max_attempts, 3);
        assert_eq!(config.transaction.backoff, BackoffKind::Exponential);

        let checks = config.reconcile.rules_for(ResourceKind::HttpCheck);
        assert_eq!(checks.identity, IdentityRule::Position);
        assert!(checks.update.allows("uri"));
        assert!(!checks.update.allows("method"));

        let acls = config.reconcile.rules_for(ResourceKind::Acl);
        assert_eq!(acls.identity, IdentityRule::Position);
        assert_eq!(acls.update, UpdatePolicy::AllFields);
    }

    #[test]
    fn test_json_config() {
        let config =
            DataplaneConfig::from_json_str(r#"{"transaction": {"call_timeout_ms": 500}}"#).unwrap();
        assert_eq!(config.transaction.call_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_validation_errors() {
        assert!(DataplaneConfig::from_yaml_str("transaction: {max_attempts: 0}").is_err());
        assert!(DataplaneConfig::from_yaml_str("client: {base_url: 'ftp://x'}").is_err());
        assert!(DataplaneConfig::from_yaml_str("client: {password: pw}").is_err());
        assert!(DataplaneConfig::from_yaml_str("transaction: [1, 2]").is_err());
    }

    #[test]
    fn test_default_rules_per_kind() {
        let config = ReconcileConfig::default();
        assert_eq!(
            config.rules_for(ResourceKind::Acl).identity,
            IdentityRule::Field {
                name: "acl_name".to_string()
            }
        );
        assert_eq!(
            config.rules_for(ResourceKind::HttpRequestRule).identity,
            IdentityRule::Position
        );
    }

    #[test]
    fn test_builder_overrides() {
        let config = ReconcileConfig::default()
            .with_update_policy(ResourceKind::TcpCheck, UpdatePolicy::allowlist(["action"]))
            .with_identity(ResourceKind::TcpCheck, IdentityRule::Position);
        let rules = config.rules_for(ResourceKind::TcpCheck);
        assert!(rules.update.allows("action"));
        assert!(!rules.update.allows("port"));
    }
}
