//! Access policy file format.
//!
//! ```toml
//! allow_anonymous = false
//! default_decision = "deny"
//!
//! [[credentials]]
//! key_sha256 = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
//! identity = "ci-bot"
//! class = "automation"
//!
//! [[rules]]
//! class = "automation"
//! protocol = "file"
//! method = "*"
//! decision = "allow"
//! weight = 2
//!
//! [[roots]]
//! class = "*"
//! protocol = "file"
//! name = "workspace"
//! path = "/srv/workspace"
//!
//! [rate_limit]
//! window_secs = 60
//! max_weight = 120
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::auth::ApiKeyHash;

/// Wildcard accepted in rule and root selectors.
pub const WILDCARD: &str = "*";

/// Errors while loading a policy.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("failed to read policy {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse policy: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid policy: {0}")]
    Invalid(String),
}

/// Outcome of a matching rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDecision {
    #[default]
    Allow,
    Deny,
}

/// One API key and the identity it authenticates as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialEntry {
    /// SHA-256 hex digest of the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_sha256: Option<String>,
    /// Plaintext key; hashed at load time.
    #[serde(default, skip_serializing)]
    pub key: Option<String>,
    pub identity: String,
    #[serde(default = "default_class")]
    pub class: String,
}

fn default_class() -> String {
    "default".to_string()
}

fn default_weight() -> u32 {
    1
}

/// `(class, protocol, method) -> decision` with an optional quota weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default = "wildcard")]
    pub class: String,
    #[serde(default = "wildcard")]
    pub protocol: String,
    #[serde(default = "wildcard")]
    pub method: String,
    #[serde(default)]
    pub decision: RuleDecision,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn wildcard() -> String {
    WILDCARD.to_string()
}

impl Rule {
    /// Match strength, or `None` if the rule does not apply. Method
    /// specificity outranks protocol, which outranks class.
    pub fn specificity(&self, class: &str, protocol: &str, method: &str) -> Option<u8> {
        let mut score = 0;
        for (pattern, value, bonus) in [
            (&self.method, method, 4),
            (&self.protocol, protocol, 2),
            (&self.class, class, 1),
        ] {
            if pattern == value {
                score += bonus;
            } else if pattern != WILDCARD {
                return None;
            }
        }
        Some(score)
    }
}

/// A filesystem boundary granted to a class for one protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootGrant {
    #[serde(default = "wildcard")]
    pub class: String,
    #[serde(default = "wildcard")]
    pub protocol: String,
    pub name: String,
    pub path: PathBuf,
}

impl RootGrant {
    pub fn applies_to(&self, class: &str, protocol: &str) -> bool {
        (self.class == WILDCARD || self.class == class)
            && (self.protocol == WILDCARD || self.protocol == protocol)
    }
}

/// Window and budget for one class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClassLimit {
    #[serde(default)]
    pub window_secs: Option<u64>,
    pub max_weight: u32,
}

/// Sliding-window quota settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimit {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    pub max_weight: u32,
    #[serde(default)]
    pub classes: HashMap<String, ClassLimit>,
}

fn default_window_secs() -> u64 {
    60
}

impl RateLimit {
    /// `(window_secs, max_weight)` for `class`.
    pub fn limit_for(&self, class: &str) -> (u64, u32) {
        match self.classes.get(class) {
            Some(limit) => (limit.window_secs.unwrap_or(self.window_secs), limit.max_weight),
            None => (self.window_secs, self.max_weight),
        }
    }
}

/// The whole policy document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default = "default_true")]
    pub allow_anonymous: bool,
    #[serde(default)]
    pub default_decision: RuleDecision,
    #[serde(default)]
    pub credentials: Vec<CredentialEntry>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub roots: Vec<RootGrant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimit>,
}

fn default_true() -> bool {
    true
}

impl Default for Policy {
    /// Open policy: anonymous access, everything allowed, no quota.
    fn default() -> Self {
        Self {
            allow_anonymous: true,
            default_decision: RuleDecision::Allow,
            credentials: Vec::new(),
            rules: Vec::new(),
            roots: Vec::new(),
            rate_limit: None,
        }
    }
}

impl Policy {
    /// Parse and validate policy text. Plaintext keys are replaced by their
    /// digests.
    pub fn from_toml(text: &str) -> Result<Self, PolicyError> {
        let mut policy: Policy = toml::from_str(text)?;
        policy.normalize()?;
        Ok(policy)
    }

    /// Load a policy file.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let text = std::fs::read_to_string(path).map_err(|source| PolicyError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    fn normalize(&mut self) -> Result<(), PolicyError> {
        for entry in &mut self.credentials {
            let digest = match (entry.key.take(), entry.key_sha256.take()) {
                (Some(plain), None) => ApiKeyHash::from_api_key(&plain),
                (None, Some(hash)) => ApiKeyHash::from_hash_string(&hash).map_err(|e| {
                    PolicyError::Invalid(format!("credential for '{}': {e}", entry.identity))
                })?,
                (Some(_), Some(_)) => {
                    return Err(PolicyError::Invalid(format!(
                        "credential for '{}' sets both key and key_sha256",
                        entry.identity
                    )))
                }
                (None, None) => {
                    return Err(PolicyError::Invalid(format!(
                        "credential for '{}' has no key",
                        entry.identity
                    )))
                }
            };
            entry.key_sha256 = Some(digest.as_str().to_string());
        }

        if let Some(limit) = &self.rate_limit {
            if limit.window_secs == 0 || limit.classes.values().any(|c| c.window_secs == Some(0)) {
                return Err(PolicyError::Invalid("rate_limit window must be positive".into()));
            }
        }

        for root in &self.roots {
            if !root.path.is_absolute() {
                return Err(PolicyError::Invalid(format!(
                    "root '{}' must be an absolute path",
                    root.name
                )));
            }
        }

        Ok(())
    }

    /// The most specific rule for the triple; the first declared wins ties.
    pub fn matching_rule(&self, class: &str, protocol: &str, method: &str) -> Option<&Rule> {
        let mut best: Option<(u8, &Rule)> = None;
        for rule in &self.rules {
            if let Some(score) = rule.specificity(class, protocol, method) {
                if best.map_or(true, |(top, _)| score > top) {
                    best = Some((score, rule));
                }
            }
        }
        best.map(|(_, rule)| rule)
    }
}
