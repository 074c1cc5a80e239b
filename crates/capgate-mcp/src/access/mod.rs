//! Access control: authentication, authorization, roots and quotas.
//!
//! The policy table is immutable after startup and shared by every session.
//! Quota counters are the only state that changes, and they live behind the
//! limiter's lock.

pub mod auth;
pub mod policy;
pub mod quota;
pub mod roots;
pub mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use capgate::{schema, ProtocolDescriptor, Root, ToolDefinition};
use serde_json::Value;
use thiserror::Error;

pub use auth::{ApiKeyHash, Authenticator, Identity, PolicyAuthenticator};
pub use policy::{Policy, PolicyError, RuleDecision};
pub use quota::{QuotaRejection, SlidingWindowLimiter};
pub use sweeper::spawn_sweeper;

/// Default bound on a single `authenticate` call.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Access failures surfaced to the dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("identity provider did not answer within {}ms", .0.as_millis())]
    AuthenticationTimeout(Duration),

    #[error("access denied: {0}")]
    Denied(String),

    #[error("quota exceeded for {identity} on {protocol} ({used}/{limit})")]
    QuotaExceeded {
        identity: String,
        protocol: String,
        used: u32,
        limit: u32,
        retry_after: Duration,
    },
}

/// Result of [`AccessControl::authorize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Proceed, charging `weight` against the quota.
    Allow { weight: u32 },
    /// Terminal; the call must not be attempted.
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

/// What authorization needs to know about a call's arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgsSummary {
    /// Values of root-scoped (`format: path`) arguments.
    pub paths: Vec<String>,
}

impl ArgsSummary {
    pub fn none() -> Self {
        Self::default()
    }

    /// Collect the root-scoped arguments `tool` declares.
    pub fn for_tool(tool: &ToolDefinition, args: &Value) -> Self {
        Self {
            paths: schema::root_scoped_values(&tool.parameter_schema, args),
        }
    }

    /// A single path, e.g. the target of `resources/read`.
    pub fn path(path: &str) -> Self {
        Self {
            paths: vec![path.to_string()],
        }
    }
}

/// Policy enforcement shared by all sessions.
pub struct AccessControl {
    policy: Policy,
    authenticator: Arc<dyn Authenticator>,
    limiter: SlidingWindowLimiter,
    auth_timeout: Duration,
}

impl AccessControl {
    /// Enforce `policy`, authenticating against its credential table.
    pub fn new(policy: Policy) -> Self {
        let authenticator = Arc::new(PolicyAuthenticator::new(&policy));
        let limiter = SlidingWindowLimiter::new(policy.rate_limit.clone());
        Self {
            policy,
            authenticator,
            limiter,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    /// Anonymous access, everything allowed, no quota.
    pub fn open() -> Self {
        Self::new(Policy::default())
    }

    /// Swap in an external identity provider.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }

    pub fn with_auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Resolve a credential, bounded by the configured timeout.
    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, AccessError> {
        match tokio::time::timeout(self.auth_timeout, self.authenticator.authenticate(credential)).await {
            Ok(result) => result,
            Err(_) => Err(AccessError::AuthenticationTimeout(self.auth_timeout)),
        }
    }

    /// Decide whether `identity` may call `method` on the protocol described
    /// by `descriptor`. Evaluated once per request, before any invocation.
    pub fn authorize(
        &self,
        identity: &Identity,
        descriptor: &ProtocolDescriptor,
        method: &str,
        args: &ArgsSummary,
    ) -> Decision {
        let protocol = descriptor.name.as_str();
        let rule = self.policy.matching_rule(&identity.class, protocol, method);
        let decision = rule.map_or(self.policy.default_decision, |r| r.decision);

        if decision == RuleDecision::Deny {
            return Decision::Deny(format!(
                "class '{}' may not call {protocol}/{method}",
                identity.class
            ));
        }

        if !args.paths.is_empty() {
            let roots = self.roots_for(identity, descriptor);
            if !roots.is_empty() {
                // relative paths resolve where the adapter will resolve them
                let base = &descriptor.capabilities.roots;
                let outside = args.paths.iter().find(|p| {
                    roots::anchor(p, base).map_or(true, |path| !roots::is_within(&path, &roots))
                });
                if let Some(outside) = outside {
                    return Decision::Deny(format!("path '{outside}' is outside the permitted roots"));
                }
            }
        }

        Decision::Allow {
            weight: rule.map_or(1, |r| r.weight),
        }
    }

    /// Charge `weight` against `(identity, protocol)`.
    pub fn consume_quota(&self, identity: &Identity, protocol: &str, weight: u32) -> Result<(), AccessError> {
        self.limiter
            .try_consume(&identity.id, &identity.class, protocol, weight)
            .map_err(|rejection| AccessError::QuotaExceeded {
                identity: identity.id.clone(),
                protocol: protocol.to_string(),
                used: rejection.used,
                limit: rejection.limit,
                retry_after: rejection.retry_after,
            })
    }

    /// Roots in force for `identity` on this protocol: policy grants first,
    /// otherwise the descriptor's own declaration.
    pub fn roots_for(&self, identity: &Identity, descriptor: &ProtocolDescriptor) -> Vec<Root> {
        let granted: Vec<Root> = self
            .policy
            .roots
            .iter()
            .filter(|grant| grant.applies_to(&identity.class, &descriptor.name))
            .map(|grant| Root {
                uri: format!("file://{}", grant.path.display()),
                name: Some(grant.name.clone()),
            })
            .collect();

        if granted.is_empty() {
            descriptor.capabilities.roots.clone()
        } else {
            granted
        }
    }

    /// Evict idle quota windows.
    pub fn sweep(&self) -> usize {
        self.limiter.sweep()
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }
}

impl std::fmt::Debug for AccessControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessControl")
            .field("rules", &self.policy.rules.len())
            .field("credentials", &self.policy.credentials.len())
            .field("auth_timeout", &self.auth_timeout)
            .finish()
    }
}
