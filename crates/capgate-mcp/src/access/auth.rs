//! Credential checking.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::policy::Policy;
use super::AccessError;

/// Identity used when anonymous access is allowed and no credential is given.
pub const ANONYMOUS: &str = "anonymous";

/// SHA-256 hex digest of an API key (64 hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ApiKeyHash(String);

impl ApiKeyHash {
    /// Hash a plaintext API key.
    pub fn from_api_key(api_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(api_key.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Accept an existing digest after checking its shape.
    pub fn from_hash_string(hash: &str) -> Result<Self, String> {
        if hash.len() != 64 {
            return Err(format!("invalid hash length: expected 64, got {}", hash.len()));
        }
        if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("invalid hash format: must be 64 hex characters".to_string());
        }
        Ok(Self(hash.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApiKeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Stable identifier, used as the quota key.
    pub id: String,
    /// Policy class the identity belongs to.
    pub class: String,
}

impl Identity {
    pub fn new(id: &str, class: &str) -> Self {
        Self {
            id: id.to_string(),
            class: class.to_string(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS, ANONYMOUS)
    }

    pub fn is_anonymous(&self) -> bool {
        self.id == ANONYMOUS
    }
}

/// Turns a presented credential into an [`Identity`]. Implementations may
/// call out to an external identity provider.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, AccessError>;
}

/// Checks API keys against the digests listed in the policy.
pub struct PolicyAuthenticator {
    keys: HashMap<ApiKeyHash, Identity>,
    allow_anonymous: bool,
}

impl PolicyAuthenticator {
    pub fn new(policy: &Policy) -> Self {
        let keys = policy
            .credentials
            .iter()
            .filter_map(|entry| {
                let hash = ApiKeyHash::from_hash_string(entry.key_sha256.as_deref()?).ok()?;
                Some((hash, Identity::new(&entry.identity, &entry.class)))
            })
            .collect();

        Self {
            keys,
            allow_anonymous: policy.allow_anonymous,
        }
    }
}

#[async_trait]
impl Authenticator for PolicyAuthenticator {
    async fn authenticate(&self, credential: Option<&str>) -> Result<Identity, AccessError> {
        let credential = credential.map(str::trim).filter(|c| !c.is_empty());
        match credential {
            None if self.allow_anonymous => Ok(Identity::anonymous()),
            None => Err(AccessError::Authentication("credential required".into())),
            Some(key) => self
                .keys
                .get(&ApiKeyHash::from_api_key(key))
                .cloned()
                .ok_or_else(|| AccessError::Authentication("unknown credential".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(anonymous: bool) -> Policy {
        Policy::from_toml(&format!(
            r#"
            allow_anonymous = {anonymous}
            [[credentials]]
            key = "k-1"
            identity = "alice"
            class = "admin"
            [[credentials]]
            key_sha256 = "{}"
            identity = "bob"
            "#,
            ApiKeyHash::from_api_key("k-2")
        ))
        .unwrap()
    }

    #[test]
    fn hash_is_stable_hex() {
        let hash = ApiKeyHash::from_api_key("test");
        assert_eq!(
            hash.as_str(),
            "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
        assert!(ApiKeyHash::from_hash_string(&hash.as_str().to_uppercase()).is_ok());
        assert!(ApiKeyHash::from_hash_string("xyz").is_err());
    }

    #[tokio::test]
    async fn resolves_known_keys() {
        let auth = PolicyAuthenticator::new(&policy(false));
        assert_eq!(auth.authenticate(Some("k-1")).await.unwrap(), Identity::new("alice", "admin"));
        assert_eq!(auth.authenticate(Some("k-2")).await.unwrap(), Identity::new("bob", "default"));
        assert!(matches!(
            auth.authenticate(Some("nope")).await,
            Err(AccessError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn anonymous_only_when_allowed() {
        let closed = PolicyAuthenticator::new(&policy(false));
        assert!(closed.authenticate(None).await.is_err());
        assert!(closed.authenticate(Some("  ")).await.is_err());

        let open = PolicyAuthenticator::new(&policy(true));
        assert!(open.authenticate(None).await.unwrap().is_anonymous());
    }
}
