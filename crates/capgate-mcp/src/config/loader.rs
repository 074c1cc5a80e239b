//! Server configuration: TOML file, then environment, then CLI flags.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::DispatchOptions;
use crate::transport::DEFAULT_MAX_MESSAGE_BYTES;

/// Environment variable selecting the transport (`stdio` or `http`).
pub const ENV_TRANSPORT: &str = "CAPGATE_TRANSPORT";
/// Environment variable with the HTTP bind address.
pub const ENV_BIND: &str = "CAPGATE_BIND";
/// Environment variable with the access-policy file path.
pub const ENV_POLICY: &str = "CAPGATE_POLICY";
/// Environment variable with the log filter.
pub const ENV_LOG: &str = "CAPGATE_LOG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Which transport `serve` starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Http,
}

impl std::str::FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(TransportKind::Stdio),
            "http" | "sse" => Ok(TransportKind::Http),
            other => Err(ConfigError::Invalid(format!("unknown transport '{other}'"))),
        }
    }
}

/// Request timeouts in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub default_ms: u64,
    /// Per-protocol overrides.
    pub protocols: HashMap<String, u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_ms: 30_000,
            protocols: HashMap::new(),
        }
    }
}

/// Everything the launcher can configure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: TransportKind,
    pub bind: String,
    /// Access-policy file. Absent means open access.
    pub policy: Option<String>,
    pub log_level: String,
    pub max_message_bytes: usize,
    pub auth_timeout_ms: u64,
    pub drain_timeout_ms: u64,
    pub sweep_interval_secs: u64,
    pub timeouts: TimeoutConfig,
    /// Base directory of the `file` protocol.
    pub workspace: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Stdio,
            bind: "127.0.0.1:3000".to_string(),
            policy: None,
            log_level: "info".to_string(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            auth_timeout_ms: 5_000,
            drain_timeout_ms: 5_000,
            sweep_interval_secs: 60,
            timeouts: TimeoutConfig::default(),
            workspace: None,
        }
    }
}

impl ServerConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CAPGATE_*` overrides read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(transport) = lookup(ENV_TRANSPORT) {
            self.transport = transport.parse()?;
        }
        if let Some(bind) = lookup(ENV_BIND) {
            self.bind = bind;
        }
        if let Some(policy) = lookup(ENV_POLICY) {
            self.policy = Some(policy);
        }
        if let Some(level) = lookup(ENV_LOG) {
            self.log_level = level;
        }
        self.validate()
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_message_bytes == 0 {
            return Err(ConfigError::Invalid("max_message_bytes must be positive".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("sweep_interval_secs must be positive".into()));
        }
        if self.timeouts.default_ms == 0 || self.timeouts.protocols.values().any(|ms| *ms == 0) {
            return Err(ConfigError::Invalid("request timeouts must be positive".into()));
        }
        Ok(())
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Dispatcher settings derived from this config.
    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            default_timeout: Duration::from_millis(self.timeouts.default_ms),
            protocol_timeouts: self
                .timeouts
                .protocols
                .iter()
                .map(|(name, ms)| (name.clone(), Duration::from_millis(*ms)))
                .collect(),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
            ..DispatchOptions::default()
        }
    }
}

/// Load configuration from an optional TOML file, then apply environment
/// overrides.
pub fn load_config(path: Option<&str>) -> Result<ServerConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;
            tracing::debug!("Loaded config from {path}");
            ServerConfig::from_toml(&text)?
        }
        None => ServerConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

/// Resolve the `file` protocol's base directory: explicit path, then the
/// configured workspace, then the current directory.
pub fn resolve_workspace_path(explicit: Option<&str>, config: &ServerConfig) -> PathBuf {
    if let Some(path) = explicit.or(config.workspace.as_deref()) {
        return PathBuf::from(path);
    }
    std::env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_need_no_file() {
        let config = ServerConfig::default();
        assert_eq!(config.transport, TransportKind::Stdio);
        assert_eq!(config.bind, "127.0.0.1:3000");
        assert_eq!(config.dispatch_options().default_timeout, Duration::from_secs(30));
    }

    #[test]
    fn parses_partial_files() {
        let config = ServerConfig::from_toml(
            r#"
            transport = "http"
            policy = "/etc/capgate/policy.toml"

            [timeouts]
            default_ms = 1000
            protocols = { file = 250 }
            "#,
        )
        .unwrap();
        assert_eq!(config.transport, TransportKind::Http);
        assert_eq!(config.log_level, "info");
        let options = config.dispatch_options();
        assert_eq!(options.timeout_for("file"), Duration::from_millis(250));
        assert_eq!(options.timeout_for("data"), Duration::from_millis(1000));
    }

    #[test]
    fn environment_overrides_the_file() {
        let mut config = ServerConfig::from_toml("bind = \"0.0.0.0:9000\"").unwrap();
        config
            .apply_env_with(|key| match key {
                ENV_BIND => Some("127.0.0.1:7000".to_string()),
                ENV_TRANSPORT => Some("SSE".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.bind, "127.0.0.1:7000");
        assert_eq!(config.transport, TransportKind::Http);

        let err = config
            .apply_env_with(|key| (key == ENV_TRANSPORT).then(|| "carrier-pigeon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_timeouts() {
        assert!(ServerConfig::from_toml("[timeouts]\ndefault_ms = 0\n").is_err());
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capgate.toml");
        std::fs::write(&path, "log_level = \"debug\"\nworkspace = \"/srv/work\"\n").unwrap();

        let config = ServerConfig::from_toml(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(resolve_workspace_path(None, &config), PathBuf::from("/srv/work"));
        assert_eq!(resolve_workspace_path(Some("/tmp/x"), &config), PathBuf::from("/tmp/x"));
        assert!(matches!(
            load_config(Some("/definitely/not/here.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
