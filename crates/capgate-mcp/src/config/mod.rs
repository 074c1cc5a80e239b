//! Configuration loading and resolution.

pub mod loader;

pub use loader::{load_config, resolve_workspace_path, ConfigError, ServerConfig, TimeoutConfig, TransportKind};
