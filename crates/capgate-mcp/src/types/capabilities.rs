//! Initialization handshake types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use capgate::Capabilities;

/// Server name constant.
pub const SERVER_NAME: &str = "capgate-mcp";

/// Server version constant.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Implementation info for server or client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    /// Name of the implementation.
    pub name: String,
    /// Version string.
    pub version: String,
}

impl Implementation {
    /// This server.
    pub fn server() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: SERVER_VERSION.to_string(),
        }
    }
}

/// `initialize` parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeParams {
    /// Requested protocol name.
    pub protocol: String,
    /// Requested protocol version, e.g. `"1.0"`.
    pub version: String,
    /// Client implementation info.
    #[serde(default, alias = "clientInfo", skip_serializing_if = "Option::is_none")]
    pub client_info: Option<Implementation>,
    /// Capability hints. Advisory only.
    #[serde(
        default,
        alias = "capabilitiesRequested",
        skip_serializing_if = "Option::is_none"
    )]
    pub capabilities_requested: Option<Value>,
    /// Credential presented in-band (API key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// `initialize` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Resolved protocol name.
    pub protocol: String,
    /// Resolved protocol version (may differ from the requested one).
    pub version: String,
    /// What the resolved adapter exposes.
    pub capabilities: Capabilities,
    /// Server implementation info.
    pub server_info: Implementation,
    /// Session id assigned by the server.
    pub session_id: String,
    /// Optional instructions for the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}
