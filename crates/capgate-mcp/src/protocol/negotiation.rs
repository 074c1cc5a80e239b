//! The `initialize` handshake: version parsing, authentication and
//! protocol resolution.

use std::sync::Arc;

use capgate::Version;

use crate::access::{AccessControl, Identity};
use crate::registry::{Binding, ProtocolRegistry};
use crate::types::{Implementation, InitializeParams, InitializeResult, McpError, McpResult};

/// Outcome of a successful handshake.
#[derive(Debug)]
pub struct Negotiated {
    pub binding: Arc<Binding>,
    pub identity: Identity,
    pub result: InitializeResult,
}

fn parse_version(text: &str) -> McpResult<Version> {
    text.parse()
        .map_err(|e| McpError::ProtocolVersionMismatch(format!("cannot negotiate: {e}")))
}

/// Authenticate the session and resolve the requested protocol.
///
/// `transport_credential` is used when the params carry no credential.
pub async fn negotiate(
    registry: &ProtocolRegistry,
    access: &AccessControl,
    params: InitializeParams,
    transport_credential: Option<String>,
    session_id: &str,
) -> McpResult<Negotiated> {
    let requested = parse_version(&params.version)?;

    let credential = params.credential.clone().or(transport_credential);
    let identity = access.authenticate(credential.as_deref()).await?;

    let binding = registry.resolve(&params.protocol, &requested)?;
    let descriptor = &binding.descriptor;

    let mut capabilities = descriptor.capabilities.clone();
    capabilities.roots = access.roots_for(&identity, descriptor);

    if let Some(client) = &params.client_info {
        tracing::info!(
            "Session {session_id}: {} v{} negotiated {} (requested {})",
            client.name,
            client.version,
            binding.label(),
            params.version
        );
    } else {
        tracing::info!("Session {session_id}: negotiated {} (requested {})", binding.label(), params.version);
    }

    let result = InitializeResult {
        protocol: descriptor.name.clone(),
        version: descriptor.version.to_string(),
        capabilities,
        server_info: Implementation::server(),
        session_id: session_id.to_string(),
        instructions: descriptor.description.clone(),
    };

    Ok(Negotiated {
        binding,
        identity,
        result,
    })
}

/// A repeated `initialize` must ask for what the session already runs.
pub fn ensure_same_protocol(binding: &Binding, params: &InitializeParams) -> McpResult<()> {
    let requested = parse_version(&params.version)?;
    if params.protocol != binding.descriptor.name || !binding.descriptor.compatibility.contains(&requested) {
        return Err(McpError::ProtocolVersionMismatch(format!(
            "session already negotiated {}; cannot switch to {}@{}",
            binding.label(),
            params.protocol,
            params.version
        )));
    }
    Ok(())
}
