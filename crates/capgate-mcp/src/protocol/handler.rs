//! Per-request pipeline for a negotiated session.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use capgate::{Concurrency, SamplingPolicy};

use crate::access::{AccessControl, AccessError, ArgsSummary, Decision, Identity};
use crate::prompts::registry::PromptRegistry;
use crate::registry::Binding;
use crate::resources::registry::ResourceRegistry;
use crate::types::{
    McpError, McpResult, PromptGetParams, PromptListResult, ResourceReadParams, RootListResult,
    ToolCallParams, ToolCallResult, ToolListResult,
};

use super::validator::{parse_params, tool_arguments};

/// Serves the Active-state methods against one negotiated protocol.
///
/// Cheap to clone; every in-flight request task holds its own copy.
#[derive(Clone)]
pub struct ProtocolHandler {
    binding: Arc<Binding>,
    identity: Identity,
    access: Arc<AccessControl>,
    // present when the adapter declared itself serialized
    serial: Option<Arc<Mutex<()>>>,
}

impl ProtocolHandler {
    pub fn new(binding: Arc<Binding>, identity: Identity, access: Arc<AccessControl>) -> Self {
        let serial = match binding.descriptor.concurrency {
            Concurrency::Serialized => Some(Arc::new(Mutex::new(()))),
            Concurrency::Concurrent => None,
        };
        Self {
            binding,
            identity,
            access,
            serial,
        }
    }

    pub fn binding(&self) -> &Arc<Binding> {
        &self.binding
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Handle one request and return its result value.
    pub async fn handle(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        tracing::debug!("{} -> {method}", self.binding.label());

        match method {
            "tools/list" => {
                self.authorize(method, &ArgsSummary::none())?;
                let result = ToolListResult {
                    tools: self.binding.descriptor.capabilities.tools.clone(),
                };
                Ok(serde_json::to_value(result)?)
            }
            "tools/call" => self.call_tool(params).await,
            "resources/list" => {
                self.authorize(method, &ArgsSummary::none())?;
                Ok(serde_json::to_value(ResourceRegistry::list_resources(&self.binding))?)
            }
            "resources/read" => self.read_resource(params).await,
            "prompts/list" => {
                self.authorize(method, &ArgsSummary::none())?;
                let result = PromptListResult {
                    prompts: PromptRegistry::list_prompts(&self.binding.descriptor),
                };
                Ok(serde_json::to_value(result)?)
            }
            "prompts/get" => {
                let params: PromptGetParams = parse_params(method, params)?;
                self.authorize(method, &ArgsSummary::none())?;
                let result = PromptRegistry::get(&self.binding.descriptor, &params.name, params.arguments)?;
                Ok(serde_json::to_value(result)?)
            }
            "roots/list" => {
                self.authorize(method, &ArgsSummary::none())?;
                let result = RootListResult {
                    roots: self.access.roots_for(&self.identity, &self.binding.descriptor),
                };
                Ok(serde_json::to_value(result)?)
            }
            "ping" => Ok(json!({})),
            _ => Err(McpError::MethodNotFound(method.to_string())),
        }
    }

    async fn call_tool(&self, params: Option<Value>) -> McpResult<Value> {
        let params: ToolCallParams = parse_params("tools/call", params)?;
        let descriptor = &self.binding.descriptor;

        let tool = descriptor
            .find_tool(&params.name)
            .ok_or_else(|| McpError::SchemaValidation {
                path: Some("/name".to_string()),
                message: format!("unknown tool '{}' for protocol {}", params.name, self.binding.label()),
            })?;
        let args = tool_arguments(params.arguments)?;

        let weight = self.authorize(&params.name, &ArgsSummary::for_tool(tool, &args))?;
        capgate::validate_args(descriptor, &params.name, &args)?;
        self.access.consume_quota(&self.identity, &descriptor.name, weight)?;

        let sampling = descriptor.capabilities.sampling.overlay(params.sampling.as_ref());
        let value = self.invoke(params.name, args, sampling).await?;
        Ok(serde_json::to_value(ToolCallResult::from_value(value))?)
    }

    async fn read_resource(&self, params: Option<Value>) -> McpResult<Value> {
        let params: ResourceReadParams = parse_params("resources/read", params)?;
        let summary = match ResourceRegistry::scoped_path(&params.uri) {
            Some(path) => ArgsSummary::path(path),
            None => ArgsSummary::none(),
        };
        let weight = self.authorize("resources/read", &summary)?;
        self.access
            .consume_quota(&self.identity, &self.binding.descriptor.name, weight)?;

        let binding = Arc::clone(&self.binding);
        let _turn = self.turn().await;
        let result = isolated(async move { ResourceRegistry::read(&binding, &params.uri).await }).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn invoke(&self, tool: String, args: Value, sampling: SamplingPolicy) -> McpResult<Value> {
        let adapter = Arc::clone(&self.binding.adapter);
        let _turn = self.turn().await;
        isolated(async move { adapter.invoke(&tool, args, &sampling).await }).await
    }

    /// Wait for this session's turn on a serialized adapter.
    async fn turn(&self) -> Option<tokio::sync::OwnedMutexGuard<()>> {
        match &self.serial {
            Some(lock) => Some(Arc::clone(lock).lock_owned().await),
            None => None,
        }
    }

    fn authorize(&self, method: &str, args: &ArgsSummary) -> McpResult<u32> {
        match self
            .access
            .authorize(&self.identity, &self.binding.descriptor, method, args)
        {
            Decision::Allow { weight } => Ok(weight),
            Decision::Deny(reason) => {
                tracing::info!(
                    "Denied {}/{method} for {} ({})",
                    self.binding.descriptor.name,
                    self.identity.id,
                    reason
                );
                Err(AccessError::Denied(reason).into())
            }
        }
    }
}

/// Aborts the adapter task if the request is dropped (timeout, cancel).
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Run adapter code on its own task so a panic becomes an error instead of
/// taking the session down.
async fn isolated<T, E, F>(future: F) -> McpResult<T>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<McpError> + Send + 'static,
{
    let mut task = AbortOnDrop(tokio::spawn(future));
    match (&mut task.0).await {
        Ok(result) => result.map_err(Into::into),
        Err(e) if e.is_panic() => {
            let cause = panic_message(e.into_panic());
            tracing::error!("Adapter panicked: {cause}");
            Err(McpError::ToolInvocation(format!("adapter panicked: {cause}")))
        }
        Err(_) => Err(McpError::Cancelled),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use capgate::builtin::DataAdapter;
    use capgate::{
        AdapterResult, CapabilityAdapter, CompatibilityRange, ProtocolDescriptor, ToolDefinition, Version,
    };

    use crate::access::Policy;
    use crate::protocol::error_mapper::ErrorMapper;
    use crate::types::ErrorCode;

    struct Panicky {
        descriptor: ProtocolDescriptor,
    }

    #[async_trait]
    impl CapabilityAdapter for Panicky {
        fn describe(&self) -> &ProtocolDescriptor {
            &self.descriptor
        }

        async fn invoke(&self, _: &str, _: Value, _: &SamplingPolicy) -> AdapterResult<Value> {
            panic!("index out of range");
        }
    }

    fn binding(adapter: Arc<dyn CapabilityAdapter>) -> Arc<Binding> {
        Arc::new(Binding {
            descriptor: adapter.describe().clone(),
            adapter,
        })
    }

    fn data_handler(access: AccessControl) -> ProtocolHandler {
        ProtocolHandler::new(
            binding(Arc::new(DataAdapter::new())),
            Identity::anonymous(),
            Arc::new(access),
        )
    }

    #[tokio::test]
    async fn calls_a_tool() {
        let handler = data_handler(AccessControl::open());
        let value = handler
            .handle("tools/call", Some(json!({"name": "hex_encode", "arguments": {"text": "hi"}})))
            .await
            .unwrap();
        assert_eq!(value["structuredContent"]["hex"], "6869");
    }

    #[tokio::test]
    async fn unknown_tools_and_methods_are_schema_errors() {
        let handler = data_handler(AccessControl::open());
        let err = handler
            .handle("tools/call", Some(json!({"name": "nope"})))
            .await
            .unwrap_err();
        assert_eq!(ErrorMapper::map(&err).error_code(), Some(ErrorCode::SchemaValidationError));

        let err = handler.handle("sampling/create", None).await.unwrap_err();
        assert_eq!(ErrorMapper::map(&err).error_code(), Some(ErrorCode::SchemaValidationError));
    }

    #[tokio::test]
    async fn denial_precedes_validation() {
        let policy = Policy::from_toml("default_decision = \"deny\"").unwrap();
        let handler = data_handler(AccessControl::new(policy));
        let err = handler
            .handle("tools/call", Some(json!({"name": "hex_encode", "arguments": {}})))
            .await
            .unwrap_err();
        assert_eq!(ErrorMapper::map(&err).error_code(), Some(ErrorCode::AuthorizationDenied));
    }

    #[tokio::test]
    async fn panics_become_invocation_errors() {
        let descriptor = ProtocolDescriptor::new("boom", Version::new(1, 0, 0), CompatibilityRange::any())
            .tool(ToolDefinition::new("explode", "Always panics", json!({"type": "object"})));
        let handler = ProtocolHandler::new(
            binding(Arc::new(Panicky { descriptor })),
            Identity::anonymous(),
            Arc::new(AccessControl::open()),
        );

        let err = handler
            .handle("tools/call", Some(json!({"name": "explode"})))
            .await
            .unwrap_err();
        let record = ErrorMapper::map(&err);
        assert_eq!(record.error_code(), Some(ErrorCode::ToolInvocationError));
        assert!(record.detail_str("cause").unwrap().contains("index out of range"));
    }

    #[tokio::test]
    async fn quota_is_charged_per_call() {
        let policy = Policy::from_toml("[rate_limit]\nwindow_secs = 60\nmax_weight = 1\n").unwrap();
        let handler = data_handler(AccessControl::new(policy));
        let call = json!({"name": "hex_encode", "arguments": {"text": "a"}});

        handler.handle("tools/call", Some(call.clone())).await.unwrap();
        // listing is not charged
        handler.handle("tools/list", None).await.unwrap();
        let err = handler.handle("tools/call", Some(call)).await.unwrap_err();
        assert_eq!(ErrorMapper::map(&err).error_code(), Some(ErrorCode::QuotaExceeded));
    }
}
