//! The capability adapter contract.

use async_trait::async_trait;
use serde_json::Value;

use crate::descriptor::{ProtocolDescriptor, ResourceContents, SamplingPolicy};
use crate::error::{AdapterError, AdapterResult};
use crate::schema;

/// One backend capability, translated into the protocol's call shape.
///
/// Adapters never authorize calls; the caller has already done so. They
/// must validate arguments before touching backend resources, and keep all
/// side effects inside [`invoke`](CapabilityAdapter::invoke).
#[async_trait]
pub trait CapabilityAdapter: Send + Sync {
    /// The static descriptor. Pure and deterministic.
    fn describe(&self) -> &ProtocolDescriptor;

    /// Run one declared tool.
    async fn invoke(
        &self,
        method: &str,
        args: Value,
        sampling: &SamplingPolicy,
    ) -> AdapterResult<Value>;

    /// Fetch one resource by URI.
    async fn read_resource(&self, uri: &str) -> AdapterResult<ResourceContents> {
        Err(AdapterError::ResourceNotFound(uri.to_string()))
    }
}

/// Check `args` against the parameter schema `method` declares.
pub fn validate_args(descriptor: &ProtocolDescriptor, method: &str, args: &Value) -> AdapterResult<()> {
    let tool = descriptor
        .find_tool(method)
        .ok_or_else(|| AdapterError::UnknownMethod(method.to_string()))?;
    schema::validate(&tool.parameter_schema, args)
}

/// Pull a required string argument out of already-validated `args`.
pub fn str_arg<'a>(args: &'a Value, name: &str) -> AdapterResult<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| AdapterError::schema(format!("/{name}"), "expected string"))
}
