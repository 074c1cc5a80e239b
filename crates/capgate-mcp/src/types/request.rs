//! Request parameter types for tools, resources and prompts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use capgate::SamplingPolicy;

use super::message::RequestId;
use super::notification::ProgressToken;

/// Out-of-band request metadata (`_meta`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMeta {
    /// Ask for `notifications/progress` while the request runs.
    #[serde(
        default,
        rename = "progressToken",
        skip_serializing_if = "Option::is_none"
    )]
    pub progress_token: Option<ProgressToken>,
}

impl RequestMeta {
    /// Pull `_meta` out of arbitrary params without failing the request.
    pub fn from_params(params: Option<&Value>) -> Self {
        params
            .and_then(|p| p.get("_meta"))
            .and_then(|m| serde_json::from_value(m.clone()).ok())
            .unwrap_or_default()
    }
}

/// Parameters for tools/call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    /// Tool name.
    pub name: String,
    /// Tool arguments.
    #[serde(default)]
    pub arguments: Option<Value>,
    /// Sampling overrides, merged over the descriptor's defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingPolicy>,
}

/// Parameters for resources/read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReadParams {
    /// Resource URI.
    pub uri: String,
}

/// Parameters for prompts/get.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptGetParams {
    /// Prompt name.
    pub name: String,
    /// Prompt arguments.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Parameters for `notifications/cancelled` and `$/cancelRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequestParams {
    /// The request ID to cancel.
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
    /// Optional reason for cancellation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
