//! Result payloads for the methods served in the Active state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use capgate::{Resource, ResourceContents, Root, ToolDefinition};

/// Content blocks returned by tools and prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToolContent {
    /// Text content.
    #[serde(rename = "text")]
    Text {
        /// The text content.
        text: String,
    },
    /// Embedded resource content.
    #[serde(rename = "resource")]
    Resource {
        /// The embedded resource.
        resource: ResourceContents,
    },
}

/// Result from a tools/call invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Human-readable rendering of the result.
    pub content: Vec<ToolContent>,
    /// The adapter's result value, untouched.
    #[serde(rename = "structuredContent")]
    pub structured_content: Value,
}

impl ToolCallResult {
    /// Wrap an adapter result.
    pub fn from_value(value: Value) -> Self {
        let text = match &value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|e| e.to_string()),
        };
        Self {
            content: vec![ToolContent::Text { text }],
            structured_content: value,
        }
    }
}

/// Result from tools/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolListResult {
    pub tools: Vec<ToolDefinition>,
}

/// Result from resources/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceListResult {
    pub resources: Vec<Resource>,
}

/// Result from resources/read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

/// Prompt argument definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether this argument is required.
    #[serde(default)]
    pub required: bool,
}

/// Prompt definition for prompts/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDefinition {
    /// Prompt name (unique).
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Arguments the prompt accepts.
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// Result from prompts/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptListResult {
    pub prompts: Vec<PromptDefinition>,
}

/// A message in a prompt's expanded output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Role: "user" or "assistant".
    pub role: String,
    /// Content of the message.
    pub content: ToolContent,
}

/// Result from prompts/get.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptGetResult {
    /// Optional description for this prompt expansion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The expanded prompt messages.
    pub messages: Vec<PromptMessage>,
}

/// Result from roots/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootListResult {
    pub roots: Vec<Root>,
}
