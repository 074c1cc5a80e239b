//! Static capability descriptors.
//!
//! A [`ProtocolDescriptor`] is what an adapter advertises: its identity
//! `(name, version)`, the versions it is willing to serve, and the tools,
//! resources, prompts, sampling defaults and roots it exposes. Descriptors are
//! immutable once an adapter has been registered.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::version::{CompatibilityRange, Version};

/// Tool definition, as listed by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (unique within a descriptor).
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the arguments.
    #[serde(rename = "inputSchema")]
    pub parameter_schema: Value,
    /// JSON Schema for the result, if the adapter declares one.
    #[serde(
        default,
        rename = "outputSchema",
        skip_serializing_if = "Option::is_none"
    )]
    pub result_schema: Option<Value>,
}

impl ToolDefinition {
    /// Create a tool with a parameter schema and no result schema.
    pub fn new(name: &str, description: &str, parameter_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: Some(description.to_string()),
            parameter_schema,
            result_schema: None,
        }
    }

    /// Attach a result schema.
    pub fn returning(mut self, result_schema: Value) -> Self {
        self.result_schema = Some(result_schema);
        self
    }
}

/// An addressable artifact a capability can list or fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource URI (may be an RFC 6570 template such as `file:///{path}`).
    pub uri: String,
    /// Human-readable name.
    pub name: String,
    /// MIME type.
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

/// Contents returned by `resources/read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContents {
    /// Resource URI.
    pub uri: String,
    /// MIME type.
    #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Binary content (base64).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

/// A variable accepted by a prompt template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVariable {
    /// Variable name, referenced as `{name}` in the template.
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the variable must be supplied.
    #[serde(default)]
    pub required: bool,
}

/// A declarative prompt template. Never executed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Prompt name (unique within a descriptor).
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Template text with `{variable}` placeholders.
    pub template: String,
    /// Variables the template accepts.
    #[serde(default)]
    pub variables: Vec<PromptVariable>,
}

/// Output-selection knobs (top-k, temperature, ...). Opaque to the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SamplingPolicy(pub Map<String, Value>);

impl SamplingPolicy {
    /// Keys from `overrides` replace the keys in `self`.
    pub fn overlay(&self, overrides: Option<&SamplingPolicy>) -> SamplingPolicy {
        let mut merged = self.0.clone();
        if let Some(overrides) = overrides {
            for (key, value) in &overrides.0 {
                merged.insert(key.clone(), value.clone());
            }
        }
        SamplingPolicy(merged)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A named filesystem or namespace boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    /// Root URI (`file:///srv/data` or a bare path).
    pub uri: String,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Root {
    /// Filesystem path of the root, if it names one.
    pub fn as_path(&self) -> Option<PathBuf> {
        if let Some(path) = self.uri.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        if self.uri.contains("://") {
            return None;
        }
        Some(PathBuf::from(&self.uri))
    }
}

/// Everything a descriptor exposes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub resources: Vec<Resource>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub prompts: Vec<Prompt>,
    #[serde(default, skip_serializing_if = "SamplingPolicy::is_empty")]
    pub sampling: SamplingPolicy,
    #[serde(default)]
    pub roots: Vec<Root>,
}

/// Whether an adapter's `invoke` may run concurrently within one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Concurrency {
    #[default]
    Concurrent,
    Serialized,
}

/// The static description of one capability adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolDescriptor {
    /// Protocol name, e.g. `"file"`.
    pub name: String,
    /// The version this adapter implements.
    pub version: Version,
    /// Requested versions this adapter will serve.
    #[serde(rename = "compatibility_range")]
    pub compatibility: CompatibilityRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub concurrency: Concurrency,
}

impl ProtocolDescriptor {
    /// Start a descriptor with no capabilities.
    pub fn new(name: &str, version: Version, compatibility: CompatibilityRange) -> Self {
        Self {
            name: name.to_string(),
            version,
            compatibility,
            description: None,
            capabilities: Capabilities::default(),
            concurrency: Concurrency::Concurrent,
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn tool(mut self, tool: ToolDefinition) -> Self {
        self.capabilities.tools.push(tool);
        self
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.capabilities.resources.push(resource);
        self
    }

    pub fn prompt(mut self, prompt: Prompt) -> Self {
        self.capabilities.prompts.push(prompt);
        self
    }

    pub fn root(mut self, root: Root) -> Self {
        self.capabilities.roots.push(root);
        self
    }

    pub fn sampling(mut self, sampling: SamplingPolicy) -> Self {
        self.capabilities.sampling = sampling;
        self
    }

    pub fn serialized(mut self) -> Self {
        self.concurrency = Concurrency::Serialized;
        self
    }

    /// Registry identity.
    pub fn key(&self) -> (String, Version) {
        (self.name.clone(), self.version)
    }

    /// Look up a declared tool.
    pub fn find_tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.capabilities.tools.iter().find(|t| t.name == name)
    }

    /// Look up a declared prompt.
    pub fn find_prompt(&self, name: &str) -> Option<&Prompt> {
        self.capabilities.prompts.iter().find(|p| p.name == name)
    }
}
