//! Prompt listing and expansion for the negotiated protocol.

use serde_json::Value;

use capgate::ProtocolDescriptor;

use crate::types::{McpError, McpResult, PromptArgument, PromptDefinition, PromptGetResult};

use super::expand;

/// Prompts declared by a protocol descriptor.
pub struct PromptRegistry;

impl PromptRegistry {
    /// List all prompt definitions the descriptor declares.
    pub fn list_prompts(descriptor: &ProtocolDescriptor) -> Vec<PromptDefinition> {
        descriptor
            .capabilities
            .prompts
            .iter()
            .map(|prompt| PromptDefinition {
                name: prompt.name.clone(),
                description: prompt.description.clone(),
                arguments: prompt
                    .variables
                    .iter()
                    .map(|v| PromptArgument {
                        name: v.name.clone(),
                        description: v.description.clone(),
                        required: v.required,
                    })
                    .collect(),
            })
            .collect()
    }

    /// Expand a prompt with the given arguments.
    pub fn get(
        descriptor: &ProtocolDescriptor,
        name: &str,
        arguments: Option<Value>,
    ) -> McpResult<PromptGetResult> {
        let prompt = descriptor
            .find_prompt(name)
            .ok_or_else(|| McpError::invalid(format!("unknown prompt '{name}'")))?;

        let args = match arguments {
            None | Some(Value::Null) => serde_json::Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(McpError::SchemaValidation {
                    path: Some("/arguments".to_string()),
                    message: "prompt arguments must be an object".to_string(),
                })
            }
        };

        expand::expand(prompt, &args)
    }
}
