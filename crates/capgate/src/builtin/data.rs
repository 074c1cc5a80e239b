//! `data` adapter: stateless format conversions.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use serde_json::{json, Value};

use crate::adapter::{str_arg, validate_args, CapabilityAdapter};
use crate::descriptor::{ProtocolDescriptor, SamplingPolicy, ToolDefinition};
use crate::error::{AdapterError, AdapterResult};
use crate::version::{CompatibilityRange, Version};

/// Protocol name served by [`DataAdapter`].
pub const DATA_PROTOCOL: &str = "data";

/// Converts between JSON, TOML, base64 and hex.
pub struct DataAdapter {
    descriptor: ProtocolDescriptor,
}

fn text_input(field: &str, description: &str) -> Value {
    json!({
        "type": "object",
        "properties": { field: { "type": "string", "description": description } },
        "required": [field]
    })
}

impl DataAdapter {
    pub fn new() -> Self {
        let descriptor = ProtocolDescriptor::new(
            DATA_PROTOCOL,
            Version::new(1, 0, 0),
            CompatibilityRange::half_open(Version::new(1, 0, 0), Version::new(2, 0, 0)),
        )
        .describe("Convert structured data between common text encodings")
        .tool(ToolDefinition::new(
            "json_to_toml",
            "Render a JSON object as TOML",
            json!({
                "type": "object",
                "properties": { "data": { "type": "object" } },
                "required": ["data"]
            }),
        ))
        .tool(ToolDefinition::new(
            "toml_to_json",
            "Parse TOML text into JSON",
            text_input("text", "TOML document"),
        ))
        .tool(ToolDefinition::new(
            "base64_encode",
            "Encode UTF-8 text as base64",
            text_input("text", "Text to encode"),
        ))
        .tool(ToolDefinition::new(
            "base64_decode",
            "Decode base64 into UTF-8 text",
            text_input("encoded", "Base64 input"),
        ))
        .tool(ToolDefinition::new(
            "hex_encode",
            "Encode UTF-8 text as lowercase hex",
            text_input("text", "Text to encode"),
        ))
        .tool(ToolDefinition::new(
            "pretty_json",
            "Re-indent a JSON document",
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "indent": { "type": "integer", "minimum": 0, "maximum": 8 }
                },
                "required": ["text"]
            }),
        ));

        Self { descriptor }
    }
}

impl Default for DataAdapter {
    fn default() -> Self {
        Self::new()
    }
}

fn json_to_toml(args: &Value) -> AdapterResult<Value> {
    let data = args.get("data").cloned().unwrap_or_default();
    let table: toml::Value =
        serde_json::from_value(data).map_err(|e| AdapterError::backend("toml", e))?;
    let text = toml::to_string(&table).map_err(|e| AdapterError::backend("toml", e))?;
    Ok(json!({ "text": text }))
}

fn toml_to_json(args: &Value) -> AdapterResult<Value> {
    let text = str_arg(args, "text")?;
    let parsed: toml::Value = toml::from_str(text).map_err(|e| AdapterError::backend("toml", e))?;
    let data = serde_json::to_value(parsed)?;
    Ok(json!({ "data": data }))
}

fn base64_encode(args: &Value) -> AdapterResult<Value> {
    let text = str_arg(args, "text")?;
    Ok(json!({ "encoded": BASE64_STANDARD.encode(text.as_bytes()) }))
}

fn base64_decode(args: &Value) -> AdapterResult<Value> {
    let encoded = str_arg(args, "encoded")?;
    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| AdapterError::backend("base64", e))?;
    let text = String::from_utf8(bytes).map_err(|e| AdapterError::backend("utf-8", e))?;
    Ok(json!({ "text": text }))
}

fn hex_encode(args: &Value) -> AdapterResult<Value> {
    let text = str_arg(args, "text")?;
    Ok(json!({ "hex": hex::encode(text.as_bytes()) }))
}

fn pretty_json(args: &Value) -> AdapterResult<Value> {
    let text = str_arg(args, "text")?;
    let indent = args.get("indent").and_then(Value::as_u64).unwrap_or(2) as usize;
    let parsed: Value = serde_json::from_str(text)?;

    let indent_bytes = vec![b' '; indent];
    let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent_bytes);
    let mut out = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    serde::Serialize::serialize(&parsed, &mut serializer)?;
    let text = String::from_utf8(out).map_err(|e| AdapterError::backend("utf-8", e))?;
    Ok(json!({ "text": text }))
}

#[async_trait]
impl CapabilityAdapter for DataAdapter {
    fn describe(&self) -> &ProtocolDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, method: &str, args: Value, _sampling: &SamplingPolicy) -> AdapterResult<Value> {
        validate_args(&self.descriptor, method, &args)?;

        match method {
            "json_to_toml" => json_to_toml(&args),
            "toml_to_json" => toml_to_json(&args),
            "base64_encode" => base64_encode(&args),
            "base64_decode" => base64_decode(&args),
            "hex_encode" => hex_encode(&args),
            "pretty_json" => pretty_json(&args),
            other => Err(AdapterError::UnknownMethod(other.to_string())),
        }
    }
}
