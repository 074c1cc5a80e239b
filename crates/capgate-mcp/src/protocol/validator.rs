//! Parameter validation for incoming requests.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::types::{McpError, McpResult};

/// Deserialize request params into `T`, reporting failures as schema errors.
/// Absent params are treated as an empty object.
pub fn parse_params<T: DeserializeOwned>(method: &str, params: Option<Value>) -> McpResult<T> {
    let params = params.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value(params).map_err(|e| McpError::SchemaValidation {
        path: None,
        message: format!("invalid params for {method}: {e}"),
    })
}

/// Tool arguments must be an object when present; absent means `{}`.
pub fn tool_arguments(arguments: Option<Value>) -> McpResult<Value> {
    match arguments {
        None | Some(Value::Null) => Ok(Value::Object(serde_json::Map::new())),
        Some(value @ Value::Object(_)) => Ok(value),
        Some(_) => Err(McpError::SchemaValidation {
            path: Some("/arguments".to_string()),
            message: "arguments must be an object".to_string(),
        }),
    }
}

/// Method names are non-empty and contain no whitespace.
pub fn validate_method_name(method: &str) -> McpResult<()> {
    if method.is_empty() || method.chars().any(char::is_whitespace) {
        return Err(McpError::invalid(format!("invalid method name '{method}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResourceReadParams, ToolCallParams};
    use serde_json::json;

    #[test]
    fn parses_known_shapes() {
        let params: ToolCallParams =
            parse_params("tools/call", Some(json!({"name": "read_text", "arguments": {"path": "a"}}))).unwrap();
        assert_eq!(params.name, "read_text");
    }

    #[test]
    fn missing_fields_are_schema_errors() {
        let err = parse_params::<ResourceReadParams>("resources/read", None).unwrap_err();
        assert!(matches!(err, McpError::SchemaValidation { .. }));
        assert!(err.to_string().contains("uri"));
    }

    #[test]
    fn arguments_must_be_objects() {
        assert_eq!(tool_arguments(None).unwrap(), json!({}));
        assert!(tool_arguments(Some(json!([1]))).is_err());
    }

    #[test]
    fn method_names() {
        assert!(validate_method_name("tools/call").is_ok());
        assert!(validate_method_name("").is_err());
        assert!(validate_method_name("tools call").is_err());
    }
}
