//! Validation of tool arguments against their declared parameter schema.
//!
//! Supports the JSON-Schema subset that tool declarations use: `type`,
//! `required`, `properties`, `additionalProperties: false`, `enum`, `items`,
//! `minimum`/`maximum` and `minLength`/`maxLength`. Other keywords are
//! ignored.

use serde_json::Value;

use crate::error::{AdapterError, AdapterResult};

/// Schema `format` marking a property as a path that roots apply to.
pub const PATH_FORMAT: &str = "path";

/// Validate `value` against `schema`, reporting the first violation.
pub fn validate(schema: &Value, value: &Value) -> AdapterResult<()> {
    validate_at(schema, value, "")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> AdapterResult<()> {
    let Some(schema) = schema.as_object() else {
        // `true` / `{}` / anything non-object accepts every value
        return Ok(());
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(s) => vec![s.as_str()],
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| matches_type(t, value)) {
            return Err(AdapterError::schema(
                path,
                format!("expected {}, got {}", allowed.join(" or "), type_name(value)),
            ));
        }
    }

    if let Some(Value::Array(choices)) = schema.get("enum") {
        if !choices.contains(value) {
            return Err(AdapterError::schema(path, "value is not one of the allowed options"));
        }
    }

    match value {
        Value::Object(map) => {
            if let Some(Value::Array(required)) = schema.get("required") {
                for name in required.iter().filter_map(Value::as_str) {
                    if !map.contains_key(name) {
                        return Err(AdapterError::schema(
                            path,
                            format!("missing required property '{name}'"),
                        ));
                    }
                }
            }

            let properties = schema.get("properties").and_then(Value::as_object);
            for (key, item) in map {
                let child = format!("{path}/{key}");
                match properties.and_then(|p| p.get(key)) {
                    Some(sub) => validate_at(sub, item, &child)?,
                    None if schema.get("additionalProperties") == Some(&Value::Bool(false)) => {
                        return Err(AdapterError::schema(child, "unexpected property"));
                    }
                    None => {}
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (index, item) in items.iter().enumerate() {
                    validate_at(item_schema, item, &format!("{path}/{index}"))?;
                }
            }
        }
        Value::Number(n) => {
            let n = n.as_f64().unwrap_or_default();
            if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
                if n < min {
                    return Err(AdapterError::schema(path, format!("must be >= {min}")));
                }
            }
            if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
                if n > max {
                    return Err(AdapterError::schema(path, format!("must be <= {max}")));
                }
            }
        }
        Value::String(s) => {
            let len = s.chars().count() as u64;
            if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
                if len < min {
                    return Err(AdapterError::schema(
                        path,
                        format!("must be at least {min} characters"),
                    ));
                }
            }
            if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
                if len > max {
                    return Err(AdapterError::schema(
                        path,
                        format!("must be at most {max} characters"),
                    ));
                }
            }
        }
        _ => {}
    }

    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Collect the string values of top-level properties declared with
/// `"format": "path"`.
pub fn root_scoped_values(schema: &Value, args: &Value) -> Vec<String> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    properties
        .iter()
        .filter(|(_, prop)| prop.get("format").and_then(Value::as_str) == Some(PATH_FORMAT))
        .filter_map(|(name, _)| args.get(name).and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "format": "path", "minLength": 1 },
                "limit": { "type": "integer", "minimum": 1, "maximum": 100 },
                "mode": { "type": "string", "enum": ["fast", "slow"] },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn path_of(err: AdapterError) -> String {
        match err {
            AdapterError::SchemaValidation { path, .. } => path,
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn accepts_valid_arguments() {
        let args = json!({"path": "a.txt", "limit": 10, "mode": "fast", "tags": ["x"]});
        assert!(validate(&schema(), &args).is_ok());
    }

    #[test]
    fn reports_missing_required() {
        let err = validate(&schema(), &json!({"limit": 3})).unwrap_err();
        assert!(err.to_string().contains("missing required property 'path'"));
    }

    #[test]
    fn reports_nested_paths() {
        let err = validate(&schema(), &json!({"path": "a", "tags": ["ok", 7]})).unwrap_err();
        assert_eq!(path_of(err), "/tags/1");

        let err = validate(&schema(), &json!({"path": "a", "limit": 500})).unwrap_err();
        assert_eq!(path_of(err), "/limit");
    }

    #[test]
    fn rejects_wrong_types_and_extras() {
        assert!(validate(&schema(), &json!("nope")).is_err());
        assert!(validate(&schema(), &json!({"path": "a", "limit": 1.5})).is_err());
        assert!(validate(&schema(), &json!({"path": "a", "mode": "medium"})).is_err());
        let err = validate(&schema(), &json!({"path": "a", "extra": true})).unwrap_err();
        assert_eq!(path_of(err), "/extra");
    }

    #[test]
    fn collects_path_arguments() {
        let paths = root_scoped_values(&schema(), &json!({"path": "/srv/a.txt", "mode": "fast"}));
        assert_eq!(paths, vec!["/srv/a.txt".to_string()]);
    }
}
