//! Declarative `{variable}` substitution.

use std::collections::HashMap;

use serde_json::{Map, Value};

use capgate::Prompt;

use crate::types::{McpError, McpResult, PromptGetResult, PromptMessage, ToolContent};

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// One pass over `template`, replacing `{name}` for every known name.
fn substitute(template: &str, values: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let name = tail[1..].find(['{', '}']).map(|end| &tail[1..=end]);
        match name.filter(|n| tail[n.len() + 1..].starts_with('}')) {
            Some(name) => {
                match values.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&tail[..name.len() + 2]),
                }
                rest = &tail[name.len() + 2..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Fill `prompt`'s template from `args`. Declared variables that are absent
/// render empty unless required; placeholders for undeclared names are left
/// as written. Substituted text is never rescanned.
pub fn expand(prompt: &Prompt, args: &Map<String, Value>) -> McpResult<PromptGetResult> {
    let mut values = HashMap::with_capacity(prompt.variables.len());
    for variable in &prompt.variables {
        let value = match args.get(&variable.name) {
            Some(value) if !value.is_null() => render_value(value),
            _ if variable.required => {
                return Err(McpError::SchemaValidation {
                    path: Some(format!("/arguments/{}", variable.name)),
                    message: format!("'{}' argument is required", variable.name),
                })
            }
            _ => String::new(),
        };
        values.insert(variable.name.as_str(), value);
    }

    let text = substitute(&prompt.template, &values);
    Ok(PromptGetResult {
        description: prompt.description.clone(),
        messages: vec![PromptMessage {
            role: "user".to_string(),
            content: ToolContent::Text { text },
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use capgate::PromptVariable;
    use serde_json::json;

    fn prompt() -> Prompt {
        Prompt {
            name: "review".into(),
            description: Some("Review a file".into()),
            template: "Review {path}. Focus: {focus}. Keep {unknown} as is.".into(),
            variables: vec![
                PromptVariable {
                    name: "path".into(),
                    description: None,
                    required: true,
                },
                PromptVariable {
                    name: "focus".into(),
                    description: None,
                    required: false,
                },
            ],
        }
    }

    fn text(result: &PromptGetResult) -> &str {
        match &result.messages[0].content {
            ToolContent::Text { text } => text,
            _ => panic!("Expected text"),
        }
    }

    #[test]
    fn substitutes_declared_variables() {
        let args = json!({"path": "src/main.rs", "focus": 3});
        let result = expand(&prompt(), args.as_object().unwrap()).unwrap();
        assert_eq!(text(&result), "Review src/main.rs. Focus: 3. Keep {unknown} as is.");
    }

    #[test]
    fn optional_variables_render_empty() {
        let args = json!({"path": "a.txt"});
        let result = expand(&prompt(), args.as_object().unwrap()).unwrap();
        assert!(text(&result).contains("Focus: ."));
    }

    #[test]
    fn substituted_text_is_not_expanded_again() {
        let args = json!({"path": "{focus}", "focus": "speed"});
        let result = expand(&prompt(), args.as_object().unwrap()).unwrap();
        assert_eq!(text(&result), "Review {focus}. Focus: speed. Keep {unknown} as is.");
    }

    #[test]
    fn unclosed_braces_are_kept() {
        let mut prompt = prompt();
        prompt.template = "{path} costs {{path}".into();
        let args = json!({"path": "a"});
        let result = expand(&prompt, args.as_object().unwrap()).unwrap();
        assert_eq!(text(&result), "a costs {a");
    }

    #[test]
    fn missing_required_variable_is_rejected() {
        let err = expand(&prompt(), &Map::new()).unwrap_err();
        assert!(matches!(err, McpError::SchemaValidation { path: Some(ref p), .. } if p == "/arguments/path"));
    }
}
