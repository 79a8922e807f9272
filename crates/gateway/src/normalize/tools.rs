//! Tool unification across dialects.

use serde_json::Value;

use crate::canonical::{ToolDef, empty_parameters};
use crate::protocol::anthropic::AnthropicTool;

/// Unify a tool list that may mix chat-format entries
/// (`{type: function, function: {…}}`) and responses-format entries
/// (`{type: function, name, …}`). Tools of unknown type are dropped.
pub(crate) fn unify(raw_tools: &[Value]) -> Vec<ToolDef> {
    let mut tools = Vec::new();

    for raw in raw_tools {
        let tool_type = raw.get("type").and_then(Value::as_str).unwrap_or("function");

        match tool_type {
            "function" => {
                // Chat format nests the declaration under `function`.
                let declaration = raw.get("function").unwrap_or(raw);

                let Some(name) = declaration.get("name").and_then(Value::as_str) else {
                    log::debug!("Dropping function tool without a name");
                    continue;
                };

                tools.push(ToolDef::Function {
                    name: name.to_string(),
                    description: declaration
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    parameters: declaration
                        .get("parameters")
                        .filter(|p| !p.is_null())
                        .cloned()
                        .unwrap_or_else(empty_parameters),
                    strict: declaration.get("strict").and_then(Value::as_bool).unwrap_or(false),
                });
            }
            "custom" => {
                let Some(name) = raw.get("name").and_then(Value::as_str) else {
                    log::debug!("Dropping custom tool without a name");
                    continue;
                };

                tools.push(ToolDef::Custom {
                    name: name.to_string(),
                    description: raw.get("description").and_then(Value::as_str).map(str::to_string),
                });
            }
            "web_search" => tools.push(ToolDef::WebSearch),
            "web_search_preview" => tools.push(ToolDef::WebSearchPreview),
            other => {
                log::debug!("Dropping tool of unsupported type '{other}'");
            }
        }
    }

    tools
}

/// Convert Anthropic tool declarations into function tools.
pub(crate) fn from_anthropic(raw_tools: &[AnthropicTool]) -> Vec<ToolDef> {
    raw_tools
        .iter()
        .map(|tool| ToolDef::Function {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool
                .input_schema
                .clone()
                .filter(|schema| !schema.is_null())
                .unwrap_or_else(empty_parameters),
            strict: false,
        })
        .collect()
}

/// Whether the opaque tool choice forbids tool use entirely.
pub(crate) fn choice_is_none(tool_choice: Option<&Value>) -> bool {
    tool_choice.and_then(Value::as_str) == Some("none")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_both_function_shapes() {
        let tools = unify(&[
            json!({"type": "function", "function": {"name": "chat_shape", "parameters": {"type": "object"}}}),
            json!({"type": "function", "name": "responses_shape"}),
        ]);

        assert_eq!(tools.len(), 2);
        assert!(matches!(&tools[0], ToolDef::Function { name, .. } if name == "chat_shape"));
        assert!(
            matches!(&tools[1], ToolDef::Function { parameters, .. } if parameters == &empty_parameters())
        );
    }

    #[test]
    fn nameless_function_tools_are_dropped() {
        let tools = unify(&[json!({"type": "function", "function": {}})]);
        assert!(tools.is_empty());
    }

    #[test]
    fn missing_strict_defaults_to_false() {
        let tools = unify(&[json!({"type": "function", "name": "f"})]);
        assert!(matches!(&tools[0], ToolDef::Function { strict: false, .. }));
    }

    #[test]
    fn passthrough_and_unknown_types() {
        let tools = unify(&[
            json!({"type": "web_search"}),
            json!({"type": "web_search_preview"}),
            json!({"type": "custom", "name": "patcher"}),
            json!({"type": "computer_use"}),
        ]);

        assert_eq!(
            tools,
            vec![
                ToolDef::WebSearch,
                ToolDef::WebSearchPreview,
                ToolDef::Custom {
                    name: "patcher".to_string(),
                    description: None,
                },
            ]
        );
    }

    #[test]
    fn anthropic_tools_map_to_function_tools() {
        let raw: Vec<AnthropicTool> = serde_json::from_value(json!([
            {"name": "get_weather", "description": "d", "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}}},
            {"name": "bare"},
        ]))
        .unwrap();

        let tools = from_anthropic(&raw);

        assert!(matches!(
            &tools[0],
            ToolDef::Function { name, parameters, .. }
                if name == "get_weather" && parameters["properties"]["city"]["type"] == json!("string")
        ));
        assert!(matches!(&tools[1], ToolDef::Function { parameters, .. } if parameters == &empty_parameters()));
    }

    #[test]
    fn none_choice_detection() {
        assert!(choice_is_none(Some(&json!("none"))));
        assert!(!choice_is_none(Some(&json!("auto"))));
        assert!(!choice_is_none(Some(&json!({"type": "function", "name": "f"}))));
        assert!(!choice_is_none(None));
    }
}
