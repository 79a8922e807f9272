//! Input-source parsing: chat messages, responses input items, prompts.

use serde_json::Value;

use crate::canonical::{ContentPart, InputItem, Role};
use crate::collect::opaque_to_string;
use crate::protocol::openai::{ChatContent, ChatMessage};

/// A parsed input candidate plus any instructions extracted from it.
#[derive(Debug, Default)]
pub(crate) struct ParsedInput {
    pub items: Vec<InputItem>,
    pub extracted_instructions: Option<String>,
}

impl ParsedInput {
    /// A candidate is usable when it yields at least one item or
    /// non-empty instructions.
    pub(crate) fn is_usable(&self) -> bool {
        !self.items.is_empty() || self.extracted_instructions.as_deref().is_some_and(|i| !i.is_empty())
    }
}

/// How system messages in a `messages` array are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SystemHandling {
    /// Extract text-only system messages into instructions; demote the
    /// rest to user.
    Extract,
    /// Promote the first system message to position 0 with role `user`.
    PromoteFirst,
}

/// Convert a chat `messages` array into input items.
pub(crate) fn from_messages(messages: &[ChatMessage], system: SystemHandling) -> ParsedInput {
    let mut items = Vec::new();
    let mut instructions: Vec<String> = Vec::new();
    let mut promoted: Option<InputItem> = None;

    for message in messages {
        match message.role.as_str() {
            "system" | "developer" => {
                let parts = content_parts(message, Role::User);
                let text_only = parts.iter().all(|p| p.text().is_some());

                match system {
                    SystemHandling::Extract if text_only => {
                        let text = parts.iter().filter_map(ContentPart::text).collect::<Vec<_>>().join("\n");
                        if !text.is_empty() {
                            instructions.push(text);
                        }
                    }
                    SystemHandling::PromoteFirst if promoted.is_none() => {
                        promoted = Some(InputItem::Message {
                            role: Role::User,
                            content: parts,
                        });
                    }
                    // Non-text system messages, and system messages after
                    // the promoted one, are demoted to user in place.
                    _ => {
                        if !parts.is_empty() {
                            items.push(InputItem::Message {
                                role: Role::User,
                                content: parts,
                            });
                        }
                    }
                }
            }
            "assistant" => {
                let parts = content_parts(message, Role::Assistant);
                if !parts.is_empty() {
                    items.push(InputItem::Message {
                        role: Role::Assistant,
                        content: parts,
                    });
                }

                for call in message.tool_calls.iter().flatten() {
                    items.push(InputItem::FunctionCall {
                        call_id: call
                            .id
                            .clone()
                            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                        name: call.function.name.clone().unwrap_or_default(),
                        arguments: opaque_to_string(call.function.arguments.as_ref()),
                    });
                }
            }
            "tool" => {
                let output = content_parts(message, Role::User)
                    .iter()
                    .filter_map(ContentPart::text)
                    .collect::<Vec<_>>()
                    .join("");

                items.push(InputItem::FunctionCallOutput {
                    call_id: message.tool_call_id.clone().unwrap_or_default(),
                    output,
                });
            }
            // Unknown roles are treated as user input.
            _ => {
                let parts = content_parts(message, Role::User);
                if !parts.is_empty() {
                    items.push(InputItem::Message {
                        role: Role::User,
                        content: parts,
                    });
                }
            }
        }
    }

    if let Some(promoted) = promoted {
        items.insert(0, promoted);
    }

    ParsedInput {
        items,
        extracted_instructions: join_instructions(instructions),
    }
}

fn content_parts(message: &ChatMessage, role: Role) -> Vec<ContentPart> {
    let make_text = |text: String| match role {
        Role::Assistant => ContentPart::OutputText { text },
        _ => ContentPart::InputText { text },
    };

    match &message.content {
        Some(ChatContent::Text(text)) => vec![make_text(text.clone())],
        Some(ChatContent::Parts(parts)) => parts
            .iter()
            .filter_map(|part| match part.r#type.as_str() {
                "text" | "input_text" | "output_text" => part.text.clone().map(make_text),
                "image_url" | "input_image" => part.image_url.as_ref().map(|image| ContentPart::InputImage {
                    image_url: image.url().to_string(),
                }),
                _ => None,
            })
            .collect(),
        None => Vec::new(),
    }
}

/// Convert a responses `input` value (string or item array) into input
/// items. Text-only system items are extracted into instructions;
/// non-text system items are demoted to user.
pub(crate) fn from_input_value(input: &Value) -> ParsedInput {
    match input {
        Value::String(text) => ParsedInput {
            items: vec![InputItem::message(Role::User, text.clone())],
            extracted_instructions: None,
        },
        Value::Array(raw_items) => {
            let mut items = Vec::new();
            let mut instructions: Vec<String> = Vec::new();

            for raw in raw_items {
                match raw.get("type").and_then(Value::as_str) {
                    Some("message") | None => {
                        let Some(role_str) = raw.get("role").and_then(Value::as_str) else {
                            continue;
                        };

                        let parts = input_item_parts(raw, role_str);

                        if role_str == "system" || role_str == "developer" {
                            let text_only = parts.iter().all(|p| p.text().is_some());

                            if text_only {
                                let text =
                                    parts.iter().filter_map(ContentPart::text).collect::<Vec<_>>().join("\n");
                                if !text.is_empty() {
                                    instructions.push(text);
                                }
                            } else if !parts.is_empty() {
                                items.push(InputItem::Message {
                                    role: Role::User,
                                    content: parts,
                                });
                            }
                        } else if !parts.is_empty() {
                            let role = match role_str {
                                "assistant" => Role::Assistant,
                                _ => Role::User,
                            };

                            items.push(InputItem::Message { role, content: parts });
                        }
                    }
                    Some("function_call") => {
                        items.push(InputItem::FunctionCall {
                            call_id: string_field(raw, "call_id"),
                            name: string_field(raw, "name"),
                            arguments: opaque_to_string(raw.get("arguments")),
                        });
                    }
                    Some("function_call_output") => {
                        items.push(InputItem::FunctionCallOutput {
                            call_id: string_field(raw, "call_id"),
                            output: opaque_to_string(raw.get("output")),
                        });
                    }
                    Some("custom_tool_call") => {
                        items.push(InputItem::CustomToolCall {
                            call_id: string_field(raw, "call_id"),
                            name: string_field(raw, "name"),
                            input: raw.get("input").cloned().unwrap_or(Value::Null),
                        });
                    }
                    // Unknown item types are dropped.
                    Some(_) => {}
                }
            }

            ParsedInput {
                items,
                extracted_instructions: join_instructions(instructions),
            }
        }
        _ => ParsedInput::default(),
    }
}

fn input_item_parts(raw: &Value, role: &str) -> Vec<ContentPart> {
    match raw.get("content") {
        Some(Value::String(text)) => {
            let part = if role == "assistant" {
                ContentPart::OutputText { text: text.clone() }
            } else {
                ContentPart::InputText { text: text.clone() }
            };
            vec![part]
        }
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| {
                let part_type = part.get("type").and_then(Value::as_str)?;
                match part_type {
                    "input_text" | "text" => Some(ContentPart::InputText {
                        text: part.get("text").and_then(Value::as_str)?.to_string(),
                    }),
                    "output_text" => Some(ContentPart::OutputText {
                        text: part.get("text").and_then(Value::as_str)?.to_string(),
                    }),
                    "input_image" | "image_url" => {
                        let url = match part.get("image_url") {
                            Some(Value::String(url)) => url.clone(),
                            Some(Value::Object(map)) => map.get("url").and_then(Value::as_str)?.to_string(),
                            _ => return None,
                        };
                        Some(ContentPart::InputImage { image_url: url })
                    }
                    // Unknown part types are dropped.
                    _ => None,
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// A synthetic user message from a legacy `prompt` field.
pub(crate) fn from_prompt(prompt: &Value) -> Option<ParsedInput> {
    let text = match prompt {
        Value::String(text) => text.clone(),
        Value::Array(parts) => {
            let joined = parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n");

            if joined.is_empty() {
                return None;
            }
            joined
        }
        _ => return None,
    };

    if text.is_empty() {
        return None;
    }

    Some(ParsedInput {
        items: vec![InputItem::message(Role::User, text)],
        extracted_instructions: None,
    })
}

fn string_field(raw: &Value, key: &str) -> String {
    raw.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn join_instructions(collected: Vec<String>) -> Option<String> {
    if collected.is_empty() {
        None
    } else {
        Some(collected.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn message(role: &str, content: &str) -> ChatMessage {
        serde_json::from_value(json!({"role": role, "content": content})).unwrap()
    }

    #[test]
    fn extract_pulls_system_text_into_instructions() {
        let messages = vec![message("system", "be brief"), message("user", "hi")];
        let parsed = from_messages(&messages, SystemHandling::Extract);

        assert_eq!(parsed.extracted_instructions.as_deref(), Some("be brief"));
        assert_eq!(parsed.items, vec![InputItem::message(Role::User, "hi")]);
    }

    #[test]
    fn promote_first_moves_system_to_front_as_user() {
        let messages = vec![message("user", "hi"), message("system", "be brief")];
        let parsed = from_messages(&messages, SystemHandling::PromoteFirst);

        assert_eq!(
            parsed.items,
            vec![
                InputItem::message(Role::User, "be brief"),
                InputItem::message(Role::User, "hi"),
            ]
        );
        assert_eq!(parsed.extracted_instructions, None);
    }

    #[test]
    fn non_text_system_messages_are_demoted_to_user() {
        let messages: Vec<ChatMessage> = serde_json::from_value(json!([
            {"role": "system", "content": [{"type": "image_url", "image_url": "https://x/a.png"}]},
        ]))
        .unwrap();

        let parsed = from_messages(&messages, SystemHandling::Extract);

        assert_eq!(parsed.extracted_instructions, None);
        assert_eq!(
            parsed.items,
            vec![InputItem::Message {
                role: Role::User,
                content: vec![ContentPart::InputImage {
                    image_url: "https://x/a.png".to_string()
                }],
            }]
        );
    }

    #[test]
    fn assistant_tool_calls_become_function_call_items() {
        let messages: Vec<ChatMessage> = serde_json::from_value(json!([
            {"role": "assistant", "content": null, "tool_calls": [
                {"id": "call_1", "type": "function", "function": {"name": "f", "arguments": "{\"a\":1}"}}
            ]},
            {"role": "tool", "tool_call_id": "call_1", "content": "ok"},
        ]))
        .unwrap();

        let parsed = from_messages(&messages, SystemHandling::Extract);

        assert_eq!(
            parsed.items,
            vec![
                InputItem::FunctionCall {
                    call_id: "call_1".to_string(),
                    name: "f".to_string(),
                    arguments: "{\"a\":1}".to_string(),
                },
                InputItem::FunctionCallOutput {
                    call_id: "call_1".to_string(),
                    output: "ok".to_string(),
                },
            ]
        );
    }

    #[test]
    fn structured_tool_call_arguments_are_stringified() {
        let messages: Vec<ChatMessage> = serde_json::from_value(json!([
            {"role": "assistant", "tool_calls": [
                {"id": "call_1", "function": {"name": "f", "arguments": {"a": 1}}}
            ]},
        ]))
        .unwrap();

        let parsed = from_messages(&messages, SystemHandling::Extract);

        assert!(matches!(
            &parsed.items[0],
            InputItem::FunctionCall { arguments, .. } if arguments == r#"{"a":1}"#
        ));
    }

    #[test]
    fn string_input_becomes_a_user_message() {
        let parsed = from_input_value(&json!("hi"));

        assert_eq!(parsed.items, vec![InputItem::message(Role::User, "hi")]);
    }

    #[test]
    fn input_array_parses_all_item_kinds() {
        let parsed = from_input_value(&json!([
            {"type": "message", "role": "system", "content": "sys"},
            {"role": "user", "content": [{"type": "input_text", "text": "hi"}]},
            {"type": "function_call", "call_id": "c1", "name": "f", "arguments": "{}"},
            {"type": "function_call_output", "call_id": "c1", "output": "ok"},
            {"type": "reasoning", "summary": []},
        ]));

        assert_eq!(parsed.extracted_instructions.as_deref(), Some("sys"));
        assert_eq!(parsed.items.len(), 3);
        assert!(matches!(parsed.items[1], InputItem::FunctionCall { .. }));
    }

    #[test]
    fn unknown_part_types_are_dropped() {
        let parsed = from_input_value(&json!([
            {"role": "user", "content": [
                {"type": "input_text", "text": "hi"},
                {"type": "input_audio", "data": "…"},
            ]},
        ]));

        assert_eq!(
            parsed.items,
            vec![InputItem::Message {
                role: Role::User,
                content: vec![ContentPart::InputText { text: "hi".to_string() }],
            }]
        );
    }

    #[test]
    fn prompt_accepts_string_and_string_array() {
        assert_eq!(
            from_prompt(&json!("complete me")).unwrap().items,
            vec![InputItem::message(Role::User, "complete me")]
        );
        assert_eq!(
            from_prompt(&json!(["a", "b"])).unwrap().items,
            vec![InputItem::message(Role::User, "a\nb")]
        );
        assert!(from_prompt(&json!("")).is_none());
        assert!(from_prompt(&json!(42)).is_none());
    }

    #[test]
    fn usable_requires_items_or_instructions() {
        assert!(!ParsedInput::default().is_usable());
        assert!(
            ParsedInput {
                items: Vec::new(),
                extracted_instructions: Some("sys".to_string()),
            }
            .is_usable()
        );
    }
}
