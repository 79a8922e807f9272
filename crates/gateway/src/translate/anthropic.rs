//! Anthropic Messages stream translator and encoder.

use std::collections::HashMap;

use bytes::Bytes;
use serde_json::{Value, json};

use config::ReasoningCompat;

use crate::collect::{CollectedResponse, TokenUsage};
use crate::protocol::anthropic::StreamEvent;
use crate::protocol::responses::events;
use crate::sse::SseEvent;

use super::{StreamTranslator, sse_event};

/// Streams Anthropic SSE: `message_start`, `ping`, content block
/// lifecycles, `message_delta`, `message_stop`.
pub struct AnthropicTranslator {
    model: String,
    compat: ReasoningCompat,
    message_id: String,
    started: bool,
    next_block_index: u32,
    open_text_block: Option<u32>,
    open_thinking_block: Option<u32>,
    think_open: bool,
    think_closed: bool,
    argument_buffers: HashMap<String, String>,
    saw_tool_use: bool,
    usage: Option<TokenUsage>,
    terminated: bool,
    saw_event: bool,
}

impl AnthropicTranslator {
    /// A translator for one request.
    pub fn new(model: String, compat: ReasoningCompat) -> Self {
        Self {
            model,
            compat,
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            started: false,
            next_block_index: 0,
            open_text_block: None,
            open_thinking_block: None,
            think_open: false,
            think_closed: false,
            argument_buffers: HashMap::new(),
            saw_tool_use: false,
            usage: None,
            terminated: false,
            saw_event: false,
        }
    }

    fn emit(&self, event: &StreamEvent, out: &mut Vec<Bytes>) {
        match serde_json::to_string(event) {
            Ok(data) => out.push(sse_event(event.event_name(), &data)),
            Err(e) => log::error!("Failed to serialize Anthropic stream event: {e}"),
        }
    }

    fn ensure_started(&mut self, out: &mut Vec<Bytes>) {
        if self.started {
            return;
        }
        self.started = true;

        let start = StreamEvent::MessageStart {
            message: json!({
                "id": self.message_id,
                "type": "message",
                "role": "assistant",
                "model": self.model,
                "content": [],
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {"input_tokens": 0, "output_tokens": 0},
            }),
        };

        self.emit(&start, out);
        self.emit(&StreamEvent::Ping, out);
    }

    fn open_text_block_index(&mut self, out: &mut Vec<Bytes>) -> u32 {
        if let Some(index) = self.open_text_block {
            return index;
        }

        let index = self.next_block_index;
        self.next_block_index += 1;
        self.open_text_block = Some(index);

        self.emit(
            &StreamEvent::ContentBlockStart {
                index,
                content_block: json!({"type": "text", "text": ""}),
            },
            out,
        );

        index
    }

    fn close_text_block(&mut self, out: &mut Vec<Bytes>) {
        // An open `<think>` run closes with its tag before the block stops.
        if self.think_open {
            self.think_open = false;
            self.think_closed = true;

            if let Some(index) = self.open_text_block {
                self.emit(
                    &StreamEvent::ContentBlockDelta {
                        index,
                        delta: json!({"type": "text_delta", "text": "</think>"}),
                    },
                    out,
                );
            }
        }

        if let Some(index) = self.open_text_block.take() {
            self.emit(&StreamEvent::ContentBlockStop { index }, out);
        }
    }

    fn close_thinking_block(&mut self, out: &mut Vec<Bytes>) {
        if let Some(index) = self.open_thinking_block.take() {
            self.emit(&StreamEvent::ContentBlockStop { index }, out);
        }
    }

    fn emit_text(&mut self, text: &str, out: &mut Vec<Bytes>) {
        let index = self.open_text_block_index(out);

        self.emit(
            &StreamEvent::ContentBlockDelta {
                index,
                delta: json!({"type": "text_delta", "text": text}),
            },
            out,
        );
    }

    fn emit_reasoning(&mut self, delta: &str, out: &mut Vec<Bytes>) {
        match self.compat {
            ReasoningCompat::ThinkTags => {
                if self.think_closed {
                    return;
                }

                if !self.think_open {
                    self.think_open = true;
                    self.emit_text("<think>", out);
                }

                self.emit_text(delta, out);
            }
            // The other modes surface reasoning as native thinking blocks.
            ReasoningCompat::O3 | ReasoningCompat::Legacy => {
                let index = match self.open_thinking_block {
                    Some(index) => index,
                    None => {
                        let index = self.next_block_index;
                        self.next_block_index += 1;
                        self.open_thinking_block = Some(index);

                        self.emit(
                            &StreamEvent::ContentBlockStart {
                                index,
                                content_block: json!({"type": "thinking", "thinking": ""}),
                            },
                            out,
                        );

                        index
                    }
                };

                self.emit(
                    &StreamEvent::ContentBlockDelta {
                        index,
                        delta: json!({"type": "thinking_delta", "thinking": delta}),
                    },
                    out,
                );
            }
        }
    }

    fn handle_tool_call_done(&mut self, item: &Value, out: &mut Vec<Bytes>) {
        let item_id = item.get("id").and_then(Value::as_str).unwrap_or_default();
        let call_id = item
            .get("call_id")
            .or_else(|| item.get("id"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let name = item.get("name").and_then(Value::as_str).unwrap_or_default().to_string();

        let partial_json = match item.get("type").and_then(Value::as_str) {
            Some("custom_tool_call") => match item.get("input") {
                Some(Value::String(text)) => Value::String(text.clone()).to_string(),
                Some(other) if !other.is_null() => other.to_string(),
                _ => "{}".to_string(),
            },
            _ => match item.get("arguments") {
                // A string from upstream is already partial json.
                Some(Value::String(arguments)) => arguments.clone(),
                Some(other) if !other.is_null() => other.to_string(),
                _ => self.argument_buffers.remove(item_id).unwrap_or_else(|| "{}".to_string()),
            },
        };

        self.close_thinking_block(out);
        self.close_text_block(out);

        let index = self.next_block_index;
        self.next_block_index += 1;
        self.saw_tool_use = true;

        self.emit(
            &StreamEvent::ContentBlockStart {
                index,
                content_block: json!({"type": "tool_use", "id": call_id, "name": name, "input": {}}),
            },
            out,
        );
        self.emit(
            &StreamEvent::ContentBlockDelta {
                index,
                delta: json!({"type": "input_json_delta", "partial_json": partial_json}),
            },
            out,
        );
        self.emit(&StreamEvent::ContentBlockStop { index }, out);
    }

    fn finish(&mut self, out: &mut Vec<Bytes>) {
        self.close_thinking_block(out);
        self.close_text_block(out);

        let stop_reason = if self.saw_tool_use { "tool_use" } else { "end_turn" };
        let usage = self.usage.unwrap_or_default();

        self.emit(
            &StreamEvent::MessageDelta {
                delta: json!({"stop_reason": stop_reason, "stop_sequence": null}),
                usage: json!({"input_tokens": usage.input_tokens, "output_tokens": usage.output_tokens}),
            },
            out,
        );
        self.emit(&StreamEvent::MessageStop, out);
        self.terminated = true;
    }
}

impl StreamTranslator for AnthropicTranslator {
    fn content_type(&self) -> &'static str {
        "text/event-stream"
    }

    fn on_event(&mut self, event: &SseEvent, out: &mut Vec<Bytes>) {
        if self.terminated {
            return;
        }
        self.saw_event = true;

        if let Some(id) = event
            .obj_field("response")
            .and_then(|r| r.get("id"))
            .and_then(Value::as_str)
        {
            self.message_id = id.to_string();
        }

        if let Some(usage) = event
            .obj_field("response")
            .and_then(|r| r.get("usage"))
            .and_then(TokenUsage::from_value)
        {
            self.usage = Some(usage);
        }

        self.ensure_started(out);

        match event.event_type.as_str() {
            events::OUTPUT_TEXT_DELTA => {
                if let Some(delta) = event.str_field("delta") {
                    let delta = delta.to_string();

                    if self.think_open {
                        self.think_open = false;
                        self.think_closed = true;
                        self.emit_text("</think>", out);
                    }

                    self.emit_text(&delta, out);
                }
            }
            events::REASONING_SUMMARY_TEXT_DELTA | events::REASONING_TEXT_DELTA => {
                if let Some(delta) = event.str_field("delta") {
                    let delta = delta.to_string();
                    self.emit_reasoning(&delta, out);
                }
            }
            events::FUNCTION_CALL_ARGUMENTS_DELTA => {
                if let (Some(item_id), Some(delta)) = (event.str_field("item_id"), event.str_field("delta")) {
                    self.argument_buffers.entry(item_id.to_string()).or_default().push_str(delta);
                }
            }
            events::OUTPUT_ITEM_DONE => {
                if let Some(item) = event.obj_field("item").cloned()
                    && matches!(
                        item.get("type").and_then(Value::as_str),
                        Some("function_call") | Some("custom_tool_call")
                    )
                {
                    self.handle_tool_call_done(&item, out);
                }
            }
            events::COMPLETED => self.finish(out),
            events::FAILED => {
                let message = event
                    .obj_field("response")
                    .and_then(|r| r.get("error"))
                    .or_else(|| event.obj_field("error"))
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("upstream reported a failure")
                    .to_string();

                self.emit(
                    &StreamEvent::Error {
                        error: json!({"type": "api_error", "message": message}),
                    },
                    out,
                );
                self.emit(&StreamEvent::MessageStop, out);
                self.terminated = true;
            }
            _ => {}
        }
    }

    fn on_end(&mut self, out: &mut Vec<Bytes>) {
        if self.terminated {
            return;
        }

        if !self.saw_event {
            self.emit(
                &StreamEvent::Error {
                    error: json!({"type": "api_error", "message": "upstream returned empty response"}),
                },
                out,
            );
            self.emit(&StreamEvent::MessageStop, out);
            self.terminated = true;
            return;
        }

        self.finish(out);
    }
}

/// Encode a collected response as a non-streaming Anthropic message.
pub fn encode(collected: &CollectedResponse, model: &str, compat: ReasoningCompat) -> Value {
    let mut content = Vec::new();

    let reasoning = if !collected.reasoning_summary.is_empty() {
        collected.reasoning_summary.as_str()
    } else {
        collected.reasoning_full.as_str()
    };

    match compat {
        ReasoningCompat::ThinkTags => {
            let text = if reasoning.is_empty() {
                collected.full_text.clone()
            } else {
                format!("<think>{reasoning}</think>{}", collected.full_text)
            };

            if !text.is_empty() {
                content.push(json!({"type": "text", "text": text}));
            }
        }
        ReasoningCompat::O3 | ReasoningCompat::Legacy => {
            if !reasoning.is_empty() {
                content.push(json!({"type": "thinking", "thinking": reasoning}));
            }
            if !collected.full_text.is_empty() {
                content.push(json!({"type": "text", "text": collected.full_text}));
            }
        }
    }

    for call in &collected.tool_calls {
        let input: Value = serde_json::from_str(&call.arguments)
            .unwrap_or_else(|_| Value::String(call.arguments.clone()));

        content.push(json!({
            "type": "tool_use",
            "id": call.call_id,
            "name": call.name,
            "input": input,
        }));
    }

    let stop_reason = if collected.tool_calls.is_empty() { "end_turn" } else { "tool_use" };
    let usage = collected.usage.unwrap_or_default();

    json!({
        "id": collected.response_id.clone().unwrap_or_else(|| format!("msg_{}", uuid::Uuid::new_v4().simple())),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {"input_tokens": usage.input_tokens, "output_tokens": usage.output_tokens},
    })
}

/// Encode a rough token count for `/v1/messages/count_tokens`. The
/// upstream offers no counting endpoint, so this is a chars/4 estimate
/// over the flattened message text.
pub fn encode_token_count(text_length: usize) -> Value {
    json!({"input_tokens": (text_length / 4).max(1)})
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, payload: Value) -> SseEvent {
        SseEvent::new(event_type, payload.to_string())
    }

    fn run(translator: &mut AnthropicTranslator, input: &[SseEvent]) -> Vec<(String, Value)> {
        let mut out = Vec::new();

        for e in input {
            translator.on_event(e, &mut out);
        }
        translator.on_end(&mut out);

        out.iter()
            .map(|frame| {
                let text = std::str::from_utf8(frame).unwrap();
                let mut lines = text.lines();
                let name = lines.next().unwrap().strip_prefix("event: ").unwrap().to_string();
                let data = lines.next().unwrap().strip_prefix("data: ").unwrap();
                (name, serde_json::from_str(data).unwrap())
            })
            .collect()
    }

    #[test]
    fn text_stream_follows_the_event_grammar() {
        let mut translator = AnthropicTranslator::new("gpt-5".to_string(), ReasoningCompat::O3);

        let frames = run(
            &mut translator,
            &[
                event("response.created", json!({"response": {"id": "r1"}})),
                event("response.output_text.delta", json!({"delta": "Hi"})),
                event(
                    "response.completed",
                    json!({"response": {"id": "r1", "usage": {"input_tokens": 2, "output_tokens": 1}}}),
                ),
            ],
        );

        let names: Vec<&str> = frames.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "ping",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        assert_eq!(frames[0].1["message"]["id"], json!("r1"));
        assert_eq!(frames[3].1["delta"], json!({"type": "text_delta", "text": "Hi"}));
        assert_eq!(frames[5].1["delta"]["stop_reason"], json!("end_turn"));
        assert_eq!(frames[5].1["usage"]["output_tokens"], json!(1));
    }

    #[test]
    fn tool_use_blocks_carry_partial_json() {
        let mut translator = AnthropicTranslator::new("gpt-5".to_string(), ReasoningCompat::O3);

        let frames = run(
            &mut translator,
            &[
                event("response.output_text.delta", json!({"delta": "checking"})),
                event(
                    "response.output_item.done",
                    json!({"item": {
                        "id": "i1",
                        "type": "function_call",
                        "call_id": "call_1",
                        "name": "get_weather",
                        "arguments": "{\"city\":\"Paris\"}",
                    }}),
                ),
                event("response.completed", json!({"response": {"id": "r1"}})),
            ],
        );

        let start = frames
            .iter()
            .find(|(name, data)| name == "content_block_start" && data["content_block"]["type"] == json!("tool_use"))
            .unwrap();
        assert_eq!(start.1["content_block"]["id"], json!("call_1"));
        assert_eq!(start.1["content_block"]["name"], json!("get_weather"));

        let delta = frames
            .iter()
            .find(|(name, data)| name == "content_block_delta" && data["delta"]["type"] == json!("input_json_delta"))
            .unwrap();
        assert_eq!(delta.1["delta"]["partial_json"], json!("{\"city\":\"Paris\"}"));

        let message_delta = frames.iter().find(|(name, _)| name == "message_delta").unwrap();
        assert_eq!(message_delta.1["delta"]["stop_reason"], json!("tool_use"));

        // The text block closed before the tool block opened.
        let stop_positions: Vec<usize> = frames
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| name == "content_block_stop")
            .map(|(i, _)| i)
            .collect();
        let tool_start_position = frames
            .iter()
            .position(|(name, data)| {
                name == "content_block_start" && data["content_block"]["type"] == json!("tool_use")
            })
            .unwrap();
        assert!(stop_positions.iter().any(|p| *p < tool_start_position));
    }

    #[test]
    fn think_tags_mode_injects_tags_into_text() {
        let mut translator = AnthropicTranslator::new("gpt-5".to_string(), ReasoningCompat::ThinkTags);

        let frames = run(
            &mut translator,
            &[
                event("response.reasoning_summary_text.delta", json!({"delta": "mull"})),
                event("response.output_text.delta", json!({"delta": "Hi"})),
                event("response.completed", json!({"response": {"id": "r1"}})),
            ],
        );

        let text: String = frames
            .iter()
            .filter(|(name, data)| name == "content_block_delta" && data["delta"]["type"] == json!("text_delta"))
            .map(|(_, data)| data["delta"]["text"].as_str().unwrap().to_string())
            .collect();

        assert_eq!(text, "<think>mull</think>Hi");
    }

    #[test]
    fn o3_mode_uses_thinking_blocks() {
        let mut translator = AnthropicTranslator::new("gpt-5".to_string(), ReasoningCompat::O3);

        let frames = run(
            &mut translator,
            &[
                event("response.reasoning_text.delta", json!({"delta": "mull"})),
                event("response.output_text.delta", json!({"delta": "Hi"})),
                event("response.completed", json!({"response": {"id": "r1"}})),
            ],
        );

        assert!(frames.iter().any(|(name, data)| {
            name == "content_block_start" && data["content_block"]["type"] == json!("thinking")
        }));
        assert!(frames.iter().any(|(name, data)| {
            name == "content_block_delta" && data["delta"] == json!({"type": "thinking_delta", "thinking": "mull"})
        }));
    }

    #[test]
    fn empty_stream_emits_error_then_stop() {
        let mut translator = AnthropicTranslator::new("gpt-5".to_string(), ReasoningCompat::O3);
        let mut out = Vec::new();

        translator.on_end(&mut out);

        let text = std::str::from_utf8(&out[0]).unwrap();
        assert!(text.starts_with("event: error\n"));
        assert!(text.contains("empty response"));
        assert!(std::str::from_utf8(&out[1]).unwrap().starts_with("event: message_stop\n"));
    }

    #[test]
    fn encode_builds_a_message_object() {
        let collected = CollectedResponse {
            response_id: Some("r1".to_string()),
            full_text: "21C".to_string(),
            usage: Some(TokenUsage {
                input_tokens: 4,
                output_tokens: 2,
                total_tokens: 6,
            }),
            ..Default::default()
        };

        let message = encode(&collected, "gpt-5", ReasoningCompat::O3);

        assert_eq!(message["type"], json!("message"));
        assert_eq!(message["content"][0], json!({"type": "text", "text": "21C"}));
        assert_eq!(message["stop_reason"], json!("end_turn"));
        assert_eq!(message["usage"]["input_tokens"], json!(4));
    }

    #[test]
    fn encode_parses_tool_arguments_into_input() {
        let collected = CollectedResponse {
            tool_calls: vec![crate::state::StoredToolCall {
                call_id: "call_1".to_string(),
                name: "get_weather".to_string(),
                arguments: r#"{"city":"Paris"}"#.to_string(),
                kind: crate::state::ToolCallKind::Function,
            }],
            ..Default::default()
        };

        let message = encode(&collected, "gpt-5", ReasoningCompat::O3);

        assert_eq!(message["content"][0]["type"], json!("tool_use"));
        assert_eq!(message["content"][0]["input"], json!({"city": "Paris"}));
        assert_eq!(message["stop_reason"], json!("tool_use"));
    }
}
