//! OpenAI Chat Completions stream translator and encoder.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use serde_json::{Value, json};

use config::ReasoningCompat;

use crate::collect::{CollectedResponse, TokenUsage, opaque_to_string};
use crate::protocol::openai::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, FunctionDelta, OpenAiUsage, ToolCallDelta,
};
use crate::protocol::responses::events;
use crate::sse::SseEvent;

use super::{StreamTranslator, merge_web_search_arguments, sse_data, sse_done, unix_timestamp};

/// Streams `chat.completion.chunk` objects.
pub struct ChatTranslator {
    model: String,
    compat: ReasoningCompat,
    include_usage: bool,
    response_id: String,
    created: u64,
    sent_role: bool,
    think_open: bool,
    think_closed: bool,
    paragraph_pending: bool,
    emitted_reasoning: bool,
    hidden_items: HashSet<String>,
    tool_indexes: HashMap<String, u32>,
    next_tool_index: u32,
    next_web_search_index: u32,
    argument_buffers: HashMap<String, String>,
    usage: Option<TokenUsage>,
    stop_sent: bool,
    terminated: bool,
    saw_event: bool,
}

impl ChatTranslator {
    /// A translator for one request.
    pub fn new(model: String, compat: ReasoningCompat, include_usage: bool) -> Self {
        Self {
            model,
            compat,
            include_usage,
            response_id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
            created: unix_timestamp(),
            sent_role: false,
            think_open: false,
            think_closed: false,
            paragraph_pending: false,
            emitted_reasoning: false,
            hidden_items: HashSet::new(),
            tool_indexes: HashMap::new(),
            next_tool_index: 0,
            next_web_search_index: 0,
            argument_buffers: HashMap::new(),
            usage: None,
            stop_sent: false,
            terminated: false,
            saw_event: false,
        }
    }

    fn chunk(&self, delta: ChunkDelta, finish_reason: Option<&'static str>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.response_id.clone(),
            object: "chat.completion.chunk",
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }

    fn emit(&mut self, chunk: &ChatCompletionChunk, out: &mut Vec<Bytes>) {
        match serde_json::to_value(chunk) {
            Ok(value) => out.push(sse_data(&value)),
            Err(e) => log::error!("Failed to serialize chat chunk: {e}"),
        }
    }

    fn emit_content(&mut self, text: String, out: &mut Vec<Bytes>) {
        let chunk = self.chunk(
            ChunkDelta {
                role: (!self.sent_role).then_some("assistant"),
                content: Some(text),
                ..Default::default()
            },
            None,
        );

        self.sent_role = true;
        self.emit(&chunk, out);
    }

    fn close_think_tag(&mut self, out: &mut Vec<Bytes>) {
        if self.think_open {
            self.think_open = false;
            self.think_closed = true;
            self.emit_content("</think>".to_string(), out);
        }
    }

    fn emit_reasoning(&mut self, delta: &str, is_summary: bool, out: &mut Vec<Bytes>) {
        let separator = if self.paragraph_pending && self.emitted_reasoning {
            self.paragraph_pending = false;
            "\n\n"
        } else {
            self.paragraph_pending = false;
            ""
        };

        match self.compat {
            ReasoningCompat::ThinkTags => {
                if self.think_closed {
                    // Reasoning after visible output has begun is dropped;
                    // the tag pair is emitted once per turn.
                    return;
                }

                let mut text = String::new();

                if !self.think_open {
                    self.think_open = true;
                    text.push_str("<think>");
                }

                text.push_str(separator);
                text.push_str(delta);
                self.emit_content(text, out);
            }
            ReasoningCompat::O3 => {
                let chunk = self.chunk(
                    ChunkDelta {
                        reasoning: Some(json!({
                            "content": [{"type": "text", "text": format!("{separator}{delta}")}],
                        })),
                        ..Default::default()
                    },
                    None,
                );
                self.emit(&chunk, out);
            }
            ReasoningCompat::Legacy => {
                let text = format!("{separator}{delta}");
                let delta = if is_summary {
                    ChunkDelta {
                        reasoning_summary: Some(text),
                        ..Default::default()
                    }
                } else {
                    ChunkDelta {
                        reasoning: Some(Value::String(text)),
                        ..Default::default()
                    }
                };

                let chunk = self.chunk(delta, None);
                self.emit(&chunk, out);
            }
        }

        self.emitted_reasoning = true;
    }

    fn handle_item_added(&mut self, item: &Value) {
        let item_id = item.get("id").and_then(Value::as_str).unwrap_or_default().to_string();

        match item.get("type").and_then(Value::as_str) {
            Some("message") => {
                if item.get("phase").and_then(Value::as_str) == Some("commentary") {
                    self.hidden_items.insert(item_id);
                }
            }
            Some("function_call") | Some("custom_tool_call") => {
                self.tool_indexes.insert(item_id.clone(), self.next_tool_index);
                self.next_tool_index += 1;
                self.argument_buffers.insert(item_id, String::new());
            }
            Some("web_search_call") => {
                self.tool_indexes.insert(item_id, self.next_web_search_index);
                self.next_web_search_index += 1;
            }
            _ => {}
        }
    }

    fn handle_item_done(&mut self, item: &Value, out: &mut Vec<Bytes>) {
        let item_id = item.get("id").and_then(Value::as_str).unwrap_or_default();

        let (call_id, name, arguments) = match item.get("type").and_then(Value::as_str) {
            Some("function_call") => {
                let arguments = match item.get("arguments") {
                    Some(value) if !value.is_null() => opaque_to_string(Some(value)),
                    _ => self.argument_buffers.remove(item_id).unwrap_or_default(),
                };

                (
                    call_id_of(item),
                    item.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                    arguments,
                )
            }
            Some("custom_tool_call") => (
                call_id_of(item),
                item.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                opaque_to_string(item.get("input")),
            ),
            Some("web_search_call") => (
                item_id.to_string(),
                "web_search".to_string(),
                merge_web_search_arguments(item).to_string(),
            ),
            _ => return,
        };

        self.close_think_tag(out);

        let index = match self.tool_indexes.get(item_id) {
            Some(index) => *index,
            None => {
                let index = self.next_tool_index;
                self.next_tool_index += 1;
                self.tool_indexes.insert(item_id.to_string(), index);
                index
            }
        };

        let chunk = self.chunk(
            ChunkDelta {
                role: (!self.sent_role).then_some("assistant"),
                tool_calls: Some(vec![ToolCallDelta {
                    index,
                    id: call_id,
                    r#type: "function",
                    function: FunctionDelta { name, arguments },
                }]),
                ..Default::default()
            },
            None,
        );
        self.sent_role = true;
        self.emit(&chunk, out);

        let finish = self.chunk(ChunkDelta::default(), Some("tool_calls"));
        self.emit(&finish, out);
        self.stop_sent = true;
    }

    fn emit_usage(&mut self, out: &mut Vec<Bytes>) {
        if !self.include_usage {
            return;
        }

        let Some(usage) = self.usage else { return };

        let chunk = ChatCompletionChunk {
            id: self.response_id.clone(),
            object: "chat.completion.chunk",
            created: self.created,
            model: self.model.clone(),
            choices: Vec::new(),
            usage: Some(openai_usage(usage)),
        };
        self.emit(&chunk, out);
    }

    fn emit_error(&mut self, message: &str, out: &mut Vec<Bytes>) {
        out.push(sse_data(&json!({
            "error": {"message": message, "type": "upstream_error"},
        })));
    }

    fn terminate(&mut self, out: &mut Vec<Bytes>) {
        out.push(sse_done());
        self.terminated = true;
    }
}

impl StreamTranslator for ChatTranslator {
    fn content_type(&self) -> &'static str {
        "text/event-stream"
    }

    fn on_event(&mut self, event: &SseEvent, out: &mut Vec<Bytes>) {
        if self.terminated {
            return;
        }
        self.saw_event = true;

        // Adopt the upstream response id as the chunk id once known.
        if let Some(id) = event.obj_field("response").and_then(|r| r.get("id")).and_then(Value::as_str) {
            self.response_id = id.to_string();
        }

        if let Some(usage) = event
            .obj_field("response")
            .and_then(|r| r.get("usage"))
            .and_then(TokenUsage::from_value)
        {
            self.usage = Some(usage);
        }

        match event.event_type.as_str() {
            events::OUTPUT_ITEM_ADDED => {
                if let Some(item) = event.obj_field("item") {
                    self.handle_item_added(item);
                }
            }
            events::OUTPUT_TEXT_DELTA => {
                let item_id = event.str_field("item_id").unwrap_or_default();
                if self.hidden_items.contains(item_id) {
                    return;
                }

                if let Some(delta) = event.str_field("delta") {
                    self.close_think_tag(out);
                    self.emit_content(delta.to_string(), out);
                }
            }
            events::REASONING_SUMMARY_PART_ADDED => {
                self.paragraph_pending = true;
            }
            events::REASONING_SUMMARY_TEXT_DELTA => {
                if let Some(delta) = event.str_field("delta") {
                    let delta = delta.to_string();
                    self.emit_reasoning(&delta, true, out);
                }
            }
            events::REASONING_TEXT_DELTA => {
                if let Some(delta) = event.str_field("delta") {
                    let delta = delta.to_string();
                    self.emit_reasoning(&delta, false, out);
                }
            }
            events::FUNCTION_CALL_ARGUMENTS_DELTA => {
                if let (Some(item_id), Some(delta)) = (event.str_field("item_id"), event.str_field("delta")) {
                    self.argument_buffers.entry(item_id.to_string()).or_default().push_str(delta);
                }
            }
            events::OUTPUT_ITEM_DONE => {
                if let Some(item) = event.obj_field("item").cloned() {
                    self.handle_item_done(&item, out);
                }
            }
            events::COMPLETED => {
                self.close_think_tag(out);

                if !self.stop_sent {
                    let finish = self.chunk(ChunkDelta::default(), Some("stop"));
                    self.emit(&finish, out);
                    self.stop_sent = true;
                }

                self.emit_usage(out);
                self.terminate(out);
            }
            events::FAILED => {
                let message = event
                    .obj_field("response")
                    .and_then(|r| r.get("error"))
                    .or_else(|| event.obj_field("error"))
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("upstream reported a failure")
                    .to_string();

                self.emit_error(&message, out);
                self.terminate(out);
            }
            _ => {}
        }
    }

    fn on_end(&mut self, out: &mut Vec<Bytes>) {
        if self.terminated {
            return;
        }

        if !self.saw_event {
            self.emit_error("upstream returned empty response", out);
            self.terminate(out);
            return;
        }

        // Truncated stream: close out what we can.
        self.close_think_tag(out);

        if !self.stop_sent {
            let finish = self.chunk(ChunkDelta::default(), Some("stop"));
            self.emit(&finish, out);
            self.stop_sent = true;
        }

        self.terminate(out);
    }
}

fn call_id_of(item: &Value) -> String {
    item.get("call_id")
        .or_else(|| item.get("id"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn openai_usage(usage: TokenUsage) -> OpenAiUsage {
    OpenAiUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.total_tokens,
    }
}

/// Encode a collected response as a non-streaming `chat.completion`.
pub fn encode(collected: &CollectedResponse, model: &str, compat: ReasoningCompat) -> Value {
    let mut message = json!({"role": "assistant"});

    let content = match compat {
        ReasoningCompat::ThinkTags => {
            let reasoning = pick_reasoning(collected);

            if reasoning.is_empty() {
                collected.full_text.clone()
            } else {
                format!("<think>{reasoning}</think>{}", collected.full_text)
            }
        }
        _ => collected.full_text.clone(),
    };

    message["content"] = json!(content);

    match compat {
        ReasoningCompat::O3 => {
            let reasoning = pick_reasoning(collected);
            if !reasoning.is_empty() {
                message["reasoning"] = json!({"content": [{"type": "text", "text": reasoning}]});
            }
        }
        ReasoningCompat::Legacy => {
            if !collected.reasoning_summary.is_empty() {
                message["reasoning_summary"] = json!(collected.reasoning_summary);
            }
            if !collected.reasoning_full.is_empty() {
                message["reasoning"] = json!(collected.reasoning_full);
            }
        }
        ReasoningCompat::ThinkTags => {}
    }

    let tool_calls: Vec<Value> = collected
        .tool_calls
        .iter()
        .map(|call| {
            json!({
                "id": call.call_id,
                "type": "function",
                "function": {"name": call.name, "arguments": call.arguments},
            })
        })
        .collect();

    if !tool_calls.is_empty() {
        message["tool_calls"] = json!(tool_calls);
    }

    let finish_reason = if tool_calls.is_empty() { "stop" } else { "tool_calls" };

    let mut response = json!({
        "id": collected.response_id.clone().unwrap_or_else(|| format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())),
        "object": "chat.completion",
        "created": unix_timestamp(),
        "model": model,
        "choices": [{"index": 0, "message": message, "finish_reason": finish_reason}],
    });

    if let Some(usage) = collected.usage {
        response["usage"] = json!({
            "prompt_tokens": usage.input_tokens,
            "completion_tokens": usage.output_tokens,
            "total_tokens": usage.total_tokens,
        });
    }

    response
}

fn pick_reasoning(collected: &CollectedResponse) -> &str {
    if !collected.reasoning_summary.is_empty() {
        &collected.reasoning_summary
    } else {
        &collected.reasoning_full
    }
}
