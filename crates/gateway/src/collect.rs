//! Folding an upstream event stream into a collected response.
//!
//! Non-streaming clients get their reply encoded from a [`CollectedResponse`];
//! streaming requests run the same collector over the retained events after
//! the translator finishes, so the stored state always matches what the
//! client saw.

use serde_json::Value;

use crate::canonical::{ContentPart, InputItem, Role};
use crate::protocol::responses::events;
use crate::sse::SseEvent;
use crate::state::{StoredToolCall, ToolCallKind};

/// Token usage in upstream field names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Input-side tokens.
    pub input_tokens: u64,
    /// Output-side tokens.
    pub output_tokens: u64,
    /// Total; synthesized as input + output when upstream omits it.
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Parse a usage subobject, accepting both upstream and OpenAI field
    /// names.
    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;

        let read = |keys: [&str; 2]| {
            keys.iter()
                .find_map(|key| object.get(*key))
                .and_then(Value::as_u64)
        };

        let input_tokens = read(["input_tokens", "prompt_tokens"]).unwrap_or(0);
        let output_tokens = read(["output_tokens", "completion_tokens"]).unwrap_or(0);
        let total_tokens = object
            .get("total_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(input_tokens + output_tokens);

        Some(Self {
            input_tokens,
            output_tokens,
            total_tokens,
        })
    }
}

/// The folded result of one upstream stream.
#[derive(Debug, Default)]
pub struct CollectedResponse {
    /// Upstream response id.
    pub response_id: Option<String>,
    /// Concatenated visible output.
    pub full_text: String,
    /// Concatenated reasoning summary.
    pub reasoning_summary: String,
    /// Concatenated full reasoning.
    pub reasoning_full: String,
    /// Tool calls the turn produced.
    pub tool_calls: Vec<StoredToolCall>,
    /// Raw output items in upstream shape.
    pub output_items: Vec<Value>,
    /// Usage, when upstream reported any.
    pub usage: Option<TokenUsage>,
    /// Failure message from a `response.failed` event.
    pub error_message: Option<String>,
    /// The final `response` object from `response.completed`.
    pub raw_response: Option<Value>,
}

impl CollectedResponse {
    /// Whether the turn produced anything worth storing.
    pub fn has_output(&self) -> bool {
        !self.output_items.is_empty() || !self.full_text.is_empty()
    }
}

/// Streaming fold over upstream events.
pub struct Collector {
    collected: CollectedResponse,
    collect_reasoning: bool,
    stop_on_failure: bool,
    done: bool,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector {
    /// A collector that gathers reasoning and stops on failure.
    pub fn new() -> Self {
        Self {
            collected: CollectedResponse::default(),
            collect_reasoning: true,
            stop_on_failure: true,
            done: false,
        }
    }

    /// Keep consuming after `response.failed`, for telemetry paths.
    pub fn continue_on_failure(mut self) -> Self {
        self.stop_on_failure = false;
        self
    }

    /// Skip the reasoning buffers.
    pub fn without_reasoning(mut self) -> Self {
        self.collect_reasoning = false;
        self
    }

    /// Whether a terminal event was seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Fold one event. Returns `true` when collection should stop.
    pub fn feed(&mut self, event: &SseEvent) -> bool {
        if self.done {
            return true;
        }

        match event.event_type.as_str() {
            events::CREATED => {
                self.capture_response_meta(event);
            }
            events::OUTPUT_TEXT_DELTA => {
                if let Some(delta) = event.str_field("delta") {
                    self.collected.full_text.push_str(delta);
                }
            }
            events::REASONING_SUMMARY_TEXT_DELTA => {
                if self.collect_reasoning
                    && let Some(delta) = event.str_field("delta")
                {
                    self.collected.reasoning_summary.push_str(delta);
                }
            }
            events::REASONING_TEXT_DELTA => {
                if self.collect_reasoning
                    && let Some(delta) = event.str_field("delta")
                {
                    self.collected.reasoning_full.push_str(delta);
                }
            }
            events::OUTPUT_ITEM_DONE => {
                if let Some(item) = event.obj_field("item") {
                    self.collected.output_items.push(item.clone());

                    if let Some(call) = stored_tool_call(item) {
                        self.collected.tool_calls.push(call);
                    }
                }
            }
            events::FAILED => {
                self.capture_response_meta(event);
                self.collected.error_message = Some(failure_message(event));

                if self.stop_on_failure {
                    self.done = true;
                }
            }
            events::COMPLETED => {
                self.capture_response_meta(event);

                if let Some(response) = event.obj_field("response") {
                    self.collected.raw_response = Some(response.clone());
                }

                self.done = true;
            }
            _ => {}
        }

        // Usage can ride on any event that carries a response snapshot;
        // later observations win.
        if let Some(usage) = event
            .obj_field("response")
            .and_then(|r| r.get("usage"))
            .or_else(|| event.obj_field("usage"))
            .and_then(TokenUsage::from_value)
        {
            self.collected.usage = Some(usage);
        }

        self.done
    }

    /// Consume the collector.
    pub fn finish(self) -> CollectedResponse {
        self.collected
    }

    fn capture_response_meta(&mut self, event: &SseEvent) {
        let id = event
            .obj_field("response")
            .and_then(|r| r.get("id"))
            .and_then(Value::as_str)
            .or_else(|| event.str_field("id"));

        if let Some(id) = id {
            self.collected.response_id = Some(id.to_string());
        }
    }
}

fn failure_message(event: &SseEvent) -> String {
    event
        .obj_field("response")
        .and_then(|r| r.get("error"))
        .or_else(|| event.obj_field("error"))
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("upstream reported a failure")
        .to_string()
}

/// A stored tool call when the output item is one.
fn stored_tool_call(item: &Value) -> Option<StoredToolCall> {
    let kind = match item.get("type").and_then(Value::as_str)? {
        "function_call" => ToolCallKind::Function,
        "custom_tool_call" => ToolCallKind::Custom,
        _ => return None,
    };

    let call_id = item
        .get("call_id")
        .or_else(|| item.get("id"))
        .and_then(Value::as_str)?
        .to_string();

    let name = item.get("name").and_then(Value::as_str).unwrap_or_default().to_string();

    let arguments = match kind {
        ToolCallKind::Function => opaque_to_string(item.get("arguments")),
        ToolCallKind::Custom => opaque_to_string(item.get("input")),
    };

    Some(StoredToolCall {
        call_id,
        name,
        arguments,
        kind,
    })
}

/// Render an opaque argument value the way the model produced it: strings
/// verbatim, anything structured as compact JSON.
pub fn opaque_to_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

/// Convert the turn's output items back into input-item form for storage.
/// Commentary-phase messages and non-replayable items are dropped.
pub fn output_items_to_input(output_items: &[Value]) -> Vec<InputItem> {
    let mut items = Vec::new();

    for item in output_items {
        let Some(item_type) = item.get("type").and_then(Value::as_str) else {
            continue;
        };

        match item_type {
            "message" => {
                if item.get("phase").and_then(Value::as_str) == Some("commentary") {
                    continue;
                }

                let role = match item.get("role").and_then(Value::as_str) {
                    Some("user") => Role::User,
                    Some("system") => Role::System,
                    _ => Role::Assistant,
                };

                let content: Vec<ContentPart> = item
                    .get("content")
                    .and_then(Value::as_array)
                    .map(|parts| {
                        parts
                            .iter()
                            .filter_map(|part| {
                                let text = part.get("text").and_then(Value::as_str)?;
                                Some(match part.get("type").and_then(Value::as_str) {
                                    Some("input_text") => ContentPart::InputText {
                                        text: text.to_string(),
                                    },
                                    _ => ContentPart::OutputText {
                                        text: text.to_string(),
                                    },
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                if !content.is_empty() {
                    items.push(InputItem::Message { role, content });
                }
            }
            "function_call" => {
                if let Some(call) = stored_tool_call(item) {
                    items.push(InputItem::FunctionCall {
                        call_id: call.call_id,
                        name: call.name,
                        arguments: call.arguments,
                    });
                }
            }
            "custom_tool_call" => {
                if let Some(call) = stored_tool_call(item) {
                    items.push(InputItem::CustomToolCall {
                        call_id: call.call_id,
                        name: call.name,
                        input: item.get("input").cloned().unwrap_or(Value::String(call.arguments)),
                    });
                }
            }
            // Reasoning and web-search items are not replayable input.
            _ => {}
        }
    }

    items
}
