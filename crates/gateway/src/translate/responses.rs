//! OpenAI Responses stream translator and encoder.
//!
//! Near-passthrough: the upstream already speaks this dialect, so every
//! event is re-emitted verbatim with its `event:` line, and the gateway
//! only appends the `[DONE]` marker the OpenAI SDKs expect.

use bytes::Bytes;
use serde_json::{Value, json};

use crate::collect::CollectedResponse;
use crate::protocol::responses::events;
use crate::sse::SseEvent;

use super::{StreamTranslator, sse_done, sse_event, unix_timestamp};

/// Re-emits upstream events untouched.
pub struct ResponsesTranslator {
    terminated: bool,
    saw_event: bool,
}

impl Default for ResponsesTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponsesTranslator {
    /// A translator for one request.
    pub fn new() -> Self {
        Self {
            terminated: false,
            saw_event: false,
        }
    }
}

impl StreamTranslator for ResponsesTranslator {
    fn content_type(&self) -> &'static str {
        "text/event-stream"
    }

    fn on_event(&mut self, event: &SseEvent, out: &mut Vec<Bytes>) {
        if self.terminated {
            return;
        }
        self.saw_event = true;

        if event.event_type.is_empty() {
            out.push(Bytes::from(format!("data: {}\n\n", event.data)));
        } else {
            out.push(sse_event(&event.event_type, &event.data));
        }

        if matches!(event.event_type.as_str(), events::COMPLETED | events::FAILED) {
            out.push(sse_done());
            self.terminated = true;
        }
    }

    fn on_end(&mut self, out: &mut Vec<Bytes>) {
        if self.terminated {
            return;
        }

        if !self.saw_event {
            let failed = json!({
                "type": "response.failed",
                "response": {"error": {"message": "upstream returned empty response"}},
            });
            out.push(sse_event(events::FAILED, &failed.to_string()));
        }

        out.push(sse_done());
        self.terminated = true;
    }
}

/// Encode a collected response as a non-streaming `response` object. The
/// raw upstream response is preferred when the stream carried one.
pub fn encode(collected: &CollectedResponse, model: &str) -> Value {
    if let Some(raw) = &collected.raw_response {
        return raw.clone();
    }

    let mut output = collected.output_items.clone();

    if output.is_empty() && !collected.full_text.is_empty() {
        output.push(json!({
            "type": "message",
            "role": "assistant",
            "content": [{"type": "output_text", "text": collected.full_text}],
        }));
    }

    let mut response = json!({
        "id": collected.response_id.clone().unwrap_or_else(|| format!("resp_{}", uuid::Uuid::new_v4().simple())),
        "object": "response",
        "created_at": unix_timestamp(),
        "status": if collected.error_message.is_some() { "failed" } else { "completed" },
        "model": model,
        "output": output,
    });

    if let Some(usage) = collected.usage {
        response["usage"] = json!({
            "input_tokens": usage.input_tokens,
            "output_tokens": usage.output_tokens,
            "total_tokens": usage.total_tokens,
        });
    }

    if let Some(error) = &collected.error_message {
        response["error"] = json!({"message": error});
    }

    response
}
