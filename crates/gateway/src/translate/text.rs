//! OpenAI Text Completions stream translator and encoder.

use bytes::Bytes;
use serde_json::{Value, json};

use crate::collect::{CollectedResponse, TokenUsage};
use crate::protocol::openai::{OpenAiUsage, TextChoice, TextCompletionChunk};
use crate::protocol::responses::events;
use crate::sse::SseEvent;

use super::{StreamTranslator, sse_data, sse_done, unix_timestamp};

/// Streams `text_completion` chunks carrying bare text deltas.
pub struct TextTranslator {
    model: String,
    include_usage: bool,
    response_id: String,
    created: u64,
    usage: Option<TokenUsage>,
    terminated: bool,
    saw_event: bool,
}

impl TextTranslator {
    /// A translator for one request.
    pub fn new(model: String, include_usage: bool) -> Self {
        Self {
            model,
            include_usage,
            response_id: format!("cmpl-{}", uuid::Uuid::new_v4().simple()),
            created: unix_timestamp(),
            usage: None,
            terminated: false,
            saw_event: false,
        }
    }

    fn chunk(&self, text: String, finish_reason: Option<&'static str>) -> TextCompletionChunk {
        TextCompletionChunk {
            id: self.response_id.clone(),
            object: "text_completion",
            created: self.created,
            model: self.model.clone(),
            choices: vec![TextChoice {
                index: 0,
                text,
                finish_reason,
            }],
            usage: None,
        }
    }

    fn emit(&self, chunk: &TextCompletionChunk, out: &mut Vec<Bytes>) {
        match serde_json::to_value(chunk) {
            Ok(value) => out.push(sse_data(&value)),
            Err(e) => log::error!("Failed to serialize text completion chunk: {e}"),
        }
    }

    fn finish(&mut self, out: &mut Vec<Bytes>) {
        let chunk = self.chunk(String::new(), Some("stop"));
        self.emit(&chunk, out);

        if self.include_usage
            && let Some(usage) = self.usage
        {
            let chunk = TextCompletionChunk {
                id: self.response_id.clone(),
                object: "text_completion",
                created: self.created,
                model: self.model.clone(),
                choices: Vec::new(),
                usage: Some(OpenAiUsage {
                    prompt_tokens: usage.input_tokens,
                    completion_tokens: usage.output_tokens,
                    total_tokens: usage.total_tokens,
                }),
            };
            self.emit(&chunk, out);
        }

        out.push(sse_done());
        self.terminated = true;
    }
}

impl StreamTranslator for TextTranslator {
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
            events::OUTPUT_TEXT_DELTA => {
                if let Some(delta) = event.str_field("delta") {
                    let chunk = self.chunk(delta.to_string(), None);
                    self.emit(&chunk, out);
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
                    .unwrap_or("upstream reported a failure");

                out.push(sse_data(&json!({
                    "error": {"message": message, "type": "upstream_error"},
                })));
                out.push(sse_done());
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
            out.push(sse_data(&json!({
                "error": {"message": "upstream returned empty response", "type": "upstream_error"},
            })));
            out.push(sse_done());
            self.terminated = true;
            return;
        }

        self.finish(out);
    }
}

/// Encode a collected response as a non-streaming `text_completion`.
pub fn encode(collected: &CollectedResponse, model: &str) -> Value {
    let mut response = json!({
        "id": collected.response_id.clone().unwrap_or_else(|| format!("cmpl-{}", uuid::Uuid::new_v4().simple())),
        "object": "text_completion",
        "created": unix_timestamp(),
        "model": model,
        "choices": [{"index": 0, "text": collected.full_text, "finish_reason": "stop"}],
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

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, payload: Value) -> SseEvent {
        SseEvent::new(event_type, payload.to_string())
    }

    #[test]
    fn streams_text_deltas_then_stop() {
        let mut translator = TextTranslator::new("gpt-5".to_string(), false);
        let mut out = Vec::new();

        translator.on_event(
            &event("response.output_text.delta", json!({"delta": "comp"})),
            &mut out,
        );
        translator.on_event(
            &event("response.completed", json!({"response": {"id": "r1"}})),
            &mut out,
        );
        translator.on_end(&mut out);

        assert_eq!(out.len(), 3);

        let first: Value =
            serde_json::from_str(std::str::from_utf8(&out[0]).unwrap().strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(first["object"], json!("text_completion"));
        assert_eq!(first["choices"][0]["text"], json!("comp"));

        let second: Value =
            serde_json::from_str(std::str::from_utf8(&out[1]).unwrap().strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(second["choices"][0]["finish_reason"], json!("stop"));
    }

    #[test]
    fn empty_stream_emits_error_and_done() {
        let mut translator = TextTranslator::new("gpt-5".to_string(), false);
        let mut out = Vec::new();

        translator.on_end(&mut out);

        assert_eq!(out.len(), 2);
        assert!(std::str::from_utf8(&out[0]).unwrap().contains("empty response"));
        assert_eq!(std::str::from_utf8(&out[1]).unwrap(), "data: [DONE]\n\n");
    }
}
