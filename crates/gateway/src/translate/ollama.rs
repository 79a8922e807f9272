//! Ollama `/api/chat` stream translator and encoder.

use bytes::Bytes;
use jiff::{Zoned, tz::TimeZone};
use serde_json::{Value, json};

use config::ReasoningCompat;

use crate::collect::CollectedResponse;
use crate::protocol::ollama::{FakeEval, OllamaChunk, OllamaChunkMessage};
use crate::protocol::responses::events;
use crate::sse::SseEvent;

use super::{StreamTranslator, ndjson_line};

/// Streams NDJSON chat chunks.
pub struct OllamaTranslator {
    model: String,
    compat: ReasoningCompat,
    think_open: bool,
    think_closed: bool,
    terminated: bool,
    saw_event: bool,
}

impl OllamaTranslator {
    /// A translator for one request.
    pub fn new(model: String, compat: ReasoningCompat) -> Self {
        Self {
            model,
            compat,
            think_open: false,
            think_closed: false,
            terminated: false,
            saw_event: false,
        }
    }

    fn chunk(&self, content: String, thinking: Option<String>, done: bool) -> OllamaChunk {
        OllamaChunk {
            model: self.model.clone(),
            created_at: rfc3339_now(),
            message: OllamaChunkMessage {
                role: "assistant",
                content,
                thinking,
            },
            done,
            eval: done.then(FakeEval::default),
        }
    }

    fn emit(&self, chunk: &OllamaChunk, out: &mut Vec<Bytes>) {
        match serde_json::to_value(chunk) {
            Ok(value) => out.push(ndjson_line(&value)),
            Err(e) => log::error!("Failed to serialize Ollama chunk: {e}"),
        }
    }

    fn emit_content(&self, text: String, out: &mut Vec<Bytes>) {
        let chunk = self.chunk(text, None, false);
        self.emit(&chunk, out);
    }

    fn close_think_tag(&mut self, out: &mut Vec<Bytes>) {
        if self.think_open {
            self.think_open = false;
            self.think_closed = true;
            self.emit_content("</think>".to_string(), out);
        }
    }

    fn finish(&mut self, out: &mut Vec<Bytes>) {
        self.close_think_tag(out);

        let chunk = self.chunk(String::new(), None, true);
        self.emit(&chunk, out);
        self.terminated = true;
    }
}

impl StreamTranslator for OllamaTranslator {
    fn content_type(&self) -> &'static str {
        "application/x-ndjson"
    }

    fn on_event(&mut self, event: &SseEvent, out: &mut Vec<Bytes>) {
        if self.terminated {
            return;
        }
        self.saw_event = true;

        match event.event_type.as_str() {
            events::OUTPUT_TEXT_DELTA => {
                if let Some(delta) = event.str_field("delta") {
                    let delta = delta.to_string();
                    self.close_think_tag(out);
                    self.emit_content(delta, out);
                }
            }
            events::REASONING_SUMMARY_TEXT_DELTA | events::REASONING_TEXT_DELTA => {
                if let Some(delta) = event.str_field("delta") {
                    let delta = delta.to_string();

                    match self.compat {
                        ReasoningCompat::ThinkTags => {
                            if self.think_closed {
                                return;
                            }

                            let mut text = String::new();
                            if !self.think_open {
                                self.think_open = true;
                                text.push_str("<think>");
                            }
                            text.push_str(&delta);
                            self.emit_content(text, out);
                        }
                        // Native thinking channel for the other modes.
                        ReasoningCompat::O3 | ReasoningCompat::Legacy => {
                            let chunk = self.chunk(String::new(), Some(delta), false);
                            self.emit(&chunk, out);
                        }
                    }
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

                out.push(ndjson_line(&json!({"error": message})));

                let chunk = self.chunk(String::new(), None, true);
                self.emit(&chunk, out);
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
            out.push(ndjson_line(&json!({"error": "upstream returned empty response"})));

            let chunk = self.chunk(String::new(), None, true);
            self.emit(&chunk, out);
            self.terminated = true;
            return;
        }

        self.finish(out);
    }
}

/// Encode a collected response as the single non-streaming `/api/chat`
/// reply object.
pub fn encode(collected: &CollectedResponse, model: &str, compat: ReasoningCompat) -> Value {
    let reasoning = if !collected.reasoning_summary.is_empty() {
        collected.reasoning_summary.as_str()
    } else {
        collected.reasoning_full.as_str()
    };

    let (content, thinking) = match compat {
        ReasoningCompat::ThinkTags if !reasoning.is_empty() => {
            (format!("<think>{reasoning}</think>{}", collected.full_text), None)
        }
        ReasoningCompat::ThinkTags => (collected.full_text.clone(), None),
        _ => (
            collected.full_text.clone(),
            (!reasoning.is_empty()).then(|| reasoning.to_string()),
        ),
    };

    let mut message = json!({"role": "assistant", "content": content});

    if let Some(thinking) = thinking {
        message["thinking"] = json!(thinking);
    }

    let mut response = json!({
        "model": model,
        "created_at": rfc3339_now(),
        "message": message,
        "done": true,
    });

    if let Value::Object(eval) = serde_json::to_value(FakeEval::default()).unwrap_or_default()
        && let Some(object) = response.as_object_mut()
    {
        object.extend(eval);
    }

    response
}

fn rfc3339_now() -> String {
    Zoned::now()
        .with_time_zone(TimeZone::UTC)
        .strftime("%Y-%m-%dT%H:%M:%S%.9fZ")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, payload: Value) -> SseEvent {
        SseEvent::new(event_type, payload.to_string())
    }

    fn run(translator: &mut OllamaTranslator, input: &[SseEvent]) -> Vec<Value> {
        let mut out = Vec::new();

        for e in input {
            translator.on_event(e, &mut out);
        }
        translator.on_end(&mut out);

        out.iter()
            .map(|line| serde_json::from_slice(line).unwrap())
            .collect()
    }

    #[test]
    fn think_tags_precede_output_text() {
        let mut translator = OllamaTranslator::new("gpt-5".to_string(), ReasoningCompat::ThinkTags);

        let lines = run(
            &mut translator,
            &[
                event("response.reasoning_summary_text.delta", json!({"delta": "mull"})),
                event("response.output_text.delta", json!({"delta": "Hi"})),
                event("response.completed", json!({"response": {"id": "r1"}})),
            ],
        );

        let content: String = lines
            .iter()
            .filter_map(|line| line["message"]["content"].as_str())
            .collect();

        assert_eq!(content, "<think>mull</think>Hi");
        assert_eq!(lines.last().unwrap()["done"], json!(true));
        assert!(lines.last().unwrap().get("total_duration").is_some());
    }

    #[test]
    fn o3_mode_routes_reasoning_to_thinking() {
        let mut translator = OllamaTranslator::new("gpt-5".to_string(), ReasoningCompat::O3);

        let lines = run(
            &mut translator,
            &[
                event("response.reasoning_text.delta", json!({"delta": "mull"})),
                event("response.output_text.delta", json!({"delta": "Hi"})),
                event("response.completed", json!({"response": {"id": "r1"}})),
            ],
        );

        assert_eq!(lines[0]["message"]["thinking"], json!("mull"));
        assert_eq!(lines[0]["message"]["content"], json!(""));
        assert_eq!(lines[1]["message"]["content"], json!("Hi"));
    }

    #[test]
    fn interim_lines_are_not_done() {
        let mut translator = OllamaTranslator::new("gpt-5".to_string(), ReasoningCompat::ThinkTags);

        let lines = run(
            &mut translator,
            &[
                event("response.output_text.delta", json!({"delta": "Hi"})),
                event("response.completed", json!({"response": {"id": "r1"}})),
            ],
        );

        assert_eq!(lines[0]["done"], json!(false));
        assert!(lines[0].get("total_duration").is_none());
    }

    #[test]
    fn empty_stream_emits_error_line_then_done() {
        let mut translator = OllamaTranslator::new("gpt-5".to_string(), ReasoningCompat::ThinkTags);
        let lines = run(&mut translator, &[]);

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["error"], json!("upstream returned empty response"));
        assert_eq!(lines[1]["done"], json!(true));
    }

    #[test]
    fn encode_produces_one_done_object() {
        let collected = CollectedResponse {
            full_text: "Hello".to_string(),
            ..Default::default()
        };

        let encoded = encode(&collected, "gpt-5", ReasoningCompat::ThinkTags);

        assert_eq!(encoded["done"], json!(true));
        assert_eq!(encoded["message"]["content"], json!("Hello"));
        assert!(encoded.get("eval_count").is_some());
    }
}
