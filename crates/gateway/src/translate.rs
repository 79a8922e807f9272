//! Per-dialect stream translators and non-streaming encoders.
//!
//! A translator is a synchronous state machine: the pipeline feeds it one
//! upstream event at a time and writes whatever framed bytes it produces
//! straight to the client. Translators never buffer ahead of the client
//! and never look at an event twice; everything stateful (open `<think>`
//! tags, tool-call argument buffers, block indexes) lives in the machine.

pub mod anthropic;
pub mod chat;
pub mod ollama;
pub mod responses;
pub mod text;

use bytes::Bytes;
use serde_json::Value;

use crate::sse::SseEvent;

/// A dialect-native stream translator.
pub trait StreamTranslator: Send {
    /// The `Content-Type` of the translated stream.
    fn content_type(&self) -> &'static str;

    /// Feed one upstream event; translated bytes are appended to `out`.
    fn on_event(&mut self, event: &SseEvent, out: &mut Vec<Bytes>);

    /// The upstream stream ended. Translators that have not yet seen a
    /// terminal event emit their error chunk and end-of-stream marker
    /// here; an empty stream produces exactly those two frames.
    fn on_end(&mut self, out: &mut Vec<Bytes>);
}

/// Frame a JSON value as an SSE data line.
pub(crate) fn sse_data(value: &Value) -> Bytes {
    Bytes::from(format!("data: {value}\n\n"))
}

/// Frame a typed SSE event with both `event:` and `data:` lines.
pub(crate) fn sse_event(name: &str, data: &str) -> Bytes {
    Bytes::from(format!("event: {name}\ndata: {data}\n\n"))
}

/// The OpenAI end-of-stream marker.
pub(crate) fn sse_done() -> Bytes {
    Bytes::from_static(b"data: [DONE]\n\n")
}

/// Frame a JSON value as one NDJSON line.
pub(crate) fn ndjson_line(value: &Value) -> Bytes {
    Bytes::from(format!("{value}\n"))
}

/// Seconds since the Unix epoch, for `created` fields.
pub(crate) fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Merge the argument-bearing keys of a web-search call payload into one
/// arguments object.
pub(crate) fn merge_web_search_arguments(item: &Value) -> Value {
    const KEYS: [&str; 6] = ["parameters", "args", "arguments", "input", "query", "q"];

    let mut merged = serde_json::Map::new();

    for source in [Some(item), item.get("action")].into_iter().flatten() {
        for key in KEYS {
            let Some(value) = source.get(key) else { continue };

            match value {
                Value::Object(map) => {
                    for (k, v) in map {
                        merged.insert(k.clone(), v.clone());
                    }
                }
                Value::Null => {}
                other => {
                    merged.insert(key.to_string(), other.clone());
                }
            }
        }
    }

    Value::Object(merged)
}
