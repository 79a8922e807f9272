//! Upstream SSE consumption.
//!
//! The upstream Responses API streams Server-Sent Events. This module turns
//! a raw byte stream into typed [`SseEvent`]s carrying the event type, the
//! raw data payload, and a decoded JSON view when the payload parses. The
//! raw payload is kept so translators that forward events opaquely never
//! depend on a successful decode.

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;

/// One upstream event.
#[derive(Debug, Clone)]
pub struct SseEvent {
    /// The `event:` field, or the payload `type` when the field is absent.
    pub event_type: String,
    /// Raw data payload, all `data:` lines joined.
    pub data: String,
    /// Decoded payload; `None` when the data is not valid JSON.
    pub json: Option<Value>,
}

impl SseEvent {
    /// Build an event from an SSE frame, deriving the type from the
    /// payload when the frame carried no `event:` field.
    pub fn new(event_field: &str, data: String) -> Self {
        let json: Option<Value> = serde_json::from_str(&data).ok();

        let event_type = if event_field.is_empty() || event_field == "message" {
            json.as_ref()
                .and_then(|v| v.get("type"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        } else {
            event_field.to_string()
        };

        Self { event_type, data, json }
    }

    /// A string field of the decoded payload.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.json.as_ref()?.get(key)?.as_str()
    }

    /// A subobject of the decoded payload.
    pub fn obj_field(&self, key: &str) -> Option<&Value> {
        self.json.as_ref()?.get(key)
    }
}

/// Error surfaced while reading the upstream stream. Terminal: the reader
/// never retries, that is the upstream adapter's concern.
#[derive(Debug, thiserror::Error)]
pub enum SseError {
    /// Transport failure mid-stream.
    #[error("upstream stream error: {0}")]
    Transport(String),
    /// Malformed SSE framing.
    #[error("upstream sent a malformed event stream: {0}")]
    Framing(String),
}

/// Stream of typed upstream events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, SseError>> + Send>>;

/// Wrap a reqwest byte stream into an [`EventStream`].
pub fn events_from_bytes<S, E>(bytes: S) -> EventStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let stream = bytes.eventsource().map(|item| match item {
        Ok(event) => Ok(SseEvent::new(&event.event, event.data)),
        Err(eventsource_stream::EventStreamError::Transport(e)) => Err(SseError::Transport(e.to_string())),
        Err(e) => Err(SseError::Framing(e.to_string())),
    });

    Box::pin(stream)
}

/// Parse a complete SSE document into events. Used for buffered re-parsing
/// and in tests.
pub fn parse_all(input: &str) -> Vec<SseEvent> {
    let mut events = Vec::new();
    let mut event_field = String::new();
    let mut data_lines: Vec<&str> = Vec::new();

    let mut flush = |event_field: &mut String, data_lines: &mut Vec<&str>, events: &mut Vec<SseEvent>| {
        if !data_lines.is_empty() {
            events.push(SseEvent::new(event_field, data_lines.join("\n")));
        }
        event_field.clear();
        data_lines.clear();
    };

    for line in input.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            flush(&mut event_field, &mut data_lines, &mut events);
        } else if let Some(value) = line.strip_prefix("event:") {
            event_field = value.trim_start().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
        // Unknown fields and comments are ignored.
    }

    flush(&mut event_field, &mut data_lines, &mut events);
    events
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn derives_type_from_payload_when_event_field_missing() {
        let event = SseEvent::new("", r#"{"type":"response.completed","response":{"id":"r1"}}"#.to_string());

        assert_eq!(event.event_type, "response.completed");
        assert_eq!(event.json.as_ref().unwrap()["response"]["id"], json!("r1"));
    }

    #[test]
    fn keeps_raw_data_when_payload_is_not_json() {
        let event = SseEvent::new("response.output_text.delta", "[DONE]".to_string());

        assert_eq!(event.event_type, "response.output_text.delta");
        assert_eq!(event.data, "[DONE]");
        assert!(event.json.is_none());
    }

    #[test]
    fn parse_all_splits_blocks_on_blank_lines() {
        let doc = "event: response.created\ndata: {\"type\":\"response.created\"}\n\ndata: {\"type\":\"response.completed\"}\n\n";
        let events = parse_all(doc);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "response.created");
        assert_eq!(events[1].event_type, "response.completed");
    }

    #[test]
    fn parse_all_tolerates_carriage_returns_and_joins_data_lines() {
        let doc = "event: x\r\ndata: {\"a\":\r\ndata: 1}\r\n\r\n";
        let events = parse_all(doc);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"a\":\n1}");
    }
}
