//! Anthropic Messages wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lenient view of a Messages request body.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesView {
    /// Requested model name.
    #[serde(default)]
    pub model: Option<String>,
    /// Conversation messages.
    #[serde(default)]
    pub messages: Vec<AnthropicMessage>,
    /// System prompt: a bare string or an array of text blocks.
    #[serde(default)]
    pub system: Option<Value>,
    /// Tools in Anthropic shape.
    #[serde(default)]
    pub tools: Option<Vec<AnthropicTool>>,
    /// Opaque tool choice.
    #[serde(default)]
    pub tool_choice: Option<Value>,
    /// Client-side streaming toggle.
    #[serde(default)]
    pub stream: Option<bool>,
    /// Free-form metadata, consulted for conversation ids.
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl MessagesView {
    /// Flatten the system prompt to text, whichever shape it arrived in.
    pub fn system_text(&self) -> Option<String> {
        match self.system.as_ref()? {
            Value::String(text) => Some(text.clone()),
            Value::Array(blocks) => {
                let joined = blocks
                    .iter()
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n");

                (!joined.is_empty()).then_some(joined)
            }
            _ => None,
        }
    }
}

/// One conversation message.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicMessage {
    /// `user` or `assistant`.
    pub role: String,
    /// A bare string or an array of content blocks.
    pub content: Value,
}

/// A tool definition in Anthropic shape.
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicTool {
    /// Tool name.
    pub name: String,
    /// Human description.
    #[serde(default)]
    pub description: Option<String>,
    /// JSON schema of the input.
    #[serde(default)]
    pub input_schema: Option<Value>,
}

/// Server-sent events emitted on the Anthropic streaming surface.
///
/// Each serialized value maps to a concrete SSE `event:` name. Streams
/// begin with `message_start`, carry one or more content block lifecycles
/// (`content_block_start` → `content_block_delta*` → `content_block_stop`),
/// then a `message_delta` with the stop reason and usage, and finish with
/// `message_stop`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Announces the streamed message.
    MessageStart {
        /// Skeleton message with an empty content array.
        message: Value,
    },
    /// Heartbeat sent right after `message_start`.
    Ping,
    /// A content block opens.
    ContentBlockStart {
        /// Block index within the message.
        index: u32,
        /// The opening block shape.
        content_block: Value,
    },
    /// Incremental update for the indexed block.
    ContentBlockDelta {
        /// Block index within the message.
        index: u32,
        /// `text_delta`, `thinking_delta`, or `input_json_delta`.
        delta: Value,
    },
    /// The indexed block is complete.
    ContentBlockStop {
        /// Block index within the message.
        index: u32,
    },
    /// Top-level updates: stop reason and cumulative usage.
    MessageDelta {
        /// `stop_reason` / `stop_sequence` changes.
        delta: Value,
        /// Cumulative usage counters.
        usage: Value,
    },
    /// Terminal event.
    MessageStop,
    /// Recoverable error surfaced without tearing the stream down.
    Error {
        /// Error payload in Anthropic shape.
        error: Value,
    },
}

impl StreamEvent {
    /// The SSE `event:` name for this event.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::Ping => "ping",
            StreamEvent::ContentBlockStart { .. } => "content_block_start",
            StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            StreamEvent::ContentBlockStop { .. } => "content_block_stop",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn system_text_flattens_blocks() {
        let view: MessagesView = serde_json::from_str(
            r#"{"system": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}], "messages": []}"#,
        )
        .unwrap();

        assert_eq!(view.system_text().as_deref(), Some("a\nb"));
    }

    #[test]
    fn stream_events_serialize_with_type_tags() {
        let event = StreamEvent::ContentBlockDelta {
            index: 0,
            delta: json!({"type": "text_delta", "text": "hi"}),
        };

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": "hi"},
            })
        );
        assert_eq!(event.event_name(), "content_block_delta");
    }
}
