//! OpenAI Responses wire types: the upstream's native dialect.

use serde::Deserialize;
use serde_json::Value;

use super::ReasoningOverride;
use crate::protocol::openai::StreamOptions;

/// Lenient view of a Responses request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesView {
    /// Requested model name.
    #[serde(default)]
    pub model: Option<String>,
    /// Input: a bare string or an array of input items.
    #[serde(default)]
    pub input: Option<Value>,
    /// Top-level instructions.
    #[serde(default)]
    pub instructions: Option<String>,
    /// Tools in responses shape.
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    /// Opaque tool choice.
    #[serde(default)]
    pub tool_choice: Option<Value>,
    /// Whether parallel tool calls are allowed.
    #[serde(default)]
    pub parallel_tool_calls: Option<bool>,
    /// Client-side streaming toggle.
    #[serde(default)]
    pub stream: Option<bool>,
    /// Streaming options.
    #[serde(default)]
    pub stream_options: Option<StreamOptions>,
    /// Server-side storage request; always overridden to off.
    #[serde(default)]
    pub store: Option<bool>,
    /// Continuity linkage.
    #[serde(default)]
    pub previous_response_id: Option<String>,
    /// Conversation reference: a bare id string or `{id: …}`.
    #[serde(default)]
    pub conversation: Option<Value>,
    /// Free-form metadata, consulted for conversation ids.
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Reasoning override.
    #[serde(default)]
    pub reasoning: Option<ReasoningOverride>,
    /// Opt-in output fields.
    #[serde(default)]
    pub include: Option<Vec<String>>,
}

impl ResponsesView {
    /// The conversation id, from either accepted shape.
    pub fn conversation_id(&self) -> Option<&str> {
        match self.conversation.as_ref()? {
            Value::String(id) => Some(id),
            Value::Object(map) => map.get("id").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Event type names of interest on the upstream stream.
pub mod events {
    /// Stream opened; carries the response id.
    pub const CREATED: &str = "response.created";
    /// A new output item.
    pub const OUTPUT_ITEM_ADDED: &str = "response.output_item.added";
    /// An output item finished.
    pub const OUTPUT_ITEM_DONE: &str = "response.output_item.done";
    /// Visible text delta.
    pub const OUTPUT_TEXT_DELTA: &str = "response.output_text.delta";
    /// Visible text complete.
    pub const OUTPUT_TEXT_DONE: &str = "response.output_text.done";
    /// A new reasoning summary paragraph begins.
    pub const REASONING_SUMMARY_PART_ADDED: &str = "response.reasoning_summary_part.added";
    /// Reasoning summary delta.
    pub const REASONING_SUMMARY_TEXT_DELTA: &str = "response.reasoning_summary_text.delta";
    /// Full reasoning delta.
    pub const REASONING_TEXT_DELTA: &str = "response.reasoning_text.delta";
    /// Function-call argument delta.
    pub const FUNCTION_CALL_ARGUMENTS_DELTA: &str = "response.function_call_arguments.delta";
    /// Function-call arguments complete.
    pub const FUNCTION_CALL_ARGUMENTS_DONE: &str = "response.function_call_arguments.done";
    /// Terminal failure.
    pub const FAILED: &str = "response.failed";
    /// Terminal success.
    pub const COMPLETED: &str = "response.completed";
    /// Prefix of upstream web-search lifecycle events.
    pub const WEB_SEARCH_PREFIX: &str = "response.web_search_call";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_accepts_both_shapes() {
        let bare: ResponsesView = serde_json::from_str(r#"{"conversation": "conv_1"}"#).unwrap();
        let object: ResponsesView = serde_json::from_str(r#"{"conversation": {"id": "conv_2"}}"#).unwrap();

        assert_eq!(bare.conversation_id(), Some("conv_1"));
        assert_eq!(object.conversation_id(), Some("conv_2"));
    }

    #[test]
    fn input_stays_opaque_at_this_layer() {
        let view: ResponsesView = serde_json::from_str(r#"{"input": "hi"}"#).unwrap();
        assert!(view.input.as_ref().unwrap().is_string());

        let view: ResponsesView = serde_json::from_str(r#"{"input": [{"type": "message"}]}"#).unwrap();
        assert!(view.input.as_ref().unwrap().is_array());
    }
}
