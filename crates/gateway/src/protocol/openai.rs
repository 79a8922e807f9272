//! OpenAI Chat Completions and Text Completions wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ReasoningOverride;

/// Lenient view of a Chat Completions request body. Also decodes the
/// Text Completions shape, which differs only in carrying `prompt`
/// instead of `messages`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatView {
    /// Requested model name.
    #[serde(default)]
    pub model: Option<String>,
    /// Chat-style conversation.
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
    /// Legacy completions prompt: a string or an array of strings.
    #[serde(default)]
    pub prompt: Option<Value>,
    /// Client-side streaming toggle.
    #[serde(default)]
    pub stream: Option<bool>,
    /// Streaming options, of which only `include_usage` matters here.
    #[serde(default)]
    pub stream_options: Option<StreamOptions>,
    /// Tools in chat or responses shape; unified by the normalizer.
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    /// Opaque tool choice.
    #[serde(default)]
    pub tool_choice: Option<Value>,
    /// Whether parallel tool calls are allowed.
    #[serde(default)]
    pub parallel_tool_calls: Option<bool>,
    /// Server-side storage request; always overridden to off.
    #[serde(default)]
    pub store: Option<bool>,
    /// Continuity linkage.
    #[serde(default)]
    pub previous_response_id: Option<String>,
    /// Free-form metadata, consulted for conversation ids.
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Reasoning override.
    #[serde(default)]
    pub reasoning: Option<ReasoningOverride>,
}

/// Streaming options subobject.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamOptions {
    /// Emit a trailing usage chunk.
    #[serde(default)]
    pub include_usage: Option<bool>,
}

/// One chat message on the request side.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    /// Author role as sent; unknown roles are demoted to `user`.
    pub role: String,
    /// Message body: a plain string, content parts, or absent.
    #[serde(default)]
    pub content: Option<ChatContent>,
    /// Assistant tool calls replayed as history.
    #[serde(default)]
    pub tool_calls: Option<Vec<ChatToolCall>>,
    /// Present on `tool` role messages.
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

/// Chat message content: OpenAI accepts both a bare string and an array
/// of typed parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChatContent {
    /// Bare text.
    Text(String),
    /// Typed parts.
    Parts(Vec<ChatContentPart>),
}

/// One typed content part on the request side.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatContentPart {
    /// Part type, e.g. `text` or `image_url`.
    pub r#type: String,
    /// Text payload for text parts.
    #[serde(default)]
    pub text: Option<String>,
    /// Image payload for image parts.
    #[serde(default)]
    pub image_url: Option<ImageUrl>,
}

/// Image reference: either `{url: …}` or a bare string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ImageUrl {
    /// Object form.
    Object {
        /// The URL or data URI.
        url: String,
    },
    /// Bare string form.
    Plain(String),
}

impl ImageUrl {
    /// The URL regardless of the form it arrived in.
    pub fn url(&self) -> &str {
        match self {
            ImageUrl::Object { url } | ImageUrl::Plain(url) => url,
        }
    }
}

/// An assistant tool call replayed in history.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatToolCall {
    /// The call id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Function payload.
    pub function: ChatFunction,
}

/// Function name and arguments within a replayed tool call.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatFunction {
    /// Function name.
    #[serde(default)]
    pub name: Option<String>,
    /// Arguments: a JSON string or a structured object.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// A streamed `chat.completion.chunk`.
#[derive(Debug, Serialize)]
pub struct ChatCompletionChunk {
    /// Response id, carried over from upstream when known.
    pub id: String,
    /// Always `chat.completion.chunk`.
    pub object: &'static str,
    /// Unix timestamp.
    pub created: u64,
    /// Model name echoed to the client.
    pub model: String,
    /// Chunk choices; empty on usage-only chunks.
    pub choices: Vec<ChunkChoice>,
    /// Trailing usage, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<OpenAiUsage>,
}

/// One choice within a streamed chunk.
#[derive(Debug, Serialize)]
pub struct ChunkChoice {
    /// Always 0; the gateway never fans out.
    pub index: u32,
    /// Incremental delta.
    pub delta: ChunkDelta,
    /// Set on the closing chunk of a turn.
    pub finish_reason: Option<&'static str>,
}

/// Incremental delta within a streamed chunk.
#[derive(Debug, Default, Serialize)]
pub struct ChunkDelta {
    /// `assistant`, on the first content-bearing chunk.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    /// Visible content delta.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Structured reasoning delta (o3 compat mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Value>,
    /// Reasoning summary delta (legacy compat mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_summary: Option<String>,
    /// Tool call deltas.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// One tool call within a delta.
#[derive(Debug, Serialize)]
pub struct ToolCallDelta {
    /// Stable index of this call within the turn.
    pub index: u32,
    /// Call id.
    pub id: String,
    /// Always `function`.
    pub r#type: &'static str,
    /// Function payload.
    pub function: FunctionDelta,
}

/// Function payload within a tool call delta.
#[derive(Debug, Serialize)]
pub struct FunctionDelta {
    /// Function name.
    pub name: String,
    /// Merged argument JSON as a string.
    pub arguments: String,
}

/// Usage in OpenAI field names.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OpenAiUsage {
    /// Input side.
    pub prompt_tokens: u64,
    /// Output side.
    pub completion_tokens: u64,
    /// Total, synthesized when upstream omitted it.
    pub total_tokens: u64,
}

/// A streamed `text_completion` chunk.
#[derive(Debug, Serialize)]
pub struct TextCompletionChunk {
    /// Response id.
    pub id: String,
    /// Always `text_completion`.
    pub object: &'static str,
    /// Unix timestamp.
    pub created: u64,
    /// Model name echoed to the client.
    pub model: String,
    /// Chunk choices; empty on usage-only chunks.
    pub choices: Vec<TextChoice>,
    /// Trailing usage, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<OpenAiUsage>,
}

/// One choice within a text completion chunk.
#[derive(Debug, Serialize)]
pub struct TextChoice {
    /// Always 0.
    pub index: u32,
    /// Text delta.
    pub text: String,
    /// Set on the closing chunk.
    pub finish_reason: Option<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_string_and_part_content() {
        let body = r#"{
            "model": "gpt-5",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "user", "content": [{"type": "text", "text": "there"}]}
            ]
        }"#;

        let view: ChatView = serde_json::from_str(body).unwrap();
        let messages = view.messages.unwrap();

        assert!(matches!(messages[0].content, Some(ChatContent::Text(ref t)) if t == "hi"));
        assert!(matches!(messages[1].content, Some(ChatContent::Parts(ref p)) if p.len() == 1));
    }

    #[test]
    fn tolerates_unknown_fields() {
        let body = r#"{"model": "gpt-5", "messages": [], "temperature": 0.5, "user": "abc"}"#;
        let view: ChatView = serde_json::from_str(body).unwrap();

        assert_eq!(view.model.as_deref(), Some("gpt-5"));
    }

    #[test]
    fn image_urls_accept_both_forms() {
        let object: ChatContentPart =
            serde_json::from_str(r#"{"type": "image_url", "image_url": {"url": "https://x/a.png"}}"#).unwrap();
        let plain: ChatContentPart =
            serde_json::from_str(r#"{"type": "image_url", "image_url": "https://x/b.png"}"#).unwrap();

        assert_eq!(object.image_url.unwrap().url(), "https://x/a.png");
        assert_eq!(plain.image_url.unwrap().url(), "https://x/b.png");
    }

    #[test]
    fn chunk_serialization_omits_empty_fields() {
        let chunk = ChatCompletionChunk {
            id: "r1".to_string(),
            object: "chat.completion.chunk",
            created: 1,
            model: "gpt-5".to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta: ChunkDelta {
                    content: Some("Hello".to_string()),
                    ..Default::default()
                },
                finish_reason: None,
            }],
            usage: None,
        };

        let json = serde_json::to_value(&chunk).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "id": "r1",
                "object": "chat.completion.chunk",
                "created": 1,
                "model": "gpt-5",
                "choices": [{"index": 0, "delta": {"content": "Hello"}, "finish_reason": null}],
            })
        );
    }
}
