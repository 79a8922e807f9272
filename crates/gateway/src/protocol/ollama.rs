//! Ollama wire types: NDJSON chat chunks and the catalog stubs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lenient view of an `/api/chat` request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OllamaChatView {
    /// Requested model name.
    #[serde(default)]
    pub model: Option<String>,
    /// Conversation messages.
    #[serde(default)]
    pub messages: Vec<OllamaMessage>,
    /// Streaming toggle; Ollama clients default to streaming.
    #[serde(default)]
    pub stream: Option<bool>,
    /// Reasoning toggle.
    #[serde(default)]
    pub think: Option<bool>,
    /// Tools; same shapes as the OpenAI dialect.
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
}

/// One chat message.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaMessage {
    /// Author role.
    pub role: String,
    /// Plain text content.
    #[serde(default)]
    pub content: String,
    /// Base64 images attached to the message.
    #[serde(default)]
    pub images: Option<Vec<String>>,
}

/// One NDJSON chunk on the `/api/chat` response.
#[derive(Debug, Serialize)]
pub struct OllamaChunk {
    /// Model name echoed to the client.
    pub model: String,
    /// RFC 3339 timestamp.
    pub created_at: String,
    /// Message fragment.
    pub message: OllamaChunkMessage,
    /// True only on the final chunk.
    pub done: bool,
    /// Synthetic timing fields, present on the final chunk.
    #[serde(flatten)]
    pub eval: Option<FakeEval>,
}

/// Message fragment within a chunk.
#[derive(Debug, Default, Serialize)]
pub struct OllamaChunkMessage {
    /// Always `assistant`.
    pub role: &'static str,
    /// Visible content delta.
    pub content: String,
    /// Reasoning delta, in compat modes that keep it out of `content`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
}

/// Constant timing values stamped on the final chunk. The gateway does no
/// local evaluation, so real timings do not exist.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FakeEval {
    /// Total wall time, nanoseconds.
    pub total_duration: u64,
    /// Model load time, nanoseconds.
    pub load_duration: u64,
    /// Prompt token count.
    pub prompt_eval_count: u64,
    /// Prompt evaluation time, nanoseconds.
    pub prompt_eval_duration: u64,
    /// Output token count.
    pub eval_count: u64,
    /// Output evaluation time, nanoseconds.
    pub eval_duration: u64,
}

impl Default for FakeEval {
    fn default() -> Self {
        Self {
            total_duration: 1_000_000_000,
            load_duration: 100_000_000,
            prompt_eval_count: 1,
            prompt_eval_duration: 100_000_000,
            eval_count: 1,
            eval_duration: 800_000_000,
        }
    }
}
