//! Dialect-agnostic request representation.
//!
//! Every client dialect is normalized into a [`CanonicalRequest`] before it
//! reaches the upstream adapter, and every stored conversation turn is kept
//! as a sequence of [`InputItem`]s so a later turn can replay it verbatim.
//! The serde representations here match the upstream Responses wire format:
//! serializing a stored context produces exactly the `input` array the
//! upstream expects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use config::{ReasoningEffort, ReasoningSummary};

/// The normalized form of one client request, the sole input to the
/// upstream adapter.
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    /// Model name exactly as the client sent it.
    pub requested_model: String,
    /// Model after alias resolution and effort-suffix stripping.
    pub model: String,
    /// Whether the client asked for a streamed reply.
    pub stream: bool,
    /// Whether the client opted into a trailing usage chunk.
    pub include_usage: bool,
    /// Ordered conversation input, including any restored history.
    pub input_items: Vec<InputItem>,
    /// Effective instructions text.
    pub instructions: Option<String>,
    /// Tools offered to the model, after unification and injection.
    pub tools: Vec<ToolDef>,
    /// Tools before web-search injection, kept for the tools-rejection retry.
    pub base_tools: Vec<ToolDef>,
    /// Opaque tool choice; forwarded as-is.
    pub tool_choice: Option<Value>,
    /// Whether parallel tool calls are allowed.
    pub parallel_tool_calls: bool,
    /// Opt-in output fields forwarded to upstream.
    pub include: Vec<String>,
    /// Store flag sent upstream. Never `Some(true)`: the upstream rejects
    /// stored responses, so this is either an explicit `false` or unset.
    pub store_for_upstream: Option<bool>,
    /// Whether the client asked for `store: true` and was overridden.
    pub store_forced: bool,
    /// Previous turn linkage, explicit or substituted from the
    /// conversation index.
    pub previous_response_id: Option<String>,
    /// Conversation id extracted from metadata, if any.
    pub conversation_id: Option<String>,
    /// True when `previous_response_id` was inferred from the
    /// conversation index rather than sent by the client.
    pub auto_previous_response_id: bool,
    /// Effective reasoning effort, clamped to the model family.
    pub reasoning_effort: ReasoningEffort,
    /// Effective reasoning summary verbosity.
    pub reasoning_summary: ReasoningSummary,
    /// Which shape the reply should take.
    pub response_format: ResponseFormat,
    /// Which request field supplied the input.
    pub input_source: InputSource,
    /// True when the chat route fell back to a Responses-shaped `input`.
    pub used_input_fallback: bool,
}

/// Shape of the reply sent back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    /// OpenAI Chat Completions shaped reply.
    #[default]
    Chat,
    /// OpenAI Responses shaped reply.
    Responses,
}

/// The request field that supplied the conversation input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputSource {
    /// Chat-style `messages` array.
    #[default]
    Messages,
    /// Responses-style `input` array or string.
    Input,
    /// Legacy `prompt` field.
    Prompt,
}

/// One element of the conversation input, in upstream wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    /// A user, assistant, or system message.
    Message {
        /// Who authored the message.
        role: Role,
        /// Ordered content parts.
        content: Vec<ContentPart>,
    },
    /// A tool invocation produced by the model.
    FunctionCall {
        /// Correlates the call with its output.
        call_id: String,
        /// Tool name.
        name: String,
        /// Raw argument JSON, kept as the string the model produced.
        arguments: String,
    },
    /// The client-supplied result of a tool invocation.
    FunctionCallOutput {
        /// The call this output answers.
        call_id: String,
        /// Tool output, opaque to the gateway.
        output: String,
    },
    /// A custom (freeform) tool invocation.
    CustomToolCall {
        /// Correlates the call with its output.
        call_id: String,
        /// Tool name.
        name: String,
        /// Opaque text or structured input.
        input: Value,
    },
}

impl InputItem {
    /// A plain single-part message.
    pub fn message(role: Role, text: impl Into<String>) -> Self {
        let part = match role {
            Role::Assistant => ContentPart::OutputText { text: text.into() },
            _ => ContentPart::InputText { text: text.into() },
        };

        InputItem::Message {
            role,
            content: vec![part],
        }
    }

    /// The call id when this item is any flavor of tool call.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            InputItem::FunctionCall { call_id, .. }
            | InputItem::FunctionCallOutput { call_id, .. }
            | InputItem::CustomToolCall { call_id, .. } => Some(call_id),
            InputItem::Message { .. } => None,
        }
    }

    /// Whether this item is a message with the given role.
    pub fn has_role(&self, wanted: Role) -> bool {
        matches!(self, InputItem::Message { role, .. } if *role == wanted)
    }
}

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End-user input.
    User,
    /// Model output replayed as history.
    Assistant,
    /// Instructions-bearing message; extracted or demoted during
    /// normalization.
    System,
}

/// One part of a message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text sent to the model.
    InputText {
        /// The text.
        text: String,
    },
    /// Text produced by the model.
    OutputText {
        /// The text.
        text: String,
    },
    /// An image reference sent to the model.
    InputImage {
        /// URL or data URI.
        image_url: String,
    },
}

impl ContentPart {
    /// The text content, when this part carries any.
    pub fn text(&self) -> Option<&str> {
        match self {
            ContentPart::InputText { text } | ContentPart::OutputText { text } => Some(text),
            ContentPart::InputImage { .. } => None,
        }
    }
}

/// A tool offered to the model, in upstream wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolDef {
    /// A JSON-schema function tool.
    Function {
        /// Tool name; required for function tools.
        name: String,
        /// Optional human description.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        /// JSON schema of the arguments.
        parameters: Value,
        /// Strict schema adherence.
        strict: bool,
    },
    /// A freeform tool taking opaque input.
    Custom {
        /// Tool name.
        name: String,
        /// Optional human description.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Upstream-hosted web search.
    WebSearch,
    /// The preview alias of upstream-hosted web search.
    WebSearchPreview,
}

/// Default schema for function tools that arrive without parameters.
pub fn empty_parameters() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}
