//! Request decoding and normalization.
//!
//! Five dialects come in, one [`CanonicalRequest`] goes out. The decoder
//! is deliberately forgiving (SDKs ship malformed payloads; fields from
//! the "wrong" dialect appear on every route), while the normalization
//! rules themselves are strict and ordered: model resolution, input-source
//! selection, conversation linkage, history restoration, tool assembly,
//! store and reasoning normalization, instructions composition.

pub(crate) mod input;
mod tools;

use serde_json::Value;

use config::{GatewayConfig, ReasoningEffort, ReasoningSummary};

use crate::canonical::{CanonicalRequest, ContentPart, InputItem, InputSource, ResponseFormat, Role, ToolDef};
use crate::collect::opaque_to_string;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{self, ModelRegistry};
use crate::polyfill;
use crate::protocol::ReasoningOverride;
use crate::protocol::anthropic::MessagesView;
use crate::protocol::ollama::OllamaChatView;
use crate::protocol::openai::ChatView;
use crate::protocol::responses::ResponsesView;
use crate::state::StateStore;

use self::input::{ParsedInput, SystemHandling};

/// Which URL family the request came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteHint {
    /// `/v1/chat/completions`, `/v1/completions`, and the non-OpenAI
    /// dialects.
    Chat,
    /// `/v1/responses`.
    Responses,
}

/// The normalization pipeline, borrowing the shared collaborators.
pub struct Normalizer<'a> {
    /// Gateway settings: defaults, reasoning, web search injection.
    pub config: &'a GatewayConfig,
    /// Model catalog for alias resolution and rejection.
    pub registry: &'a ModelRegistry,
    /// Conversation state for linkage and history restoration.
    pub store: &'a StateStore,
}

/// Everything a dialect entry point extracts before the shared
/// finalization steps run.
#[derive(Debug, Default)]
struct Draft {
    model: Option<String>,
    parsed: ParsedInput,
    client_instructions: Option<String>,
    tools: Vec<ToolDef>,
    tool_choice: Option<Value>,
    parallel_tool_calls: bool,
    stream: bool,
    include_usage: bool,
    store: Option<bool>,
    previous_response_id: Option<String>,
    conversation_id: Option<String>,
    reasoning_override: Option<ReasoningOverride>,
    effort_suffix: Option<ReasoningEffort>,
    summary_override: Option<ReasoningSummary>,
    include: Vec<String>,
    response_format: ResponseFormat,
    input_source: InputSource,
    used_input_fallback: bool,
    requested_model: String,
}

impl Normalizer<'_> {
    /// Normalize an OpenAI-dialect body (chat, responses, or completions).
    pub fn from_bytes(&self, route: RouteHint, bytes: &[u8]) -> GatewayResult<CanonicalRequest> {
        let raw = lenient_parse(bytes)?;

        let chat_view: Option<ChatView> = serde_json::from_value(raw.clone()).ok();
        let responses_view: Option<ResponsesView> = serde_json::from_value(raw.clone()).ok();

        let messages_present = raw.get("messages").is_some();
        let input_present = raw.get("input").is_some();
        let prompt_present = raw.get("prompt").is_some();

        let messages_candidate = chat_view
            .as_ref()
            .and_then(|view| view.messages.as_ref())
            .map(|messages| {
                let handling = match route {
                    RouteHint::Chat => SystemHandling::PromoteFirst,
                    RouteHint::Responses => SystemHandling::Extract,
                };
                input::from_messages(messages, handling)
            });

        let input_candidate = responses_view
            .as_ref()
            .and_then(|view| view.input.as_ref())
            .map(input::from_input_value);

        let prompt_candidate = chat_view
            .as_ref()
            .and_then(|view| view.prompt.as_ref())
            .and_then(input::from_prompt);

        let selection = select_source(
            route,
            messages_candidate,
            input_candidate,
            prompt_candidate,
            SourcePresence {
                messages: messages_present,
                input: input_present,
                prompt: prompt_present,
            },
        )?;

        let chat_view = chat_view.unwrap_or_default();
        let responses_view = responses_view.unwrap_or_default();

        let response_format = match selection.source {
            InputSource::Input => ResponseFormat::Responses,
            _ => match route {
                RouteHint::Responses => ResponseFormat::Responses,
                RouteHint::Chat => ResponseFormat::Chat,
            },
        };

        let metadata = responses_view.metadata.as_ref().or(chat_view.metadata.as_ref());
        let conversation_id = responses_view
            .conversation_id()
            .map(str::to_string)
            .or_else(|| conversation_id_from(metadata, &raw));

        let raw_tools = responses_view
            .tools
            .as_deref()
            .or(chat_view.tools.as_deref())
            .unwrap_or_default();

        let include_usage = [&chat_view.stream_options, &responses_view.stream_options]
            .into_iter()
            .flatten()
            .any(|options| options.include_usage.unwrap_or(false));

        let draft = Draft {
            model: responses_view.model.clone().or(chat_view.model.clone()),
            parsed: selection.parsed,
            client_instructions: responses_view.instructions.clone(),
            tools: tools::unify(raw_tools),
            tool_choice: responses_view.tool_choice.clone().or(chat_view.tool_choice.clone()),
            parallel_tool_calls: responses_view
                .parallel_tool_calls
                .or(chat_view.parallel_tool_calls)
                .unwrap_or(true),
            stream: responses_view.stream.or(chat_view.stream).unwrap_or(false),
            include_usage,
            store: responses_view.store.or(chat_view.store),
            previous_response_id: responses_view
                .previous_response_id
                .clone()
                .or(chat_view.previous_response_id.clone())
                .filter(|id| !id.is_empty()),
            conversation_id,
            reasoning_override: responses_view.reasoning.clone().or(chat_view.reasoning.clone()),
            effort_suffix: None,
            summary_override: None,
            include: responses_view.include.clone().unwrap_or_default(),
            response_format,
            input_source: selection.source,
            used_input_fallback: selection.used_input_fallback,
            requested_model: String::new(),
        };

        self.finalize(draft, route)
    }

    /// Normalize an Anthropic Messages body.
    pub fn from_anthropic(&self, bytes: &[u8]) -> GatewayResult<CanonicalRequest> {
        let raw = lenient_parse(bytes)?;

        let view: MessagesView = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::InvalidRequest(format!("Request is not a valid messages payload: {e}")))?;

        let items = anthropic_items(&view)?;

        if items.is_empty() && view.system_text().is_none() {
            return Err(GatewayError::InvalidRequest(
                "Request must include at least one message".to_string(),
            ));
        }

        let draft = Draft {
            model: view.model.clone(),
            parsed: ParsedInput {
                items,
                extracted_instructions: view.system_text(),
            },
            tools: view
                .tools
                .as_deref()
                .map(tools::from_anthropic)
                .unwrap_or_default(),
            tool_choice: view.tool_choice.clone(),
            parallel_tool_calls: true,
            stream: view.stream.unwrap_or(false),
            conversation_id: conversation_id_from(view.metadata.as_ref(), &raw),
            input_source: InputSource::Messages,
            response_format: ResponseFormat::Chat,
            ..Draft::default()
        };

        self.finalize(draft, RouteHint::Chat)
    }

    /// Normalize an Ollama `/api/chat` body.
    pub fn from_ollama(&self, bytes: &[u8]) -> GatewayResult<CanonicalRequest> {
        let raw = lenient_parse(bytes)?;

        let view: OllamaChatView = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::InvalidRequest(format!("Request is not a valid chat payload: {e}")))?;

        let mut items = Vec::new();
        let mut instructions: Vec<String> = Vec::new();

        for message in &view.messages {
            match message.role.as_str() {
                "system" if !message.content.is_empty() => instructions.push(message.content.clone()),
                "assistant" => {
                    if !message.content.is_empty() {
                        items.push(InputItem::message(Role::Assistant, message.content.clone()));
                    }
                }
                _ => {
                    let mut content = Vec::new();

                    if !message.content.is_empty() {
                        content.push(ContentPart::InputText {
                            text: message.content.clone(),
                        });
                    }

                    for image in message.images.iter().flatten() {
                        content.push(ContentPart::InputImage {
                            image_url: format!("data:image/png;base64,{image}"),
                        });
                    }

                    if !content.is_empty() {
                        items.push(InputItem::Message {
                            role: Role::User,
                            content,
                        });
                    }
                }
            }
        }

        if items.is_empty() && instructions.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "Request must include at least one message".to_string(),
            ));
        }

        let draft = Draft {
            model: view.model.clone(),
            parsed: ParsedInput {
                items,
                extracted_instructions: if instructions.is_empty() {
                    None
                } else {
                    Some(instructions.join("\n\n"))
                },
            },
            tools: view.tools.as_deref().map(tools::unify).unwrap_or_default(),
            parallel_tool_calls: true,
            // Ollama clients stream unless they opted out.
            stream: view.stream.unwrap_or(true),
            summary_override: match view.think {
                Some(false) => Some(ReasoningSummary::None),
                Some(true) => Some(ReasoningSummary::Auto),
                None => None,
            },
            input_source: InputSource::Messages,
            response_format: ResponseFormat::Chat,
            ..Draft::default()
        };

        self.finalize(draft, RouteHint::Chat)
    }

    fn finalize(&self, mut draft: Draft, route: RouteHint) -> GatewayResult<CanonicalRequest> {
        // Model resolution: alias table, then effort suffix.
        let requested_model = draft
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.config.default_model.clone());

        let normalized = models::normalize_name(&requested_model);
        draft.effort_suffix = normalized.effort_override;

        if !self.registry.is_known(&normalized.slug) {
            return Err(GatewayError::UnknownModel {
                requested: normalized.slug,
                available: self.registry.visible_models().into_iter().map(|m| m.slug).collect(),
            });
        }

        let model = normalized.slug;
        draft.requested_model = requested_model;

        // Conversation linkage: substitute the recorded latest response
        // when the client sent none.
        let mut auto_previous = false;
        let mut previous_response_id = draft.previous_response_id.clone();

        if previous_response_id.is_none()
            && let Some(conversation_id) = &draft.conversation_id
            && let Some(latest) = self.store.get_conversation_latest(conversation_id)
        {
            previous_response_id = Some(latest);
            auto_previous = true;
        }

        // History restoration and the tool-call polyfill.
        let prepend_context = route == RouteHint::Responses;
        let mut items = draft.parsed.items;

        match polyfill::restore(items.clone(), previous_response_id.as_deref(), prepend_context, self.store) {
            Ok(restored) => items = restored,
            Err(error) => {
                if auto_previous {
                    // The linkage was inferred, not requested: drop it and
                    // continue without history.
                    log::debug!("Dropping inferred previous_response_id: {error}");
                    previous_response_id = None;
                    auto_previous = false;
                } else {
                    return Err(error);
                }
            }
        }

        // Tool assembly: inject default web search only into an empty set.
        let base_tools = draft.tools.clone();
        let mut tools = draft.tools;

        if tools.is_empty()
            && self.config.default_web_search
            && !tools::choice_is_none(draft.tool_choice.as_ref())
        {
            tools.push(ToolDef::WebSearch);
        }

        // Store normalization: the upstream rejects `store: true`.
        let store_forced = draft.store == Some(true);

        // Reasoning normalization.
        let override_effort = draft
            .reasoning_override
            .as_ref()
            .and_then(|r| r.effort.as_deref())
            .and_then(ReasoningEffort::parse);

        let effort = models::clamp_effort(
            &model,
            override_effort
                .or(draft.effort_suffix)
                .unwrap_or(self.config.reasoning_effort),
        );

        let override_summary = draft
            .reasoning_override
            .as_ref()
            .and_then(|r| r.summary.as_deref())
            .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok());

        let summary = override_summary
            .or(draft.summary_override)
            .unwrap_or(self.config.reasoning_summary);

        // Instructions composition.
        let joined = join_instructions(
            draft.client_instructions.as_deref(),
            draft.parsed.extracted_instructions.as_deref(),
        );

        let instructions = match joined {
            Some(text) => Some(text),
            None => match route {
                RouteHint::Responses => previous_response_id
                    .as_deref()
                    .and_then(|id| self.store.get_instructions(id)),
                RouteHint::Chat => self.config.default_instructions(&model).map(str::to_string),
            },
        };

        Ok(CanonicalRequest {
            requested_model: draft.requested_model,
            model,
            stream: draft.stream,
            include_usage: draft.include_usage,
            input_items: items,
            instructions,
            tools,
            base_tools,
            tool_choice: draft.tool_choice,
            parallel_tool_calls: draft.parallel_tool_calls,
            include: draft.include,
            store_for_upstream: Some(false),
            store_forced,
            previous_response_id,
            conversation_id: draft.conversation_id,
            auto_previous_response_id: auto_previous,
            reasoning_effort: effort,
            reasoning_summary: summary,
            response_format: draft.response_format,
            input_source: draft.input_source,
            used_input_fallback: draft.used_input_fallback,
        })
    }
}

struct SourcePresence {
    messages: bool,
    input: bool,
    prompt: bool,
}

struct SelectedSource {
    parsed: ParsedInput,
    source: InputSource,
    used_input_fallback: bool,
}

/// The selection rule: prefer `input` on the responses route and
/// `messages` on the chat route; fall back to the alternate, then to a
/// synthetic prompt message.
fn select_source(
    route: RouteHint,
    messages: Option<ParsedInput>,
    input: Option<ParsedInput>,
    prompt: Option<ParsedInput>,
    presence: SourcePresence,
) -> GatewayResult<SelectedSource> {
    let usable = |candidate: &Option<ParsedInput>| candidate.as_ref().is_some_and(ParsedInput::is_usable);

    let (preferred, preferred_source, alternate, alternate_source) = match route {
        RouteHint::Responses => (input, InputSource::Input, messages, InputSource::Messages),
        RouteHint::Chat => (messages, InputSource::Messages, input, InputSource::Input),
    };

    if usable(&preferred) {
        return Ok(SelectedSource {
            parsed: preferred.unwrap_or_default(),
            source: preferred_source,
            used_input_fallback: false,
        });
    }

    if usable(&alternate) {
        return Ok(SelectedSource {
            parsed: alternate.unwrap_or_default(),
            source: alternate_source,
            used_input_fallback: route == RouteHint::Chat && alternate_source == InputSource::Input,
        });
    }

    if let Some(prompt) = prompt.filter(ParsedInput::is_usable) {
        return Ok(SelectedSource {
            parsed: prompt,
            source: InputSource::Prompt,
            used_input_fallback: false,
        });
    }

    if !presence.messages && !presence.input && !presence.prompt {
        return Err(GatewayError::InvalidRequest(
            "Request must include messages, input, or prompt".to_string(),
        ));
    }

    Err(GatewayError::InvalidRequest(match route {
        RouteHint::Chat => "Request must include valid messages or input".to_string(),
        RouteHint::Responses => "Request must include valid input or messages".to_string(),
    }))
}

/// Convert Anthropic messages to input items.
fn anthropic_items(view: &MessagesView) -> GatewayResult<Vec<InputItem>> {
    let mut items = Vec::new();

    for message in &view.messages {
        let role = match message.role.as_str() {
            "assistant" => Role::Assistant,
            _ => Role::User,
        };

        match &message.content {
            Value::String(text) => {
                if !text.is_empty() {
                    items.push(InputItem::message(role, text.clone()));
                }
            }
            Value::Array(blocks) => {
                let mut parts = Vec::new();

                for block in blocks {
                    match block.get("type").and_then(Value::as_str) {
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(Value::as_str) {
                                parts.push(match role {
                                    Role::Assistant => ContentPart::OutputText {
                                        text: text.to_string(),
                                    },
                                    _ => ContentPart::InputText {
                                        text: text.to_string(),
                                    },
                                });
                            }
                        }
                        Some("image") => {
                            if let Some(url) = anthropic_image_url(block) {
                                parts.push(ContentPart::InputImage { image_url: url });
                            }
                        }
                        Some("tool_use") => {
                            flush_parts(&mut items, role, &mut parts);
                            items.push(InputItem::FunctionCall {
                                call_id: block.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
                                name: block.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                                arguments: opaque_to_string(block.get("input")),
                            });
                        }
                        Some("tool_result") => {
                            flush_parts(&mut items, role, &mut parts);
                            items.push(InputItem::FunctionCallOutput {
                                call_id: block
                                    .get("tool_use_id")
                                    .and_then(Value::as_str)
                                    .unwrap_or_default()
                                    .to_string(),
                                output: anthropic_tool_result_text(block),
                            });
                        }
                        // Thinking and unknown blocks are not replayable.
                        _ => {}
                    }
                }

                flush_parts(&mut items, role, &mut parts);
            }
            _ => {
                return Err(GatewayError::InvalidRequest(
                    "Message content must be a string or an array of blocks".to_string(),
                ));
            }
        }
    }

    Ok(items)
}

fn flush_parts(items: &mut Vec<InputItem>, role: Role, parts: &mut Vec<ContentPart>) {
    if !parts.is_empty() {
        items.push(InputItem::Message {
            role,
            content: std::mem::take(parts),
        });
    }
}

fn anthropic_image_url(block: &Value) -> Option<String> {
    let source = block.get("source")?;

    match source.get("type").and_then(Value::as_str) {
        Some("url") => source.get("url").and_then(Value::as_str).map(str::to_string),
        Some("base64") => {
            let media_type = source.get("media_type").and_then(Value::as_str)?;
            let data = source.get("data").and_then(Value::as_str)?;
            Some(format!("data:{media_type};base64,{data}"))
        }
        _ => None,
    }
}

fn anthropic_tool_result_text(block: &Value) -> String {
    match block.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

/// Split system-role message items out of a raw responses input array,
/// returning the remaining items and the extracted instruction text. Used
/// by passthrough patching, where items must stay as raw JSON.
pub(crate) fn extract_system_from_input(items: &[Value]) -> (Vec<Value>, Option<String>) {
    let mut remaining = Vec::with_capacity(items.len());
    let mut extracted: Vec<String> = Vec::new();

    for item in items {
        let is_message = matches!(item.get("type").and_then(Value::as_str), Some("message") | None);
        let role = item.get("role").and_then(Value::as_str);

        if is_message && matches!(role, Some("system") | Some("developer")) {
            let text = match item.get("content") {
                Some(Value::String(text)) => Some(text.clone()),
                Some(Value::Array(parts)) => {
                    let texts: Vec<&str> = parts
                        .iter()
                        .filter_map(|part| part.get("text").and_then(Value::as_str))
                        .collect();

                    (texts.len() == parts.len()).then(|| texts.join("\n"))
                }
                _ => None,
            };

            if let Some(text) = text
                && !text.is_empty()
            {
                extracted.push(text);
                continue;
            }
        }

        remaining.push(item.clone());
    }

    let extracted = if extracted.is_empty() {
        None
    } else {
        Some(extracted.join("\n\n"))
    };

    (remaining, extracted)
}

/// Extract a conversation id from the metadata keys the IDE assistants
/// use, falling back to the same keys at the top level.
pub(crate) fn conversation_id_from(metadata: Option<&Value>, raw: &Value) -> Option<String> {
    const KEYS: [&str; 3] = ["cursorConversationId", "conversation_id", "conversationId"];

    for source in [metadata, Some(raw)].into_iter().flatten() {
        for key in KEYS {
            if let Some(id) = source.get(key).and_then(Value::as_str).filter(|id| !id.is_empty()) {
                return Some(id.to_string());
            }
        }
    }

    None
}

fn join_instructions(client: Option<&str>, extracted: Option<&str>) -> Option<String> {
    let pieces: Vec<&str> = [client, extracted]
        .into_iter()
        .flatten()
        .filter(|text| !text.is_empty())
        .collect();

    if pieces.is_empty() {
        None
    } else {
        Some(pieces.join("\n\n"))
    }
}

/// Decode the body, tolerating raw CR/LF inside string values: some SDKs
/// interpolate user text without escaping control characters.
fn lenient_parse(bytes: &[u8]) -> GatewayResult<Value> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Ok(value),
        Err(first_error) => {
            let Ok(text) = std::str::from_utf8(bytes) else {
                return Err(GatewayError::InvalidBody(first_error.to_string()));
            };

            serde_json::from_str(&escape_bare_newlines(text))
                .map_err(|_| GatewayError::InvalidBody(first_error.to_string()))
        }
    }
}

fn escape_bare_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }

            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                _ => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use crate::state::{StoredToolCall, ToolCallKind};

    use super::*;

    struct Fixture {
        config: GatewayConfig,
        registry: ModelRegistry,
        store: std::sync::Arc<StateStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                config: GatewayConfig::default(),
                registry: ModelRegistry::new(None),
                store: StateStore::new(Duration::from_secs(60), 100),
            }
        }

        fn normalizer(&self) -> Normalizer<'_> {
            Normalizer {
                config: &self.config,
                registry: &self.registry,
                store: &self.store,
            }
        }
    }

    fn normalize(fixture: &Fixture, route: RouteHint, body: Value) -> GatewayResult<CanonicalRequest> {
        fixture.normalizer().from_bytes(route, body.to_string().as_bytes())
    }

    #[tokio::test]
    async fn chat_request_normalizes_to_messages_source() {
        let fixture = Fixture::new();

        let canonical = normalize(
            &fixture,
            RouteHint::Chat,
            json!({"model": "gpt-5", "messages": [{"role": "user", "content": "Hi"}], "stream": true}),
        )
        .unwrap();

        assert_eq!(canonical.model, "gpt-5");
        assert!(canonical.stream);
        assert_eq!(canonical.input_source, InputSource::Messages);
        assert_eq!(canonical.response_format, ResponseFormat::Chat);
        assert_eq!(canonical.input_items, vec![InputItem::message(Role::User, "Hi")]);
    }

    #[tokio::test]
    async fn responses_input_on_chat_route_switches_format() {
        let fixture = Fixture::new();

        let canonical = normalize(&fixture, RouteHint::Chat, json!({"input": "hi"})).unwrap();

        assert_eq!(canonical.input_source, InputSource::Input);
        assert_eq!(canonical.response_format, ResponseFormat::Responses);
        assert!(canonical.used_input_fallback);
    }

    #[tokio::test]
    async fn model_defaults_and_aliases_apply() {
        let fixture = Fixture::new();

        let canonical = normalize(
            &fixture,
            RouteHint::Chat,
            json!({"messages": [{"role": "user", "content": "Hi"}]}),
        )
        .unwrap();
        assert_eq!(canonical.model, "gpt-5");

        let canonical = normalize(
            &fixture,
            RouteHint::Chat,
            json!({"model": "gpt5-high", "messages": [{"role": "user", "content": "Hi"}]}),
        )
        .unwrap();

        assert_eq!(canonical.model, "gpt-5");
        assert_eq!(canonical.requested_model, "gpt5-high");
        assert_eq!(canonical.reasoning_effort, ReasoningEffort::High);
    }

    #[tokio::test]
    async fn unknown_model_is_rejected_with_catalog() {
        let fixture = Fixture::new();

        let error = normalize(
            &fixture,
            RouteHint::Chat,
            json!({"model": "gpt-9000", "messages": [{"role": "user", "content": "Hi"}]}),
        )
        .unwrap_err();

        let message = error.to_string();
        assert!(message.contains("gpt-9000"));
        assert!(message.contains("gpt-5.1-codex"));
    }

    #[tokio::test]
    async fn explicit_reasoning_beats_suffix_and_config() {
        let fixture = Fixture::new();

        let canonical = normalize(
            &fixture,
            RouteHint::Chat,
            json!({
                "model": "gpt-5-high",
                "reasoning": {"effort": "low", "summary": "detailed"},
                "messages": [{"role": "user", "content": "Hi"}],
            }),
        )
        .unwrap();

        assert_eq!(canonical.reasoning_effort, ReasoningEffort::Low);
        assert_eq!(canonical.reasoning_summary, ReasoningSummary::Detailed);
    }

    #[tokio::test]
    async fn disallowed_effort_falls_back_to_medium() {
        let fixture = Fixture::new();

        let canonical = normalize(
            &fixture,
            RouteHint::Chat,
            json!({"model": "gpt-5.1-minimal", "messages": [{"role": "user", "content": "Hi"}]}),
        )
        .unwrap();

        assert_eq!(canonical.model, "gpt-5.1");
        assert_eq!(canonical.reasoning_effort, ReasoningEffort::Medium);
    }

    #[tokio::test]
    async fn store_true_is_forced_off() {
        let fixture = Fixture::new();

        let canonical = normalize(
            &fixture,
            RouteHint::Chat,
            json!({"store": true, "messages": [{"role": "user", "content": "Hi"}]}),
        )
        .unwrap();

        assert_eq!(canonical.store_for_upstream, Some(false));
        assert!(canonical.store_forced);
    }

    #[tokio::test]
    async fn missing_input_yields_route_specific_errors() {
        let fixture = Fixture::new();

        let nothing = normalize(&fixture, RouteHint::Chat, json!({"model": "gpt-5"})).unwrap_err();
        assert!(nothing.to_string().contains("messages, input, or prompt"));

        let invalid = normalize(&fixture, RouteHint::Chat, json!({"messages": []})).unwrap_err();
        assert!(invalid.to_string().contains("valid messages or input"));

        let invalid = normalize(&fixture, RouteHint::Responses, json!({"input": []})).unwrap_err();
        assert!(invalid.to_string().contains("valid input or messages"));
    }

    #[tokio::test]
    async fn prompt_builds_a_synthetic_user_message() {
        let fixture = Fixture::new();

        let canonical = normalize(&fixture, RouteHint::Chat, json!({"prompt": "complete me"})).unwrap();

        assert_eq!(canonical.input_source, InputSource::Prompt);
        assert_eq!(canonical.input_items, vec![InputItem::message(Role::User, "complete me")]);
    }

    #[tokio::test]
    async fn conversation_index_substitutes_previous_response() {
        let fixture = Fixture::new();
        fixture.store.put_snapshot("r1", vec![InputItem::message(Role::User, "before")], Vec::new());
        fixture.store.put_conversation_latest("conv-7", "r1");

        let canonical = normalize(
            &fixture,
            RouteHint::Responses,
            json!({"metadata": {"conversation_id": "conv-7"}, "input": "next"}),
        )
        .unwrap();

        assert_eq!(canonical.previous_response_id.as_deref(), Some("r1"));
        assert!(canonical.auto_previous_response_id);
        assert_eq!(
            canonical.input_items,
            vec![
                InputItem::message(Role::User, "before"),
                InputItem::message(Role::User, "next"),
            ]
        );
    }

    #[tokio::test]
    async fn inferred_linkage_failure_is_soft() {
        let fixture = Fixture::new();
        // The index points at a record that no longer exists.
        fixture.store.put_conversation_latest("conv-7", "gone");

        let canonical = normalize(
            &fixture,
            RouteHint::Responses,
            json!({"metadata": {"conversationId": "conv-7"}, "input": "next"}),
        )
        .unwrap();

        assert_eq!(canonical.previous_response_id, None);
        assert!(!canonical.auto_previous_response_id);
        assert_eq!(canonical.input_items, vec![InputItem::message(Role::User, "next")]);
    }

    #[tokio::test]
    async fn explicit_linkage_failure_is_fatal() {
        let fixture = Fixture::new();

        let error = normalize(
            &fixture,
            RouteHint::Responses,
            json!({"previous_response_id": "gone", "input": [
                {"type": "function_call_output", "call_id": "x", "output": "…"}
            ]}),
        )
        .unwrap_err();

        let message = error.to_string();
        assert!(message.contains("unknown or expired previous_response_id"));
        assert!(message.contains("x"));
    }

    #[tokio::test]
    async fn tool_call_polyfill_runs_on_the_chat_route() {
        let fixture = Fixture::new();
        fixture.store.put_snapshot(
            "r1",
            vec![InputItem::message(Role::User, "weather in Paris")],
            vec![StoredToolCall {
                call_id: "call_1".to_string(),
                name: "get_weather".to_string(),
                arguments: r#"{"city":"Paris"}"#.to_string(),
                kind: ToolCallKind::Function,
            }],
        );

        let canonical = normalize(
            &fixture,
            RouteHint::Chat,
            json!({
                "previous_response_id": "r1",
                "messages": [{"role": "tool", "tool_call_id": "call_1", "content": "{\"temp_c\":21}"}],
            }),
        )
        .unwrap();

        // Chat route: no context prepend, but the orphan output gets its
        // call restored.
        assert_eq!(
            canonical.input_items,
            vec![
                InputItem::FunctionCall {
                    call_id: "call_1".to_string(),
                    name: "get_weather".to_string(),
                    arguments: r#"{"city":"Paris"}"#.to_string(),
                },
                InputItem::FunctionCallOutput {
                    call_id: "call_1".to_string(),
                    output: r#"{"temp_c":21}"#.to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn default_web_search_injection_respects_tool_choice() {
        let mut fixture = Fixture::new();
        fixture.config.default_web_search = true;

        let canonical = normalize(
            &fixture,
            RouteHint::Chat,
            json!({"messages": [{"role": "user", "content": "Hi"}]}),
        )
        .unwrap();
        assert_eq!(canonical.tools, vec![ToolDef::WebSearch]);
        assert!(canonical.base_tools.is_empty());

        let canonical = normalize(
            &fixture,
            RouteHint::Chat,
            json!({"tool_choice": "none", "messages": [{"role": "user", "content": "Hi"}]}),
        )
        .unwrap();
        assert!(canonical.tools.is_empty());
    }

    #[tokio::test]
    async fn instructions_compose_and_inherit() {
        let fixture = Fixture::new();

        let canonical = normalize(
            &fixture,
            RouteHint::Responses,
            json!({
                "instructions": "top",
                "input": [{"type": "message", "role": "system", "content": "sys"}, {"role": "user", "content": "hi"}],
            }),
        )
        .unwrap();
        assert_eq!(canonical.instructions.as_deref(), Some("top\n\nsys"));

        // Inheritance from the previous turn when the request has none.
        fixture.store.put_snapshot("r1", vec![InputItem::message(Role::User, "x")], Vec::new());
        fixture.store.put_instructions("r1", "stored instructions");

        let canonical = normalize(
            &fixture,
            RouteHint::Responses,
            json!({"previous_response_id": "r1", "input": "hi"}),
        )
        .unwrap();
        assert_eq!(canonical.instructions.as_deref(), Some("stored instructions"));
    }

    #[tokio::test]
    async fn chat_route_falls_back_to_configured_instructions() {
        let mut fixture = Fixture::new();
        fixture
            .config
            .instructions
            .insert("gpt-5".to_string(), "configured default".to_string());

        let canonical = normalize(
            &fixture,
            RouteHint::Chat,
            json!({"messages": [{"role": "user", "content": "Hi"}]}),
        )
        .unwrap();

        assert_eq!(canonical.instructions.as_deref(), Some("configured default"));
    }

    #[tokio::test]
    async fn lenient_parse_recovers_bare_newlines() {
        let fixture = Fixture::new();
        let body = "{\"messages\": [{\"role\": \"user\", \"content\": \"line one\nline two\"}]}";

        let canonical = fixture.normalizer().from_bytes(RouteHint::Chat, body.as_bytes()).unwrap();

        assert_eq!(
            canonical.input_items,
            vec![InputItem::message(Role::User, "line one\nline two")]
        );
    }

    #[tokio::test]
    async fn surviving_items_are_a_normalization_fixed_point() {
        let fixture = Fixture::new();

        let first = normalize(
            &fixture,
            RouteHint::Responses,
            json!({"input": [
                {"type": "message", "role": "user", "content": [{"type": "input_text", "text": "hi"}]},
                {"type": "function_call", "call_id": "c1", "name": "f", "arguments": "{}"},
                {"type": "function_call_output", "call_id": "c1", "output": "ok"},
            ]}),
        )
        .unwrap();

        let replayed = serde_json::to_value(&first.input_items).unwrap();
        let second = normalize(&fixture, RouteHint::Responses, json!({"input": replayed})).unwrap();

        assert_eq!(first.input_items, second.input_items);
    }

    #[tokio::test]
    async fn anthropic_requests_normalize() {
        let fixture = Fixture::new();

        let canonical = fixture
            .normalizer()
            .from_anthropic(
                json!({
                    "model": "gpt-5",
                    "max_tokens": 1024,
                    "system": "be brief",
                    "messages": [
                        {"role": "user", "content": "Hi"},
                        {"role": "assistant", "content": [
                            {"type": "text", "text": "checking"},
                            {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Paris"}},
                        ]},
                        {"role": "user", "content": [
                            {"type": "tool_result", "tool_use_id": "toolu_1", "content": "21C"},
                        ]},
                    ],
                    "tools": [{"name": "get_weather", "input_schema": {"type": "object"}}],
                })
                .to_string()
                .as_bytes(),
            )
            .unwrap();

        assert_eq!(canonical.instructions.as_deref(), Some("be brief"));
        assert_eq!(canonical.input_items.len(), 4);
        assert!(matches!(
            &canonical.input_items[2],
            InputItem::FunctionCall { call_id, arguments, .. }
                if call_id == "toolu_1" && arguments == r#"{"city":"Paris"}"#
        ));
        assert!(matches!(
            &canonical.input_items[3],
            InputItem::FunctionCallOutput { output, .. } if output == "21C"
        ));
        assert!(matches!(&canonical.tools[0], ToolDef::Function { name, .. } if name == "get_weather"));
    }

    #[tokio::test]
    async fn ollama_requests_normalize() {
        let fixture = Fixture::new();

        let canonical = fixture
            .normalizer()
            .from_ollama(
                json!({
                    "model": "gpt-5",
                    "messages": [
                        {"role": "system", "content": "be brief"},
                        {"role": "user", "content": "Hi"},
                    ],
                    "think": false,
                })
                .to_string()
                .as_bytes(),
            )
            .unwrap();

        // Ollama defaults to streaming.
        assert!(canonical.stream);
        assert_eq!(canonical.instructions.as_deref(), Some("be brief"));
        assert_eq!(canonical.reasoning_summary, ReasoningSummary::None);
        assert_eq!(canonical.input_items, vec![InputItem::message(Role::User, "Hi")]);
    }
}
