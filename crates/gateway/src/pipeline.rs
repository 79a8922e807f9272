//! Pipeline orchestration.
//!
//! One request flows: normalize → dispatch upstream → translate (stream)
//! or collect (non-stream) → state capture. Streaming replies are driven
//! by a spawned task that feeds translated bytes through a channel into
//! the response body while retaining every upstream event; after the last
//! byte the retained events are folded by the collector and written to the
//! state store. A client disconnect flips a write-failed flag and the task
//! keeps draining upstream so the state write still happens.

use std::sync::Arc;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;

use config::ReasoningCompat;

use crate::GatewayServer;
use crate::canonical::{CanonicalRequest, InputItem, ResponseFormat, Role};
use crate::collect::{CollectedResponse, Collector, output_items_to_input};
use crate::error::{GatewayError, GatewayResult};
use crate::normalize;
use crate::polyfill;
use crate::sse::EventStream;
use crate::translate::{
    StreamTranslator, anthropic::AnthropicTranslator, chat::ChatTranslator, ollama::OllamaTranslator,
    responses::ResponsesTranslator, text::TextTranslator,
};
use crate::upstream::{RetryContext, payload};

/// The client-facing dialect of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// OpenAI Chat Completions.
    Chat,
    /// OpenAI Responses.
    Responses,
    /// OpenAI Text Completions.
    Text,
    /// Anthropic Messages.
    Anthropic,
    /// Ollama NDJSON chat.
    Ollama,
}

/// Everything the streaming task and the encoders need about the turn.
struct TurnContext {
    model: String,
    sent_items: Vec<InputItem>,
    instructions: Option<String>,
    conversation_id: Option<String>,
    stream: bool,
    include_usage: bool,
    compat: ReasoningCompat,
    dialect: Dialect,
}

/// Run a normalized request through the upstream and answer in the given
/// dialect.
pub async fn run(
    server: &Arc<GatewayServer>,
    request: CanonicalRequest,
    dialect: Dialect,
    session_override: Option<&str>,
) -> GatewayResult<Response> {
    // A Responses-shaped body on the chat route answers in the Responses
    // dialect regardless of where it arrived.
    let dialect = match (dialect, request.response_format) {
        (Dialect::Chat, ResponseFormat::Responses) => Dialect::Responses,
        (dialect, _) => dialect,
    };

    let session_id = server.sessions.session_id(
        request.instructions.as_deref(),
        &request.input_items,
        session_override,
    );

    let upstream_payload = payload::build(&request, &session_id);

    let retry = RetryContext {
        base_tools: (request.tools != request.base_tools).then(|| request.base_tools.clone()),
    };

    if server.config.gateway.verbose {
        log::debug!("Upstream payload: {upstream_payload}");
    }

    let events = server
        .upstream
        .responses_stream(upstream_payload, &session_id, retry)
        .await?;

    let turn = TurnContext {
        model: request.requested_model.clone(),
        sent_items: request.input_items.clone(),
        instructions: request.instructions.clone(),
        conversation_id: request.conversation_id.clone(),
        stream: request.stream,
        include_usage: request.include_usage,
        compat: server.config.gateway.reasoning_compat,
        dialect,
    };

    respond(server, events, turn).await
}

/// Run a passthrough request: the raw body is patched in place and goes
/// upstream opaquely; the reply is always Responses-dialect.
pub async fn run_passthrough(
    server: &Arc<GatewayServer>,
    mut raw: Value,
    session_override: Option<&str>,
) -> GatewayResult<Response> {
    let stream = raw.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let instructions = raw.get("instructions").and_then(Value::as_str).map(str::to_string);
    let conversation_id = normalize::conversation_id_from(raw.get("metadata"), &raw);

    // Items are parsed for fingerprinting, continuity, and state capture;
    // the patched body itself stays opaque unless history restoration has
    // to rewrite the input.
    let sent_items = raw
        .get("input")
        .map(parse_raw_items)
        .unwrap_or_default();

    let model = raw
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or(&server.config.gateway.default_model)
        .to_string();

    let session_id = server
        .sessions
        .session_id(instructions.as_deref(), &sent_items, session_override);

    restore_passthrough_history(server, &mut raw, &sent_items)?;

    let patched = payload::patch_passthrough(raw, &server.config.gateway, &session_id);

    // The patched body may have moved system items into instructions and
    // coerced the input; re-read both so state capture matches what was
    // actually sent.
    let instructions = patched
        .get("instructions")
        .and_then(Value::as_str)
        .map(str::to_string);
    let sent_items = patched.get("input").map(parse_raw_items).unwrap_or_default();

    if server.config.gateway.verbose {
        log::debug!("Passthrough payload: {patched}");
    }

    let events = server
        .upstream
        .responses_stream(patched, &session_id, RetryContext { base_tools: None })
        .await?;

    let turn = TurnContext {
        model,
        sent_items,
        instructions,
        conversation_id,
        stream,
        include_usage: false,
        compat: server.config.gateway.reasoning_compat,
        dialect: Dialect::Responses,
    };

    respond(server, events, turn).await
}

/// `previous_response_id` continuity for passthrough bodies. The polyfill
/// runs over the parsed items; the raw input array is rewritten only when
/// restoration actually changed the sequence, so bodies without linkage
/// stay byte-identical.
fn restore_passthrough_history(
    server: &Arc<GatewayServer>,
    raw: &mut Value,
    sent_items: &[InputItem],
) -> GatewayResult<()> {
    let mut previous = raw
        .get("previous_response_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);

    let mut auto_previous = false;

    if previous.is_none()
        && let Some(conversation_id) = normalize::conversation_id_from(raw.get("metadata"), raw)
        && let Some(latest) = server.state.get_conversation_latest(&conversation_id)
    {
        previous = Some(latest);
        auto_previous = true;
    }

    let restored = match polyfill::restore(sent_items.to_vec(), previous.as_deref(), true, &server.state) {
        Ok(restored) => restored,
        Err(error) if auto_previous => {
            // Inferred linkage is dropped silently.
            log::debug!("Dropping inferred previous_response_id: {error}");
            sent_items.to_vec()
        }
        Err(error) => return Err(error),
    };

    if let Some(body) = raw.as_object_mut() {
        // The upstream retains nothing, so the link means nothing to it.
        body.remove("previous_response_id");

        if restored.as_slice() != sent_items {
            body.insert("input".to_string(), serde_json::json!(restored));
        }
    }

    Ok(())
}

async fn respond(server: &Arc<GatewayServer>, events: EventStream, turn: TurnContext) -> GatewayResult<Response> {
    if turn.stream {
        Ok(stream_response(server, events, turn))
    } else {
        collect_response(server, events, turn).await
    }
}

fn translator_for(turn: &TurnContext) -> Box<dyn StreamTranslator> {
    match turn.dialect {
        Dialect::Chat => Box::new(ChatTranslator::new(turn.model.clone(), turn.compat, turn.include_usage)),
        Dialect::Responses => Box::new(ResponsesTranslator::new()),
        Dialect::Text => Box::new(TextTranslator::new(turn.model.clone(), turn.include_usage)),
        Dialect::Anthropic => Box::new(AnthropicTranslator::new(turn.model.clone(), turn.compat)),
        Dialect::Ollama => Box::new(OllamaTranslator::new(turn.model.clone(), turn.compat)),
    }
}

/// Build the streamed response: a channel-backed body fed by a task that
/// drives the translator, then captures state.
fn stream_response(server: &Arc<GatewayServer>, mut events: EventStream, turn: TurnContext) -> Response {
    let mut translator = translator_for(&turn);
    let content_type = translator.content_type();

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::convert::Infallible>>(32);
    let server = Arc::clone(server);

    tokio::spawn(async move {
        let mut write_failed = false;
        let mut retained: Vec<crate::sse::SseEvent> = Vec::new();
        let mut frames: Vec<Bytes> = Vec::new();

        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    translator.on_event(&event, &mut frames);
                    retained.push(event);

                    for frame in frames.drain(..) {
                        if !write_failed && tx.send(Ok(frame)).await.is_err() {
                            // Stop writing, keep draining: state capture
                            // still needs the rest of the stream.
                            write_failed = true;
                            log::debug!("Client disconnected mid-stream; draining upstream for state capture");
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Upstream stream error: {e}");
                    break;
                }
            }
        }

        translator.on_end(&mut frames);

        for frame in frames.drain(..) {
            if !write_failed && tx.send(Ok(frame)).await.is_err() {
                write_failed = true;
            }
        }

        drop(tx);

        capture_state(&server, &retained, &turn);
    });

    Response::builder()
        .header(CONTENT_TYPE, content_type)
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .unwrap_or_else(|e| {
            log::error!("Failed to build streaming response: {e}");
            Response::new(Body::empty())
        })
}

/// Collect the whole stream and answer with the dialect's non-streaming
/// shape.
async fn collect_response(
    server: &Arc<GatewayServer>,
    mut events: EventStream,
    turn: TurnContext,
) -> GatewayResult<Response> {
    let mut collector = Collector::new();
    let mut saw_event = false;

    while let Some(item) = events.next().await {
        match item {
            Ok(event) => {
                saw_event = true;
                if collector.feed(&event) {
                    break;
                }
            }
            Err(e) => {
                log::warn!("Upstream stream error: {e}");
                break;
            }
        }
    }

    let collected = collector.finish();

    if !saw_event {
        return Err(GatewayError::UpstreamStreamFailure(
            "upstream returned empty response".to_string(),
        ));
    }

    if let Some(error) = &collected.error_message {
        write_collected_state(server, &collected, &turn);
        return Err(GatewayError::UpstreamStreamFailure(error.clone()));
    }

    let body = encode_collected(&collected, &turn);
    write_collected_state(server, &collected, &turn);

    Response::builder()
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .map_err(|e| GatewayError::Internal(Some(format!("failed to build response: {e}"))))
}

fn encode_collected(collected: &CollectedResponse, turn: &TurnContext) -> Value {
    match turn.dialect {
        Dialect::Chat => crate::translate::chat::encode(collected, &turn.model, turn.compat),
        Dialect::Responses => crate::translate::responses::encode(collected, &turn.model),
        Dialect::Text => crate::translate::text::encode(collected, &turn.model),
        Dialect::Anthropic => crate::translate::anthropic::encode(collected, &turn.model, turn.compat),
        Dialect::Ollama => crate::translate::ollama::encode(collected, &turn.model, turn.compat),
    }
}

/// Fold retained events and write the turn's state.
fn capture_state(server: &GatewayServer, retained: &[crate::sse::SseEvent], turn: &TurnContext) {
    let mut collector = Collector::new();

    for event in retained {
        if collector.feed(event) {
            break;
        }
    }

    write_collected_state(server, &collector.finish(), turn);
}

fn write_collected_state(server: &GatewayServer, collected: &CollectedResponse, turn: &TurnContext) {
    let Some(response_id) = &collected.response_id else {
        log::debug!("No response id on upstream stream; skipping state capture");
        return;
    };

    let mut derived = output_items_to_input(&collected.output_items);

    // Some streams carry output only in the final response snapshot.
    if derived.is_empty()
        && let Some(output) = collected
            .raw_response
            .as_ref()
            .and_then(|raw| raw.get("output"))
            .and_then(Value::as_array)
    {
        derived = output_items_to_input(output);
    }

    // A turn that produced text must leave an assistant item in the
    // stored context, even when no output item was observed.
    if !collected.full_text.is_empty() && !derived.iter().any(|item| item.has_role(Role::Assistant)) {
        derived.push(InputItem::message(Role::Assistant, collected.full_text.clone()));
    }

    let mut context = turn.sent_items.clone();
    context.extend(derived);

    server
        .state
        .put_snapshot(response_id, context, collected.tool_calls.clone());

    if let Some(instructions) = &turn.instructions {
        server.state.put_instructions(response_id, instructions);
    }

    // The conversation index only advances on successful completions.
    if collected.error_message.is_none()
        && let Some(conversation_id) = &turn.conversation_id
    {
        server.state.put_conversation_latest(conversation_id, response_id);
    }
}

fn parse_raw_items(input: &Value) -> Vec<InputItem> {
    normalize::input::from_input_value(input).items
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::canonical::Role;
    use crate::state::{StoredToolCall, ToolCallKind};

    use super::*;

    fn test_server() -> Arc<GatewayServer> {
        let mut config = config::Config::default();
        config.upstream.access_token = Some("tok".into());

        GatewayServer::build(&config).unwrap()
    }

    #[tokio::test]
    async fn passthrough_history_is_restored_and_linkage_stripped() {
        let server = test_server();

        server.state.put_snapshot(
            "r1",
            vec![InputItem::message(Role::User, "weather in Paris")],
            vec![StoredToolCall {
                call_id: "call_1".to_string(),
                name: "get_weather".to_string(),
                arguments: r#"{"city":"Paris"}"#.to_string(),
                kind: ToolCallKind::Function,
            }],
        );

        let mut raw = json!({
            "previous_response_id": "r1",
            "input": [{"type": "function_call_output", "call_id": "call_1", "output": "{\"temp_c\":21}"}],
        });
        let sent = parse_raw_items(&raw["input"]);

        restore_passthrough_history(&server, &mut raw, &sent).unwrap();

        assert!(raw.get("previous_response_id").is_none());

        let input = raw["input"].as_array().unwrap();
        assert_eq!(input.len(), 3);
        assert_eq!(input[0]["type"], json!("message"));
        assert_eq!(input[1]["type"], json!("function_call"));
        assert_eq!(input[1]["call_id"], json!("call_1"));
        assert_eq!(input[2]["type"], json!("function_call_output"));
    }

    #[tokio::test]
    async fn passthrough_without_linkage_stays_untouched() {
        let server = test_server();

        let original = json!({
            "input": [{"type": "message", "role": "user", "content": [{"type": "input_text", "text": "hi"}], "niche_field": true}],
        });
        let mut raw = original.clone();
        let sent = parse_raw_items(&raw["input"]);

        restore_passthrough_history(&server, &mut raw, &sent).unwrap();

        assert_eq!(raw, original);
    }

    #[tokio::test]
    async fn passthrough_unknown_linkage_fails() {
        let server = test_server();

        let mut raw = json!({
            "previous_response_id": "gone",
            "input": [{"type": "function_call_output", "call_id": "x", "output": "…"}],
        });
        let sent = parse_raw_items(&raw["input"]);

        let error = restore_passthrough_history(&server, &mut raw, &sent).unwrap_err();

        let message = error.to_string();
        assert!(message.contains("unknown or expired previous_response_id"));
        assert!(message.contains("x"));
    }

    #[tokio::test]
    async fn delta_only_streams_still_store_an_assistant_turn() {
        let server = test_server();

        let collected = CollectedResponse {
            response_id: Some("r1".to_string()),
            full_text: "Hello".to_string(),
            ..Default::default()
        };

        let turn = TurnContext {
            model: "gpt-5".to_string(),
            sent_items: vec![InputItem::message(Role::User, "Hi")],
            instructions: None,
            conversation_id: Some("conv".to_string()),
            stream: true,
            include_usage: false,
            compat: ReasoningCompat::ThinkTags,
            dialect: Dialect::Chat,
        };

        write_collected_state(&server, &collected, &turn);

        assert_eq!(
            server.state.get_context("r1").unwrap(),
            vec![
                InputItem::message(Role::User, "Hi"),
                InputItem::message(Role::Assistant, "Hello"),
            ]
        );
        assert_eq!(server.state.get_conversation_latest("conv").as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn failed_turns_do_not_advance_the_conversation_index() {
        let server = test_server();

        let collected = CollectedResponse {
            response_id: Some("r2".to_string()),
            error_message: Some("boom".to_string()),
            ..Default::default()
        };

        let turn = TurnContext {
            model: "gpt-5".to_string(),
            sent_items: Vec::new(),
            instructions: None,
            conversation_id: Some("conv".to_string()),
            stream: false,
            include_usage: false,
            compat: ReasoningCompat::ThinkTags,
            dialect: Dialect::Chat,
        };

        write_collected_state(&server, &collected, &turn);

        assert!(server.state.exists("r2"));
        assert_eq!(server.state.get_conversation_latest("conv"), None);
    }

    #[test]
    fn raw_items_parse_wire_shapes() {
        let items = parse_raw_items(&json!([
            {"type": "message", "role": "user", "content": [{"type": "input_text", "text": "hi"}]},
            {"type": "function_call", "call_id": "c", "name": "f", "arguments": "{}"},
            {"type": "unknown_item"},
        ]));

        assert_eq!(items.len(), 2);
        assert!(items[0].has_role(Role::User));
    }

    #[test]
    fn raw_string_input_is_a_user_message() {
        let items = parse_raw_items(&json!("hi"));
        assert_eq!(items, vec![InputItem::message(Role::User, "hi")]);
    }
}
