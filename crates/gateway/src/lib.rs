//! Multi-dialect gateway core.
//!
//! Exposes OpenAI Chat Completions, OpenAI Responses, OpenAI Text
//! Completions, Anthropic Messages, and Ollama endpoints over a single
//! ChatGPT-style Responses upstream: requests are normalized into one
//! canonical form, the upstream SSE stream is translated back into each
//! dialect's wire format in real time, and a local state store polyfills
//! `previous_response_id` continuity the upstream refuses to provide.

use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{Json, Response},
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

pub mod canonical;
pub mod collect;
mod error;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod polyfill;
pub mod protocol;
pub mod session;
pub mod sse;
pub mod state;
pub mod translate;
pub mod upstream;

pub use error::{AnthropicError, AnthropicResult, GatewayError, GatewayResult, OllamaError, OllamaResult};

use models::ModelRegistry;
use normalize::{Normalizer, RouteHint};
use pipeline::Dialect;
use session::SessionCache;
use state::StateStore;
use upstream::UpstreamClient;

/// Shared per-process gateway state.
pub struct GatewayServer {
    /// Full configuration snapshot.
    pub config: config::Config,
    /// Model catalog.
    pub registry: ModelRegistry,
    /// Conversation state store.
    pub state: Arc<StateStore>,
    /// Session fingerprint cache.
    pub sessions: SessionCache,
    /// Upstream HTTP client.
    pub upstream: UpstreamClient,
}

impl GatewayServer {
    /// Build the shared state from configuration.
    pub fn build(config: &config::Config) -> anyhow::Result<Arc<Self>> {
        let upstream = UpstreamClient::new(&config.upstream)?;
        let registry = ModelRegistry::new(config.gateway.model_cache_path.clone());
        let state = StateStore::new(config.state.ttl, config.state.capacity);

        Ok(Arc::new(Self {
            config: config.clone(),
            registry,
            state,
            sessions: SessionCache::new(),
            upstream,
        }))
    }

    /// Spawn the best-effort background refresh of the model registry,
    /// cancelled on shutdown.
    pub fn spawn_registry_refresh(self: Arc<Self>, shutdown: CancellationToken) {
        let server = self;

        tokio::spawn(async move {
            tokio::select! {
                result = server.upstream.list_models() => match result {
                    Ok((fetched, etag)) => {
                        log::debug!("Fetched {} models from upstream", fetched.len());
                        server.registry.absorb(fetched, etag);
                    }
                    Err(e) => log::debug!("Model list refresh failed: {e}"),
                },
                _ = shutdown.cancelled() => {}
            }
        });
    }

    fn normalizer(&self) -> Normalizer<'_> {
        Normalizer {
            config: &self.config.gateway,
            registry: &self.registry,
            store: &self.state,
        }
    }
}

/// Creates an axum router for all gateway endpoints.
pub fn router(server: Arc<GatewayServer>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/completions", post(completions))
        .route("/v1/responses", post(responses))
        .route("/v1/models", get(list_models))
        .route("/v1/messages", post(anthropic_messages))
        .route("/v1/messages/count_tokens", post(anthropic_count_tokens))
        .route("/api/chat", post(ollama_chat))
        .route("/api/tags", get(ollama_tags))
        .route("/api/version", get(ollama_version))
        .route("/api/show", post(ollama_show))
        .with_state(server)
}

fn session_override(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-session-id").and_then(|value| value.to_str().ok())
}

/// Handle Chat Completions requests, streaming or not.
async fn chat_completions(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<Response> {
    let request = server.normalizer().from_bytes(RouteHint::Chat, &body)?;

    log::debug!(
        "Chat completions: model={}, items={}, stream={}",
        request.model,
        request.input_items.len(),
        request.stream
    );

    pipeline::run(&server, request, Dialect::Chat, session_override(&headers)).await
}

/// Handle legacy Text Completions requests.
async fn completions(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<Response> {
    let request = server.normalizer().from_bytes(RouteHint::Chat, &body)?;

    pipeline::run(&server, request, Dialect::Text, session_override(&headers)).await
}

/// Handle Responses requests. Bodies carrying a top-level `input` take the
/// passthrough path: the raw JSON is patched in place and forwarded
/// opaquely, preserving fields the typed path would drop.
async fn responses(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<Response> {
    if let Ok(raw) = serde_json::from_slice::<Value>(&body)
        && raw.get("input").is_some()
    {
        log::debug!("Responses request taking the passthrough path");
        return pipeline::run_passthrough(&server, raw, session_override(&headers)).await;
    }

    let request = server.normalizer().from_bytes(RouteHint::Responses, &body)?;

    pipeline::run(&server, request, Dialect::Responses, session_override(&headers)).await
}

/// Handle list models requests.
async fn list_models(State(server): State<Arc<GatewayServer>>) -> Json<Value> {
    let data: Vec<Value> = server
        .registry
        .visible_models()
        .into_iter()
        .map(|model| {
            json!({
                "id": model.slug,
                "object": "model",
                "created": 0,
                "owned_by": model.owned_by,
            })
        })
        .collect();

    Json(json!({"object": "list", "data": data}))
}

/// Handle Anthropic Messages requests.
async fn anthropic_messages(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> AnthropicResult<Response> {
    require_anthropic_version(&headers)?;

    let request = server.normalizer().from_anthropic(&body)?;

    log::debug!(
        "Anthropic messages: model={}, items={}, stream={}",
        request.model,
        request.input_items.len(),
        request.stream
    );

    Ok(pipeline::run(&server, request, Dialect::Anthropic, session_override(&headers)).await?)
}

/// Handle Anthropic token counting with a documented estimate: the
/// upstream exposes no counting endpoint.
async fn anthropic_count_tokens(headers: HeaderMap, body: Bytes) -> AnthropicResult<Json<Value>> {
    require_anthropic_version(&headers)?;

    let view: protocol::anthropic::MessagesView = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::InvalidBody(format!("invalid messages payload: {e}")))?;

    let mut length = view.system_text().map(|text| text.len()).unwrap_or(0);

    for message in &view.messages {
        length += match &message.content {
            Value::String(text) => text.len(),
            Value::Array(blocks) => blocks
                .iter()
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .map(str::len)
                .sum(),
            _ => 0,
        };
    }

    Ok(Json(translate::anthropic::encode_token_count(length)))
}

fn require_anthropic_version(headers: &HeaderMap) -> Result<(), AnthropicError> {
    if headers.get("anthropic-version").is_none() {
        return Err(AnthropicError(GatewayError::InvalidRequest(
            "anthropic-version header is required".to_string(),
        )));
    }

    Ok(())
}

/// Handle Ollama chat requests.
async fn ollama_chat(
    State(server): State<Arc<GatewayServer>>,
    headers: HeaderMap,
    body: Bytes,
) -> OllamaResult<Response> {
    let request = server.normalizer().from_ollama(&body)?;

    Ok(pipeline::run(&server, request, Dialect::Ollama, session_override(&headers)).await?)
}

/// Handle Ollama tag listing.
async fn ollama_tags(State(server): State<Arc<GatewayServer>>) -> Json<Value> {
    let models: Vec<Value> = server
        .registry
        .visible_models()
        .into_iter()
        .map(|model| {
            json!({
                "name": model.slug,
                "model": model.slug,
                "modified_at": "1970-01-01T00:00:00Z",
                "size": 0,
                "digest": "",
                "details": {
                    "format": "api",
                    "family": "gpt",
                    "parameter_size": "",
                    "quantization_level": "",
                },
            })
        })
        .collect();

    Json(json!({"models": models}))
}

/// Handle Ollama version probes.
async fn ollama_version() -> Json<Value> {
    Json(json!({"version": env!("CARGO_PKG_VERSION")}))
}

/// Handle Ollama model inspection.
async fn ollama_show(State(server): State<Arc<GatewayServer>>, body: Bytes) -> OllamaResult<Json<Value>> {
    let raw: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let requested = raw
        .get("model")
        .or_else(|| raw.get("name"))
        .and_then(Value::as_str)
        .unwrap_or(&server.config.gateway.default_model);

    let normalized = models::normalize_name(requested);

    if !server.registry.is_known(&normalized.slug) {
        return Err(OllamaError(GatewayError::InvalidRequest(format!(
            "model '{requested}' not found"
        ))));
    }

    Ok(Json(json!({
        "details": {"format": "api", "family": "gpt"},
        "model_info": {"general.architecture": "gpt"},
        "capabilities": ["completion", "tools", "thinking"],
    })))
}
