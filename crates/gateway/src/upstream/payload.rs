//! Shaping requests into the upstream wire payload.

use serde_json::{Map, Value, json};

use config::{GatewayConfig, ReasoningSummary};

use crate::canonical::CanonicalRequest;
use crate::models;
use crate::normalize::extract_system_from_input;

/// Fields the upstream rejects outright; stripped in passthrough mode.
const STRIPPED_FIELDS: &[&str] = &["metadata", "stream_options", "user", "prompt_cache_retention", "max_output_tokens"];

/// Opt-in include entry required for reasoning continuity.
const ENCRYPTED_REASONING: &str = "reasoning.encrypted_content";

/// Build the upstream payload for a canonical request.
///
/// Sampling knobs from the client dialects are deliberately absent: the
/// upstream does not accept them.
pub fn build(request: &CanonicalRequest, session_id: &str) -> Value {
    let mut payload = Map::new();

    payload.insert("model".to_string(), json!(request.model));

    if let Some(instructions) = &request.instructions {
        payload.insert("instructions".to_string(), json!(instructions));
    }

    payload.insert("input".to_string(), json!(request.input_items));

    if !request.tools.is_empty() {
        payload.insert("tools".to_string(), json!(request.tools));
    }

    if let Some(tool_choice) = &request.tool_choice {
        payload.insert("tool_choice".to_string(), tool_choice.clone());
    }

    payload.insert("parallel_tool_calls".to_string(), json!(request.parallel_tool_calls));

    if let Some(store) = request.store_for_upstream {
        payload.insert("store".to_string(), json!(store));
    }

    // The upstream is always consumed as a stream; non-streaming clients
    // get a collected reply.
    payload.insert("stream".to_string(), json!(true));

    let mut include = request.include.clone();
    if !include.contains(&ENCRYPTED_REASONING.to_string()) {
        include.push(ENCRYPTED_REASONING.to_string());
    }
    payload.insert("include".to_string(), json!(include));

    payload.insert("reasoning".to_string(), reasoning_value(request.reasoning_effort, request.reasoning_summary));
    payload.insert("prompt_cache_key".to_string(), json!(session_id));

    Value::Object(payload)
}

fn reasoning_value(effort: config::ReasoningEffort, summary: ReasoningSummary) -> Value {
    let mut reasoning = Map::new();
    reasoning.insert("effort".to_string(), json!(effort.as_str()));

    if let Some(summary) = summary.as_wire() {
        reasoning.insert("summary".to_string(), json!(summary));
    }

    Value::Object(reasoning)
}

/// Minimal in-place patching for passthrough mode: the client's raw JSON
/// body goes upstream with only what the upstream rejects removed and what
/// it requires added. Everything else is preserved byte-for-byte.
pub fn patch_passthrough(mut raw: Value, config: &GatewayConfig, session_id: &str) -> Value {
    let Some(body) = raw.as_object_mut() else {
        return raw;
    };

    // Model normalization, capturing an effort suffix for the synthesized
    // reasoning block.
    let requested_model = body
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or(&config.default_model)
        .to_string();

    let normalized = models::normalize_name(&requested_model);
    body.insert("model".to_string(), json!(normalized.slug));

    // String input becomes the single-user-message array form.
    if let Some(Value::String(text)) = body.get("input") {
        let text = text.clone();
        body.insert(
            "input".to_string(),
            json!([{
                "type": "message",
                "role": "user",
                "content": [{"type": "input_text", "text": text}],
            }]),
        );
    }

    for field in STRIPPED_FIELDS {
        body.remove(*field);
    }

    // System-role items move into instructions.
    if let Some(Value::Array(items)) = body.get("input") {
        let (remaining, extracted) = extract_system_from_input(items);

        if let Some(extracted) = extracted {
            let combined = match body.get("instructions").and_then(Value::as_str) {
                Some(existing) if !existing.is_empty() => format!("{existing}\n\n{extracted}"),
                _ => extracted,
            };

            body.insert("instructions".to_string(), json!(combined));
        }

        body.insert("input".to_string(), Value::Array(remaining));
    }

    body.insert("store".to_string(), json!(false));
    body.insert("stream".to_string(), json!(true));

    if !body.contains_key("reasoning") {
        let effort = models::clamp_effort(
            &normalized.slug,
            normalized.effort_override.unwrap_or(config.reasoning_effort),
        );
        body.insert("reasoning".to_string(), reasoning_value(effort, config.reasoning_summary));
    }

    let mut include: Vec<Value> = body
        .get("include")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    if !include.iter().any(|entry| entry == ENCRYPTED_REASONING) {
        include.push(json!(ENCRYPTED_REASONING));
    }
    body.insert("include".to_string(), Value::Array(include));

    body.insert("prompt_cache_key".to_string(), json!(session_id));

    raw
}
