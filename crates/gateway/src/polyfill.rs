//! Tool-call restoration.
//!
//! The upstream rejects `store: true`, so it never retains state between
//! turns. Clients that lean on `previous_response_id` continuity send a
//! `function_call_output` whose originating `function_call` only exists in
//! our local store; this module prepends the stored context and rebuilds
//! the missing call items so the upstream never sees an orphan output.

use std::collections::HashSet;

use crate::canonical::InputItem;
use crate::error::GatewayError;
use crate::state::{StateStore, StoredToolCall, ToolCallKind};

/// Restore history and missing tool calls for one turn's input.
///
/// When `prepend_context` is set and the referenced record exists, its
/// context is prepended unless the current input already starts with it.
/// Orphan `function_call_output` items are then matched against the stored
/// tool-call table and a synthetic call item is inserted immediately
/// before each first reference.
pub fn restore(
    mut items: Vec<InputItem>,
    previous_response_id: Option<&str>,
    prepend_context: bool,
    store: &StateStore,
) -> Result<Vec<InputItem>, GatewayError> {
    if let Some(previous_id) = previous_response_id
        && prepend_context
    {
        match store.get_context(previous_id) {
            Some(context) => {
                if !is_prefix(&context, &items) {
                    let mut combined = context;
                    combined.extend(items);
                    items = combined;
                }
            }
            None => {
                return Err(GatewayError::UnknownPreviousResponse {
                    id: previous_id.to_string(),
                    unresolved: orphan_call_ids(&items),
                });
            }
        }
    }

    let orphans = orphan_call_ids(&items);

    if orphans.is_empty() {
        return Ok(items);
    }

    let Some(previous_id) = previous_response_id else {
        return Err(GatewayError::InvalidToolState { call_ids: orphans });
    };

    let stored_calls = store.get_tool_calls(previous_id).ok_or_else(|| {
        GatewayError::UnknownPreviousResponse {
            id: previous_id.to_string(),
            unresolved: orphans.clone(),
        }
    })?;

    let unresolved: Vec<String> = orphans
        .iter()
        .filter(|id| !stored_calls.iter().any(|call| &call.call_id == *id))
        .cloned()
        .collect();

    if !unresolved.is_empty() {
        return Err(GatewayError::UnknownPreviousResponse {
            id: previous_id.to_string(),
            unresolved,
        });
    }

    Ok(insert_restored_calls(items, &stored_calls, &orphans))
}

/// Call ids of `function_call_output` items with no matching call in the
/// same input, in first-reference order.
fn orphan_call_ids(items: &[InputItem]) -> Vec<String> {
    let known: HashSet<&str> = items
        .iter()
        .filter_map(|item| match item {
            InputItem::FunctionCall { call_id, .. } | InputItem::CustomToolCall { call_id, .. } => {
                Some(call_id.as_str())
            }
            _ => None,
        })
        .collect();

    let mut seen = HashSet::new();
    let mut orphans = Vec::new();

    for item in items {
        if let InputItem::FunctionCallOutput { call_id, .. } = item
            && !known.contains(call_id.as_str())
            && seen.insert(call_id.clone())
        {
            orphans.push(call_id.clone());
        }
    }

    orphans
}

/// Insert one synthetic call item immediately before the first output that
/// references it, preserving the stored call type.
fn insert_restored_calls(items: Vec<InputItem>, stored: &[StoredToolCall], orphans: &[String]) -> Vec<InputItem> {
    let orphan_set: HashSet<&str> = orphans.iter().map(String::as_str).collect();
    let mut inserted: HashSet<String> = HashSet::new();
    let mut restored = Vec::with_capacity(items.len() + orphans.len());

    for item in items {
        if let InputItem::FunctionCallOutput { call_id, .. } = &item
            && orphan_set.contains(call_id.as_str())
            && !inserted.contains(call_id)
            && let Some(call) = stored.iter().find(|call| &call.call_id == call_id)
        {
            inserted.insert(call_id.clone());
            restored.push(synthetic_call(call));
        }

        restored.push(item);
    }

    restored
}

fn synthetic_call(call: &StoredToolCall) -> InputItem {
    match call.kind {
        ToolCallKind::Function => InputItem::FunctionCall {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        },
        ToolCallKind::Custom => InputItem::CustomToolCall {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            input: serde_json::from_str(&call.arguments)
                .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone())),
        },
    }
}

/// Deep structural prefix check, so clients that resend the whole
/// conversation every turn do not get their history duplicated.
fn is_prefix(candidate: &[InputItem], items: &[InputItem]) -> bool {
    candidate.len() <= items.len() && candidate.iter().zip(items).all(|(a, b)| a == b)
}
