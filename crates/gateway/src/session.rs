//! Session fingerprinting for upstream prompt caching.
//!
//! Turns 2..N of a conversation share the same instructions and the same
//! first user message, so hashing exactly that pair yields a stable cache
//! key: the upstream sees an identical `prompt_cache_key` every turn and
//! can reuse its cached prefix computation.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::canonical::{ContentPart, InputItem, Role};

/// Bound on distinct fingerprints remembered at once.
const MAX_ENTRIES: usize = 10_000;

#[derive(Default)]
struct Entries {
    by_fingerprint: HashMap<String, String>,
    insertion_order: VecDeque<String>,
}

/// Deterministic fingerprint → session-id cache.
#[derive(Default)]
pub struct SessionCache {
    entries: Mutex<Entries>,
}

impl SessionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the session id for a request.
    ///
    /// A non-empty `client_override` is returned verbatim without touching
    /// the cache: the caller asserted it knows what it is doing.
    pub fn session_id(
        &self,
        instructions: Option<&str>,
        input_items: &[InputItem],
        client_override: Option<&str>,
    ) -> String {
        if let Some(id) = client_override.filter(|id| !id.is_empty()) {
            return id.to_string();
        }

        let fingerprint = fingerprint(instructions, input_items);

        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(id) = entries.by_fingerprint.get(&fingerprint) {
            return id.clone();
        }

        let id = uuid::Uuid::new_v4().to_string();
        entries.by_fingerprint.insert(fingerprint.clone(), id.clone());
        entries.insertion_order.push_back(fingerprint);

        while entries.by_fingerprint.len() > MAX_ENTRIES {
            let Some(oldest) = entries.insertion_order.pop_front() else {
                break;
            };

            entries.by_fingerprint.remove(&oldest);
        }

        id
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().by_fingerprint.len()
    }
}

/// SHA-256 over the canonical prefix: a key-sorted object holding the
/// instructions (when non-empty) and the first user message reduced to its
/// text and image parts in original order.
fn fingerprint(instructions: Option<&str>, input_items: &[InputItem]) -> String {
    // serde_json maps are BTree-backed, so serialization is key-sorted.
    let mut prefix = Map::new();

    if let Some(instructions) = instructions.filter(|text| !text.is_empty()) {
        prefix.insert("instructions".to_string(), Value::String(instructions.to_string()));
    }

    if let Some(message) = first_user_message(input_items) {
        prefix.insert("first_user_message".to_string(), message);
    }

    let canonical = Value::Object(prefix).to_string();

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn first_user_message(input_items: &[InputItem]) -> Option<Value> {
    let (role, content) = input_items.iter().find_map(|item| match item {
        InputItem::Message { role: Role::User, content } => Some((Role::User, content)),
        _ => None,
    })?;

    let parts: Vec<Value> = content
        .iter()
        .filter_map(|part| match part {
            ContentPart::InputText { text } | ContentPart::OutputText { text } => {
                Some(serde_json::json!({"text": text}))
            }
            ContentPart::InputImage { image_url } => Some(serde_json::json!({"image_url": image_url})),
        })
        .collect();

    Some(serde_json::json!({"role": role, "content": parts}))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(text: &str) -> Vec<InputItem> {
        vec![InputItem::message(Role::User, text)]
    }

    #[test]
    fn identical_prefixes_share_a_session() {
        let cache = SessionCache::new();

        let first = cache.session_id(Some("be brief"), &items("hi"), None);
        let second = cache.session_id(Some("be brief"), &items("hi"), None);

        assert_eq!(first, second);
    }

    #[test]
    fn later_turns_reuse_the_first_turn_entry() {
        let cache = SessionCache::new();

        let turn_one = cache.session_id(Some("be brief"), &items("hi"), None);

        // Turn two appends history after the same first user message.
        let mut continued = items("hi");
        continued.push(InputItem::message(Role::Assistant, "hello"));
        continued.push(InputItem::message(Role::User, "and now?"));

        let turn_two = cache.session_id(Some("be brief"), &continued, None);

        assert_eq!(turn_one, turn_two);
    }

    #[test]
    fn different_instructions_get_different_sessions() {
        let cache = SessionCache::new();

        let a = cache.session_id(Some("be brief"), &items("hi"), None);
        let b = cache.session_id(Some("be verbose"), &items("hi"), None);

        assert_ne!(a, b);
    }

    #[test]
    fn client_override_bypasses_the_cache() {
        let cache = SessionCache::new();

        let id = cache.session_id(Some("x"), &items("hi"), Some("sess-override"));

        assert_eq!(id, "sess-override");
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn empty_override_is_ignored() {
        let cache = SessionCache::new();

        let id = cache.session_id(None, &items("hi"), Some(""));

        assert_ne!(id, "");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn eviction_keeps_the_cache_bounded() {
        let cache = SessionCache::new();

        for i in 0..(MAX_ENTRIES + 50) {
            cache.session_id(None, &items(&format!("prompt {i}")), None);
        }

        assert_eq!(cache.len(), MAX_ENTRIES);
    }
}
