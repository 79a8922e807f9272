//! Conversation state store.
//!
//! The upstream refuses `store: true`, so continuity across turns is
//! polyfilled locally: every completed response leaves a record holding the
//! full input context, the turn's tool calls, and the instructions that
//! produced it. Records expire on a TTL and the store is bounded; a
//! background sweeper enforces both. Everything lives in process memory
//! and is rebuilt cold on restart.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::canonical::InputItem;

/// Minimum sweep cadence regardless of TTL.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// A tool call remembered for a stored response, used to reconstruct
/// missing `function_call` items on later turns.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredToolCall {
    /// Correlation id.
    pub call_id: String,
    /// Tool name.
    pub name: String,
    /// Raw argument payload as produced by the model.
    pub arguments: String,
    /// Whether the call was a function or a custom tool call.
    pub kind: ToolCallKind,
}

/// Flavor of a stored tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallKind {
    /// `function_call` item.
    Function,
    /// `custom_tool_call` item.
    Custom,
}

#[derive(Debug)]
struct Record {
    context: Vec<InputItem>,
    tool_calls: Vec<StoredToolCall>,
    instructions: Option<String>,
    created_at: Instant,
    last_access: Instant,
}

#[derive(Default)]
struct Tables {
    records: HashMap<String, Record>,
    conversations: HashMap<String, String>,
}

/// Thread-safe store of per-response context plus the conversation-id →
/// latest-response index.
pub struct StateStore {
    tables: Mutex<Tables>,
    ttl: Duration,
    capacity: usize,
    cancel: CancellationToken,
}

impl StateStore {
    /// Create a store and spawn its background sweeper.
    pub fn new(ttl: Duration, capacity: usize) -> std::sync::Arc<Self> {
        let store = std::sync::Arc::new(Self {
            tables: Mutex::new(Tables::default()),
            ttl,
            capacity,
            cancel: CancellationToken::new(),
        });

        let sweeper = std::sync::Arc::clone(&store);
        let cancel = store.cancel.clone();
        let interval = (ttl / 4).max(MIN_SWEEP_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => sweeper.sweep(),
                    _ = cancel.cancelled() => break,
                }
            }
        });

        store
    }

    /// Store the full context and tool calls for a response id,
    /// overwriting any prior record.
    pub fn put_snapshot(&self, response_id: &str, context: Vec<InputItem>, tool_calls: Vec<StoredToolCall>) {
        if self.cancel.is_cancelled() {
            return;
        }

        let now = Instant::now();
        let mut tables = self.lock();

        let instructions = tables
            .records
            .get(response_id)
            .and_then(|r| r.instructions.clone());

        tables.records.insert(
            response_id.to_string(),
            Record {
                context,
                tool_calls,
                instructions,
                created_at: now,
                last_access: now,
            },
        );

        Self::enforce_capacity(&mut tables, self.capacity);
    }

    /// Remember the instructions that produced a response.
    pub fn put_instructions(&self, response_id: &str, instructions: &str) {
        if self.cancel.is_cancelled() || instructions.is_empty() {
            return;
        }

        let now = Instant::now();
        let mut tables = self.lock();

        let record = tables.records.entry(response_id.to_string()).or_insert_with(|| Record {
            context: Vec::new(),
            tool_calls: Vec::new(),
            instructions: None,
            created_at: now,
            last_access: now,
        });

        record.instructions = Some(instructions.to_string());
    }

    /// The instructions stored for a response id.
    pub fn get_instructions(&self, response_id: &str) -> Option<String> {
        self.with_live_record(response_id, |r| r.instructions.clone())?
    }

    /// Record the latest response of a conversation.
    pub fn put_conversation_latest(&self, conversation_id: &str, response_id: &str) {
        if self.cancel.is_cancelled() {
            return;
        }

        self.lock()
            .conversations
            .insert(conversation_id.to_string(), response_id.to_string());
    }

    /// The latest recorded response of a conversation.
    pub fn get_conversation_latest(&self, conversation_id: &str) -> Option<String> {
        self.lock().conversations.get(conversation_id).cloned()
    }

    /// The stored context for a response id.
    pub fn get_context(&self, response_id: &str) -> Option<Vec<InputItem>> {
        self.with_live_record(response_id, |r| r.context.clone())
    }

    /// The stored tool calls for a response id.
    pub fn get_tool_calls(&self, response_id: &str) -> Option<Vec<StoredToolCall>> {
        self.with_live_record(response_id, |r| r.tool_calls.clone())
    }

    /// Whether a live record exists for the response id.
    pub fn exists(&self, response_id: &str) -> bool {
        self.with_live_record(response_id, |_| ()).is_some()
    }

    /// Stop the sweeper. Subsequent operations are no-ops.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Remove expired records, drop orphaned conversation entries, then
    /// trim to capacity in least-recently-used order.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut tables = self.lock();

        let ttl = self.ttl;
        tables.records.retain(|_, r| now.duration_since(r.created_at) < ttl);

        Self::enforce_capacity(&mut tables, self.capacity);

        let live: std::collections::HashSet<String> = tables.records.keys().cloned().collect();
        tables.conversations.retain(|_, response_id| live.contains(response_id));
    }

    fn enforce_capacity(tables: &mut Tables, capacity: usize) {
        while tables.records.len() > capacity {
            let Some(oldest) = tables
                .records
                .iter()
                .min_by_key(|(_, r)| r.last_access)
                .map(|(id, _)| id.clone())
            else {
                break;
            };

            tables.records.remove(&oldest);
        }
    }

    fn with_live_record<T>(&self, response_id: &str, f: impl FnOnce(&Record) -> T) -> Option<T> {
        if self.cancel.is_cancelled() {
            return None;
        }

        let now = Instant::now();
        let mut tables = self.lock();

        let expired = {
            let record = tables.records.get(response_id)?;
            now.duration_since(record.created_at) >= self.ttl
        };

        if expired {
            tables.records.remove(response_id);
            return None;
        }

        let record = tables.records.get_mut(response_id)?;
        record.last_access = now;
        Some(f(record))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // A poisoned mutex means a panic mid-operation; the tables are
        // still structurally sound, so keep serving.
        match self.tables.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
