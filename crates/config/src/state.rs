//! Conversation state store settings.

use std::time::Duration;

use serde::Deserialize;

/// Conversation state store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StateConfig {
    /// How long a stored response record stays alive.
    #[serde(deserialize_with = "duration_str::deserialize_duration")]
    pub ttl: Duration,
    /// Record count the store is trimmed to after each sweep.
    pub capacity: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            capacity: 100,
        }
    }
}
