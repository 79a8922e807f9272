//! Wire types for the client-facing dialects.
//!
//! Request-side types are deliberately lenient: unknown fields are ignored
//! and shape variations tolerated, because every SDK in the wild produces
//! slightly different payloads. Response-side types serialize exactly the
//! wire shape each dialect expects.

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub mod responses;

use serde::Deserialize;

/// A `reasoning` override object, accepted on any dialect.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReasoningOverride {
    /// Requested effort, validated against the model family later.
    #[serde(default)]
    pub effort: Option<String>,
    /// Requested summary verbosity.
    #[serde(default)]
    pub summary: Option<String>,
}
