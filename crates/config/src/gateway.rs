//! Request normalization and translation settings.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::{ReasoningCompat, ReasoningEffort, ReasoningSummary};

/// Request normalization and translation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Model used when a request carries none.
    pub default_model: String,
    /// Base reasoning effort; explicit request fields and model-name
    /// effort suffixes override it.
    pub reasoning_effort: ReasoningEffort,
    /// Base reasoning summary verbosity.
    pub reasoning_summary: ReasoningSummary,
    /// How reasoning deltas are surfaced on dialects without a native
    /// reasoning channel.
    pub reasoning_compat: ReasoningCompat,
    /// Inject a `web_search` tool when the client sent none.
    pub default_web_search: bool,
    /// Log request and response payloads at debug level.
    pub verbose: bool,
    /// Per-model default instructions used on the chat route when the
    /// request yields none.
    pub instructions: BTreeMap<String, String>,
    /// Where the fetched model list is cached on disk.
    pub model_cache_path: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_model: "gpt-5".to_string(),
            reasoning_effort: ReasoningEffort::default(),
            reasoning_summary: ReasoningSummary::default(),
            reasoning_compat: ReasoningCompat::default(),
            default_web_search: false,
            verbose: false,
            instructions: BTreeMap::new(),
            model_cache_path: None,
        }
    }
}

impl GatewayConfig {
    /// Default instructions configured for a model, if any.
    pub fn default_instructions(&self, model: &str) -> Option<&str> {
        self.instructions.get(model).map(String::as_str)
    }
}
