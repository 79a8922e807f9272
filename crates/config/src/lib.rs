//! Relay configuration structures to map the relay.toml configuration.

#![deny(missing_docs)]

mod gateway;
mod loader;
mod reasoning;
mod server;
mod state;
mod upstream;

use std::path::Path;

pub use gateway::GatewayConfig;
pub use reasoning::{ReasoningCompat, ReasoningEffort, ReasoningSummary};
use serde::Deserialize;
pub use server::{HealthConfig, ServerConfig};
pub use state::StateConfig;
pub use upstream::{AuthFile, TokenData, UpstreamConfig};

/// Main configuration structure for the relay application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// Upstream Responses API credentials and endpoint.
    pub upstream: UpstreamConfig,
    /// Request normalization and translation settings.
    pub gateway: GatewayConfig,
    /// Conversation state store settings.
    pub state: StateConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates that the configuration carries upstream credentials from
    /// some source.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate_has_credentials(self)
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;

    use crate::Config;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_debug_snapshot!(&config, @r#"
        Config {
            server: ServerConfig {
                listen_address: None,
                api_key: None,
                health: HealthConfig {
                    enabled: true,
                    path: "/health",
                },
            },
            upstream: UpstreamConfig {
                base_url: "https://chatgpt.com/backend-api/codex",
                access_token: None,
                account_id: None,
                auth_file: None,
            },
            gateway: GatewayConfig {
                default_model: "gpt-5",
                reasoning_effort: Medium,
                reasoning_summary: Auto,
                reasoning_compat: ThinkTags,
                default_web_search: false,
                verbose: false,
                instructions: {},
                model_cache_path: None,
            },
            state: StateConfig {
                ttl: 300s,
                capacity: 100,
            },
        }
        "#);
    }
}
