//! HTTP server configuration settings.

use std::net::SocketAddr;

use secrecy::SecretString;
use serde::Deserialize;

/// HTTP server configuration settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// Bearer token clients must present on `/v1/*` and `/api/*` routes.
    /// When unset, the gateway is open.
    pub api_key: Option<SecretString>,
    /// Health endpoint configuration.
    pub health: HealthConfig,
}

/// Health endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Whether the health endpoint is exposed.
    pub enabled: bool,
    /// The path of the health endpoint.
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/health".to_string(),
        }
    }
}
