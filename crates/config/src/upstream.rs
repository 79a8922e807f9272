//! Upstream Responses API endpoint and credential settings.

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "https://chatgpt.com/backend-api/codex";

/// Upstream Responses API endpoint and credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Base URL of the upstream Responses API.
    pub base_url: String,
    /// OAuth-issued access token used as the bearer credential upstream.
    pub access_token: Option<SecretString>,
    /// Account identifier sent alongside the access token.
    pub account_id: Option<String>,
    /// Path to an auth file in the codex-login JSON shape. Tokens found
    /// there fill in whatever `access_token` / `account_id` leave unset.
    pub auth_file: Option<PathBuf>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: None,
            account_id: None,
            auth_file: None,
        }
    }
}

impl UpstreamConfig {
    /// Whether any credential source is configured.
    pub fn has_credentials(&self) -> bool {
        self.access_token.is_some() || self.auth_file.is_some()
    }

    /// Resolve the effective credentials, reading the auth file when the
    /// inline fields leave gaps. Inline configuration wins.
    pub fn resolve_credentials(&self) -> anyhow::Result<(SecretString, Option<String>)> {
        if let Some(token) = &self.access_token {
            return Ok((token.clone(), self.account_id.clone()));
        }

        let Some(path) = &self.auth_file else {
            anyhow::bail!("no upstream access token configured: set [upstream] access_token or auth_file");
        };

        let auth = AuthFile::read(path)?;

        let Some(tokens) = auth.tokens else {
            anyhow::bail!("auth file {} carries no tokens", path.display());
        };

        let account_id = self.account_id.clone().or(tokens.account_id);

        Ok((tokens.access_token, account_id))
    }
}

/// On-disk auth file in the codex-login shape.
#[derive(Debug, Deserialize)]
pub struct AuthFile {
    /// Token bundle written by the login flow.
    #[serde(default)]
    pub tokens: Option<TokenData>,
}

/// Token bundle within the auth file.
#[derive(Debug, Deserialize)]
pub struct TokenData {
    /// The bearer token for upstream calls.
    pub access_token: SecretString,
    /// The account the token was issued for.
    #[serde(default)]
    pub account_id: Option<String>,
}

impl AuthFile {
    /// Read and parse the auth file at `path`.
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read auth file {}: {e}", path.display()))?;

        serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse auth file {}: {e}", path.display()))
    }
}
