use std::path::Path;

use anyhow::bail;
use indoc::indoc;

use crate::Config;

/// Environment variable overriding `[server] api_key`.
const ENV_API_KEY: &str = "RELAY_API_KEY";
/// Environment variable overriding `[upstream] access_token`.
const ENV_UPSTREAM_TOKEN: &str = "RELAY_UPSTREAM_TOKEN";
/// Environment variable overriding `[upstream] account_id`.
const ENV_UPSTREAM_ACCOUNT: &str = "RELAY_UPSTREAM_ACCOUNT";

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read configuration {}: {e}", path.display()))?;

    let mut config: Config = toml::from_str(&content)?;
    apply_env_overrides(&mut config);
    validate_has_credentials(&config)?;

    Ok(config)
}

/// Secrets are the only values the environment can override; everything
/// else belongs in the file.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(value) = std::env::var(ENV_API_KEY) {
        config.server.api_key = Some(value.into());
    }

    if let Ok(value) = std::env::var(ENV_UPSTREAM_TOKEN) {
        config.upstream.access_token = Some(value.into());
    }

    if let Ok(value) = std::env::var(ENV_UPSTREAM_ACCOUNT) {
        config.upstream.account_id = Some(value);
    }
}

pub(crate) fn validate_has_credentials(config: &Config) -> anyhow::Result<()> {
    if config.upstream.has_credentials() {
        return Ok(());
    }

    bail!(indoc! {r#"
        No upstream credentials configured. The gateway requires an access token to call the Responses API.

        Example configuration:

          [upstream]
          access_token = "<oauth access token>"
          account_id = "<account id>"

        Or point at an auth file written by the login flow:

          [upstream]
          auth_file = "/home/user/.codex/auth.json"
    "#});
}
