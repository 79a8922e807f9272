//! Upstream Responses API client.
//!
//! One POST per turn, always consumed as SSE. The adapter owns the two
//! narrow retries the upstream's quirks demand: stripping `store` when the
//! upstream calls it unsupported, and reverting auto-injected web search
//! when the tool set is rejected. Nothing else is retried.

pub mod payload;

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use config::UpstreamConfig;

use crate::canonical::ToolDef;
use crate::error::{GatewayError, GatewayResult};
use crate::models::ModelEntry;
use crate::sse::{EventStream, events_from_bytes};

/// Correlation headers the upstream is known to set.
const REQUEST_ID_HEADERS: &[&str] = &["x-request-id", "openai-request-id", "cf-ray"];

/// The upstream HTTP client.
pub struct UpstreamClient {
    client: reqwest::Client,
    base_url: String,
    access_token: SecretString,
    account_id: Option<String>,
}

/// What the adapter may fall back to when the first attempt is rejected.
pub struct RetryContext {
    /// Tool set before web-search injection; `None` when nothing was
    /// injected and a tools rejection is therefore final.
    pub base_tools: Option<Vec<ToolDef>>,
}

impl UpstreamClient {
    /// Build a client from configuration, resolving credentials.
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let (access_token, account_id) = config.resolve_credentials()?;

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token,
            account_id,
        })
    }

    /// POST a payload to `/responses` and return the event stream,
    /// applying the adapter-level retry policy. The two retries are at
    /// most once combined.
    pub async fn responses_stream(
        &self,
        mut payload: Value,
        session_id: &str,
        retry: RetryContext,
    ) -> GatewayResult<EventStream> {
        let mut retried = false;

        loop {
            let response = self.send(&payload, session_id).await?;
            let status = response.status();

            if status.is_success() {
                return Ok(events_from_bytes(response.bytes_stream()));
            }

            let request_id = request_id_from(response.headers());
            let body = response.text().await.unwrap_or_default();
            let message = error_message_from(&body);

            if !retried {
                if looks_like_store_rejection(&message) {
                    log::debug!("Upstream rejected the store parameter; retrying without it");
                    if let Some(obj) = payload.as_object_mut() {
                        obj.remove("store");
                    }
                    retried = true;
                    continue;
                }

                if let Some(base_tools) = retry.base_tools.as_ref()
                    && looks_like_tools_rejection(&message)
                {
                    log::debug!("Upstream rejected the injected web_search tool; retrying with the client's tools");

                    if let Some(obj) = payload.as_object_mut() {
                        if base_tools.is_empty() {
                            obj.remove("tools");
                        } else {
                            obj.insert("tools".to_string(), serde_json::json!(base_tools));
                        }
                    }

                    retried = true;
                    continue;
                }
            }

            return Err(match status.as_u16() {
                401 => GatewayError::AuthenticationFailed(message),
                code => GatewayError::UpstreamRejection {
                    status: code,
                    message,
                    request_id,
                },
            });
        }
    }

    /// Fetch the upstream model list, best effort. Returns the models and
    /// the response ETag when present.
    pub async fn list_models(&self) -> anyhow::Result<(Vec<ModelEntry>, Option<String>)> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token.expose_secret()))
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("model list request failed with status {}", response.status());
        }

        let etag = response
            .headers()
            .get("etag")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let body: Value = response.json().await?;

        let raw_models = body
            .get("models")
            .or_else(|| body.get("data"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let models = raw_models
            .iter()
            .filter_map(|raw| {
                let slug = raw
                    .get("slug")
                    .or_else(|| raw.get("id"))
                    .and_then(Value::as_str)?
                    .to_string();

                Some(ModelEntry {
                    slug,
                    owned_by: raw
                        .get("owned_by")
                        .and_then(Value::as_str)
                        .unwrap_or("openai")
                        .to_string(),
                })
            })
            .collect();

        Ok((models, etag))
    }

    async fn send(&self, payload: &Value, session_id: &str) -> GatewayResult<reqwest::Response> {
        let mut request = self
            .client
            .post(format!("{}/responses", self.base_url))
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token.expose_secret()))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "text/event-stream")
            .header("OpenAI-Beta", "responses=experimental")
            .header("session_id", session_id);

        if let Some(account_id) = &self.account_id {
            request = request.header("chatgpt-account-id", account_id);
        }

        request
            .json(payload)
            .send()
            .await
            .map_err(|e| GatewayError::ConnectionError(format!("failed to reach upstream: {e}")))
    }
}

fn request_id_from(headers: &reqwest::header::HeaderMap) -> Option<String> {
    REQUEST_ID_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Pull a human-readable message out of an upstream error body.
fn error_message_from(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    parsed
        .as_ref()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|error| error.get("message"))
                .or_else(|| value.get("detail"))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

fn looks_like_store_rejection(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("store") && (lower.contains("unsupported") || lower.contains("not supported"))
}

fn looks_like_tools_rejection(message: &str) -> bool {
    message.to_ascii_lowercase().contains("tool")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_parses_nested_and_flat_shapes() {
        assert_eq!(
            error_message_from(r#"{"error": {"message": "store is unsupported"}}"#),
            "store is unsupported"
        );
        assert_eq!(error_message_from(r#"{"detail": "bad tools"}"#), "bad tools");
        assert_eq!(error_message_from("plain text"), "plain text");
    }

    #[test]
    fn store_rejection_detection() {
        assert!(looks_like_store_rejection("The store parameter is unsupported"));
        assert!(looks_like_store_rejection("store is not supported for this account"));
        assert!(!looks_like_store_rejection("stored procedures are great"));
        assert!(!looks_like_store_rejection("tools are unsupported"));
    }

    #[test]
    fn tools_rejection_detection() {
        assert!(looks_like_tools_rejection("Unknown tool type web_search"));
        assert!(!looks_like_tools_rejection("quota exceeded"));
    }
}
