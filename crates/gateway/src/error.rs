use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Gateway errors with appropriate HTTP status codes.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed body: not JSON, or over the size limit.
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    /// Body parsed but carries no usable input for the route.
    #[error("{0}")]
    InvalidRequest(String),

    /// Normalized model is not in a populated registry.
    #[error("Model '{requested}' not found. Available models: {}", available.join(", "))]
    UnknownModel {
        requested: String,
        available: Vec<String>,
    },

    /// A `previous_response_id` the store no longer knows.
    #[error("unknown or expired previous_response_id: {id}{}", format_unresolved(unresolved))]
    UnknownPreviousResponse { id: String, unresolved: Vec<String> },

    /// A `function_call_output` without a matching call anywhere.
    #[error(
        "invalid tool state: function_call_output references call_id with no matching function_call: {}; send previous_response_id so the call can be restored",
        call_ids.join(", ")
    )]
    InvalidToolState { call_ids: Vec<String> },

    /// Upstream rejected our credentials.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Network failure talking to the upstream.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Upstream returned an HTTP error with a readable message.
    #[error("Upstream returned HTTP {status}: {message}{}", format_request_id(request_id))]
    UpstreamRejection {
        status: u16,
        message: String,
        request_id: Option<String>,
    },

    /// The upstream stream emitted `response.failed` or ended empty.
    #[error("Upstream stream failed: {0}")]
    UpstreamStreamFailure(String),

    /// Internal error. `Some` messages came from outside and can be
    /// shown; `None` must not leak details.
    #[error("Internal server error")]
    Internal(Option<String>),
}

fn format_unresolved(unresolved: &[String]) -> String {
    if unresolved.is_empty() {
        String::new()
    } else {
        format!(" (unresolved call ids: {})", unresolved.join(", "))
    }
}

fn format_request_id(request_id: &Option<String>) -> String {
    match request_id {
        Some(id) => format!(" (request id: {id})"),
        None => String::new(),
    }
}

impl GatewayError {
    /// The HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidBody(_)
            | Self::InvalidRequest(_)
            | Self::UnknownModel { .. }
            | Self::UnknownPreviousResponse { .. }
            | Self::InvalidToolState { .. } => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::ConnectionError(_) | Self::UpstreamStreamFailure(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamRejection { status, .. } => match *status {
                400 => StatusCode::BAD_REQUEST,
                401 => StatusCode::UNAUTHORIZED,
                403 => StatusCode::FORBIDDEN,
                404 => StatusCode::NOT_FOUND,
                429 => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The error type string for OpenAI-shaped responses.
    pub fn error_type(&self) -> &str {
        match self {
            Self::InvalidBody(_)
            | Self::InvalidRequest(_)
            | Self::UnknownModel { .. }
            | Self::UnknownPreviousResponse { .. }
            | Self::InvalidToolState { .. } => "invalid_request_error",
            Self::AuthenticationFailed(_) => "authentication_error",
            Self::ConnectionError(_) | Self::UpstreamRejection { .. } | Self::UpstreamStreamFailure(_) => "api_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(Some(message)) => message.clone(),
            Self::Internal(None) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Error response format compatible with the OpenAI API.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    code: u16,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = ErrorResponse {
            error: ErrorDetails {
                message: self.client_message(),
                r#type: self.error_type().to_string(),
                code: status.as_u16(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Anthropic-shaped error response wrapper.
pub struct AnthropicError(pub GatewayError);

impl IntoResponse for AnthropicError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();

        let body = serde_json::json!({
            "type": "error",
            "error": {
                "type": anthropic_error_type(&self.0),
                "message": self.0.client_message(),
            }
        });

        (status, Json(body)).into_response()
    }
}

fn anthropic_error_type(error: &GatewayError) -> &'static str {
    match error.status_code() {
        StatusCode::BAD_REQUEST => "invalid_request_error",
        StatusCode::UNAUTHORIZED => "authentication_error",
        StatusCode::FORBIDDEN => "permission_error",
        StatusCode::NOT_FOUND => "not_found_error",
        StatusCode::TOO_MANY_REQUESTS => "rate_limit_error",
        _ => "api_error",
    }
}

pub type AnthropicResult<T> = std::result::Result<T, AnthropicError>;

impl From<GatewayError> for AnthropicError {
    fn from(error: GatewayError) -> Self {
        Self(error)
    }
}

/// Ollama-shaped error response wrapper.
pub struct OllamaError(pub GatewayError);

impl IntoResponse for OllamaError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = serde_json::json!({"error": self.0.client_message()});

        (status, Json(body)).into_response()
    }
}

pub type OllamaResult<T> = std::result::Result<T, OllamaError>;

impl From<GatewayError> for OllamaError {
    fn from(error: GatewayError) -> Self {
        Self(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_previous_response_lists_unresolved_calls() {
        let error = GatewayError::UnknownPreviousResponse {
            id: "gone".to_string(),
            unresolved: vec!["x".to_string()],
        };

        insta::assert_snapshot!(
            error.to_string(),
            @"unknown or expired previous_response_id: gone (unresolved call ids: x)"
        );
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upstream_rejection_carries_the_request_id() {
        let error = GatewayError::UpstreamRejection {
            status: 429,
            message: "slow down".to_string(),
            request_id: Some("req_42".to_string()),
        };

        insta::assert_snapshot!(
            error.to_string(),
            @"Upstream returned HTTP 429: slow down (request id: req_42)"
        );
        assert_eq!(error.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        assert_eq!(GatewayError::Internal(None).client_message(), "Internal server error");
        assert_eq!(
            GatewayError::Internal(Some("upstream said so".to_string())).client_message(),
            "upstream said so"
        );
    }
}
