//! Bearer-token authentication for the gateway routes.
//!
//! When a token is configured, every `/v1/*` and `/api/*` request must
//! present it. Comparison goes through SHA-256 digests so its timing does
//! not depend on how much of the token matched. Rejections answer in the
//! dialect of the route family that was called.

use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use http::{Method, Request, Response, StatusCode, header};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use sha2::{Digest, Sha256};
use tower::Layer;

#[derive(Clone)]
pub(crate) struct AuthLayer(Arc<AuthLayerInner>);

struct AuthLayerInner {
    token_digest: Option<[u8; 32]>,
}

impl AuthLayer {
    pub(crate) fn new(api_key: Option<SecretString>) -> Self {
        let token_digest = api_key.map(|key| digest(key.expose_secret().as_bytes()));

        Self(Arc::new(AuthLayerInner { token_digest }))
    }
}

impl<Service> Layer<Service> for AuthLayer {
    type Service = AuthService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        AuthService {
            next,
            layer: self.0.clone(),
        }
    }
}

pub(crate) struct AuthService<Service> {
    next: Service,
    layer: Arc<AuthLayerInner>,
}

impl<S: Clone> Clone for AuthService<S> {
    fn clone(&self) -> Self {
        AuthService {
            next: self.next.clone(),
            layer: self.layer.clone(),
        }
    }
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for AuthService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: Send + 'static,
{
    type Response = Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let layer = self.layer.clone();

        Box::pin(async move {
            let Some(expected) = layer.token_digest else {
                return next.call(req).await;
            };

            // Preflight requests carry no credentials.
            if req.method() == Method::OPTIONS {
                return next.call(req).await;
            }

            if presented_tokens(&req).any(|token| digest(token.as_bytes()) == expected) {
                return next.call(req).await;
            }

            Ok(unauthorized(req.uri().path()))
        })
    }
}

/// Candidate credentials, in the order the dialects present them.
fn presented_tokens<B>(req: &Request<B>) -> impl Iterator<Item = &str> {
    let bearer = |name: header::HeaderName| {
        req.headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
    };

    let api_key = req
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());

    bearer(header::AUTHORIZATION)
        .into_iter()
        .chain(bearer(header::PROXY_AUTHORIZATION))
        .chain(api_key)
}

fn digest(input: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(input);
    hasher.finalize().into()
}

/// A 401 in the dialect of the calling route family.
fn unauthorized(path: &str) -> Response<Body> {
    let body = if path.starts_with("/v1/messages") {
        json!({
            "type": "error",
            "error": {"type": "authentication_error", "message": "invalid bearer token"},
        })
    } else if path.starts_with("/api/") {
        json!({"error": "unauthorized"})
    } else {
        json!({
            "error": {
                "message": "Missing or invalid bearer token",
                "type": "authentication_error",
                "code": 401,
            }
        })
    };

    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::UNAUTHORIZED;
            response
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(path: &str, headers: &[(&str, &str)]) -> Request<()> {
        let mut builder = Request::builder().uri(path);

        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        builder.body(()).unwrap()
    }

    #[test]
    fn accepts_every_credential_header() {
        let req = request("/v1/chat/completions", &[("authorization", "Bearer tok")]);
        assert_eq!(presented_tokens(&req).collect::<Vec<_>>(), vec!["tok"]);

        let req = request("/v1/messages", &[("x-api-key", "tok")]);
        assert_eq!(presented_tokens(&req).collect::<Vec<_>>(), vec!["tok"]);

        let req = request("/v1/messages", &[("proxy-authorization", "Bearer tok2")]);
        assert_eq!(presented_tokens(&req).collect::<Vec<_>>(), vec!["tok2"]);
    }

    #[test]
    fn digests_differ_for_different_tokens() {
        assert_ne!(digest(b"a"), digest(b"b"));
        assert_eq!(digest(b"tok"), digest(b"tok"));
    }

    #[test]
    fn rejections_speak_the_route_dialect() {
        let anthropic = unauthorized("/v1/messages");
        let ollama = unauthorized("/api/chat");
        let openai = unauthorized("/v1/chat/completions");

        assert_eq!(anthropic.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ollama.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(openai.status(), StatusCode::UNAUTHORIZED);
    }
}
