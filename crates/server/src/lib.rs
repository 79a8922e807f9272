//! Relay server library.
//!
//! Provides a reusable serve function for the binary and for tests.

#![deny(missing_docs)]

mod auth;
mod logger;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::Json,
    routing::get,
};
use config::Config;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::auth::AuthLayer;

/// JSON bodies larger than this are rejected.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Configuration for serving the gateway.
pub struct ServeConfig {
    /// The socket address the server will bind to.
    pub listen_address: SocketAddr,
    /// The deserialized TOML configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// Log filter string (e.g. "info" or "gateway=debug").
    pub log_filter: String,
    /// The version string to log on startup.
    pub version: String,
    /// Optional oneshot sender for the bound address (useful with port 0).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Starts and runs the gateway server with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    logger::init(&log_filter);

    log::info!("Relay {version}");

    let server = gateway::GatewayServer::build(&config)?;
    Arc::clone(&server).spawn_registry_refresh(shutdown_signal.clone());

    let protected = gateway::router(Arc::clone(&server)).layer(
        tower::ServiceBuilder::new()
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(AuthLayer::new(config.server.api_key.clone())),
    );

    let mut app = Router::new()
        .merge(protected)
        .route("/", get(root).options(preflight));

    if config.server.health.enabled {
        app = app.route(&config.server.health.path, get(health));
        log::info!("Health endpoint: http://{listen_address}{}", config.server.health.path);
    }

    // CORS sits outermost so preflight requests short-circuit before auth.
    let app = app.layer(CorsLayer::very_permissive());

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    if let Some(sender) = bound_addr_sender
        && sender.send(listener.local_addr()?).is_err()
    {
        log::warn!("Bound address receiver dropped before startup completed");
    }

    log::info!("OpenAI endpoints: http://{listen_address}/v1");
    log::info!("Anthropic endpoint: http://{listen_address}/v1/messages");
    log::info!("Ollama endpoints: http://{listen_address}/api");

    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result.map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("Received shutdown signal, shutting down gracefully...");
        }
    }

    server.state.close();

    Ok(())
}

/// Liveness probe at the root.
async fn root() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// Permissive preflight answer.
async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Liveness probe.
async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}
