// SPDX-FileCopyrightText: 2026 Chatbridge Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use chatbridge_bridge::Bridge;
use chatbridge_config::model::GatewayConfig;

use crate::error::GatewayError;
use crate::handlers;
use crate::media::MediaClient;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub bridge: Arc<Bridge>,
    /// `None` when uploads are disabled.
    pub media: Option<Arc<MediaClient>>,
    /// Process start time for uptime calculation.
    pub start_time: Instant,
}

impl GatewayState {
    pub fn new(bridge: Arc<Bridge>, media: Option<MediaClient>) -> Self {
        Self {
            bridge,
            media: media.map(Arc::new),
            start_time: Instant::now(),
        }
    }
}

/// Gateway server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl From<&GatewayConfig> for ServerConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

/// Build the router:
/// - POST /send_message
/// - GET /get_message
/// - POST /cleanup_session
/// - POST /upload_image
/// - GET /health
/// - GET /sessions
pub fn router(state: GatewayState, max_upload_bytes: usize) -> Router {
    let upload_routes = Router::new()
        .route("/upload_image", post(handlers::upload_image))
        .layer(DefaultBodyLimit::max(max_upload_bytes));

    Router::new()
        .route("/send_message", post(handlers::send_message))
        .route("/get_message", get(handlers::get_message))
        .route("/cleanup_session", post(handlers::cleanup_session))
        .route("/health", get(handlers::get_health))
        .route("/sessions", get(handlers::get_sessions))
        .merge(upload_routes)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the gateway until `shutdown` is cancelled.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    shutdown: CancellationToken,
) -> Result<(), GatewayError> {
    let app = router(state, config.max_upload_bytes);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| GatewayError::Bind {
            addr: addr.clone(),
            source,
        })?;

    tracing::info!("Gateway server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(GatewayError::Serve)?;

    tracing::info!("Gateway server stopped");
    Ok(())
}
