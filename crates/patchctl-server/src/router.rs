//! Axum router setup for the patchctl server

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use crate::{
    ServerState,
    handlers::{get_workspace, health_check, post_command},
    websocket::ws_handler,
};

/// Create the axum router with all routes
pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        // WebSocket endpoint: one command per text frame
        .route("/ws", get(ws_handler))
        // REST API endpoints
        .route("/api/command", post(post_command))
        .route("/api/workspace", get(get_workspace))
        .route("/api/health", get(health_check))
        // Add CORS support
        .layer(CorsLayer::permissive())
        // Add state
        .with_state(state)
}
