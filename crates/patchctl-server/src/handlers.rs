//! REST API handlers for the patchctl server

use std::sync::Arc;

use axum::{
    extract::State,
    response::{IntoResponse, Json},
};
use serde::Serialize;

use patchctl_engine::snapshot::capture;

use crate::dispatch::dispatch;
use crate::protocol::{CommandRequest, ResponseEnvelope};
use crate::ServerState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Run one command delivered over plain HTTP.
pub async fn post_command(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<CommandRequest>,
) -> Json<ResponseEnvelope> {
    Json(dispatch(&state, request).await)
}

/// Snapshot of the currently active canvas.
pub async fn get_workspace(
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    let mut ws = state.workspace.write().await;
    let snapshot = match ws.active_mut() {
        Ok(canvas) => capture(canvas),
        Err(_) => Default::default(),
    };
    let context = ws.context();
    Json(serde_json::json!({
        "context": context,
        "snapshot": snapshot,
    }))
}

pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
