//! WebSocket command transport.
//!
//! Each text frame carries one JSON command; each command produces exactly
//! one response envelope on the same connection, so callers can correlate
//! by `request_id` without any stream framing of their own.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use patchctl_core::error::PatchError;

use crate::ServerState;
use crate::dispatch::dispatch;
use crate::protocol::{CommandRequest, ResponseEnvelope};

/// Handle WebSocket upgrade requests
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle an individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    info!("new control connection established");

    let (mut sender, mut receiver) = socket.split();

    while let Some(Ok(msg)) = receiver.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Ping/pong are handled by axum; other frame types are ignored.
            _ => continue,
        };
        debug!("received command frame: {}", text);

        let envelope = match serde_json::from_str::<CommandRequest>(&text) {
            Ok(request) => dispatch(&state, request).await,
            Err(err) => ResponseEnvelope::failed(
                None,
                &PatchError::Validation(format!("malformed command frame: {err}")),
            ),
        };

        let json = match serde_json::to_string(&envelope) {
            Ok(json) => json,
            Err(err) => {
                warn!("failed to serialize response envelope: {}", err);
                continue;
            }
        };
        if sender.send(Message::Text(json)).await.is_err() {
            warn!("control connection dropped mid-response");
            break;
        }
    }

    info!("control connection closed");
}
