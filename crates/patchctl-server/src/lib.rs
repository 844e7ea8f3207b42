//! HTTP + WebSocket control surface for a live patch workspace.

use std::path::Path;

use tokio::sync::RwLock;

use patchctl_core::workspace::Workspace;
use patchctl_engine::checkpoint::CheckpointStore;

pub mod dispatch;
pub mod handlers;
pub mod protocol;
pub mod router;
pub mod websocket;

pub use protocol::{CommandRequest, ErrorBody, ResponseEnvelope, PROTOCOL_VERSION};

/// Shared state behind every connection: the workspace under a single
/// write lock, the on-disk checkpoint store, and the optional auth token.
pub struct ServerState {
    pub workspace: RwLock<Workspace>,
    pub checkpoints: CheckpointStore,
    pub auth_token: Option<String>,
}

impl ServerState {
    pub fn new(workspace: Workspace, state_dir: &Path, auth_token: Option<String>) -> Self {
        ServerState {
            workspace: RwLock::new(workspace),
            checkpoints: CheckpointStore::new(state_dir),
            auth_token,
        }
    }
}

/// Bind configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// The server instance; owns the state until `start` hands it to axum.
pub struct PatchServer {
    state: std::sync::Arc<ServerState>,
    config: ServerConfig,
}

impl PatchServer {
    pub fn new(state: ServerState, config: ServerConfig) -> Self {
        PatchServer {
            state: std::sync::Arc::new(state),
            config,
        }
    }

    /// Handle on the shared state, e.g. for background tasks.
    pub fn state(&self) -> std::sync::Arc<ServerState> {
        std::sync::Arc::clone(&self.state)
    }

    /// Bind and serve until the process is stopped.
    pub async fn start(self) -> anyhow::Result<()> {
        let app = router::create_router(self.state);
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("patchctl listening on {}", addr);
        axum::serve(listener, app).await?;
        Ok(())
    }
}
