//! CLI command implementations

use std::path::PathBuf;

use anyhow::Context;

use patchctl_core::{Canvas, Workspace};
use patchctl_engine::safety::check_signal_safety;
use patchctl_engine::snapshot::{Snapshot, restore_all};
use patchctl_server::{PatchServer, ServerConfig, ServerState};

pub async fn serve(
    host: String,
    port: u16,
    state_dir: PathBuf,
    token: Option<String>,
) -> anyhow::Result<()> {
    tracing::info!("Starting patchctl server on {}:{}", host, port);
    if token.is_some() {
        tracing::info!("Authentication token required for all commands");
    }

    let state = ServerState::new(Workspace::new(), &state_dir, token);
    let config = ServerConfig { host, port };
    let server = PatchServer::new(state, config);
    server.start().await
}

/// Offline signal-safety check: restore a snapshot file into a scratch
/// canvas and print the analyzer's findings.
pub fn check(path: PathBuf) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    let snapshot: Snapshot = serde_json::from_str(&json)
        .with_context(|| format!("parsing snapshot {}", path.display()))?;

    let mut canvas = Canvas::new();
    let progress = restore_all(&mut canvas, &snapshot)?;
    tracing::info!(
        boxes = progress.counters.restored_boxes,
        lines = progress.counters.restored_lines,
        "snapshot loaded"
    );

    let report = check_signal_safety(&mut canvas);
    println!(
        "{} signal objects, {} signal connections",
        report.signal_objects_count, report.signal_connections_count
    );
    if report.safe {
        println!("no signal-safety warnings");
    } else {
        for warning in &report.warnings {
            println!("{}", serde_json::to_string(warning)?);
        }
    }
    Ok(())
}
