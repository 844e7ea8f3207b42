//! Canvas serialization and resumable restore.
//!
//! Restore is a three-phase state machine (`boxes` → `lines` → `done`)
//! driven by an explicit, externally round-tripped state value: pure data
//! (phase, cursors, counters, identifier remap) that the caller feeds back
//! in until `done`. Per-record failures are absorbed into skip counters;
//! no single bad record aborts a run.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use patchctl_core::attrs::{is_structural_key, sanitize};
use patchctl_core::canvas::Canvas;
use patchctl_core::error::PatchError;
use patchctl_core::model::{Rect, parse_text};

/// Default per-call record budget.
pub const DEFAULT_CHUNK: usize = 100;
/// Upper bound a caller may request.
pub const MAX_CHUNK: usize = 2000;
/// Hard ceiling on convenience-loop passes, so even malformed input
/// terminates.
pub const MAX_PASSES: usize = 10_000;

/// One serialized node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxRecord {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub num_inlets: u32,
    #[serde(default)]
    pub num_outlets: u32,
    /// Authoritative textual form, preferred over `kind` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Host-assigned stable identifier, an extra remap key when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_id: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// One serialized connection, endpoints as `[identifier, port]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRecord {
    pub source: (String, u32),
    pub destination: (String, u32),
}

/// A canvas-independent description of one canvas's contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Snapshot {
    pub boxes: Vec<BoxRecord>,
    pub lines: Vec<LineRecord>,
}

/// Serialize the canvas, excluding bookkeeping nodes. Missing identifiers
/// are assigned first so every record is addressable.
pub fn capture(canvas: &mut Canvas) -> Snapshot {
    canvas.ensure_ids();
    let mut boxes = Vec::new();
    let mut lines = Vec::new();
    for node in canvas.user_nodes() {
        let mut attributes = serde_json::Map::new();
        for (key, value) in &node.attributes {
            // Unreadable values are dropped, never a hard error.
            if let Some(clean) = sanitize(value) {
                attributes.insert(key.clone(), clean);
            }
        }
        boxes.push(BoxRecord {
            kind: node.kind.clone(),
            id: node.id.clone(),
            rect: Some(node.rect),
            num_inlets: node.num_inlets,
            num_outlets: node.num_outlets,
            text: Some(node.display_text()),
            stable_id: None,
            attributes,
        });
    }
    for conn in &canvas.connections {
        let reserved = |id: &str| {
            canvas.node(id).is_some_and(|n| n.is_reserved())
        };
        if reserved(&conn.source.id) || reserved(&conn.destination.id) {
            continue;
        }
        lines.push(LineRecord {
            source: (conn.source.id.clone(), conn.source.port),
            destination: (conn.destination.id.clone(), conn.destination.port),
        });
    }
    Snapshot { boxes, lines }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    #[default]
    Boxes,
    Lines,
    Done,
}

impl RestorePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestorePhase::Boxes => "boxes",
            RestorePhase::Lines => "lines",
            RestorePhase::Done => "done",
        }
    }
}

/// Counters accumulated across resumed calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RestoreCounters {
    pub restored_boxes: usize,
    pub skipped_boxes: usize,
    pub restored_lines: usize,
    pub skipped_lines: usize,
    pub restored_rects: usize,
    pub applied_attributes: usize,
    pub skipped_attributes: usize,
}

/// The externally persisted restore state. Pure data; the engine is a
/// function `(snapshot, state) -> (state', progress)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RestoreState {
    pub phase: RestorePhase,
    /// Guards the one-time destructive clear against resumed calls.
    pub reset_done: bool,
    pub box_cursor: usize,
    pub line_cursor: usize,
    /// Record identifier (or stable id) to the identifier actually
    /// assigned during this restore.
    pub remap: HashMap<String, String>,
    pub counters: RestoreCounters,
}

/// Progress reported after each step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreProgress {
    pub done: bool,
    pub phase: String,
    pub processed: usize,
    pub total: usize,
    pub remaining: usize,
    #[serde(flatten)]
    pub counters: RestoreCounters,
}

/// Run one resumable restore step against `canvas`, processing at most
/// `chunk_size` records (default 100, capped at 2000).
pub fn restore_step(
    canvas: &mut Canvas,
    snapshot: &Snapshot,
    mut state: RestoreState,
    chunk_size: Option<usize>,
) -> (RestoreState, RestoreProgress) {
    let mut budget = chunk_size.unwrap_or(DEFAULT_CHUNK).clamp(1, MAX_CHUNK);

    if !state.reset_done {
        let cleared = canvas.clear_user_nodes();
        state.reset_done = true;
        tracing::debug!(cleared, "cleared canvas for snapshot restore");
    }

    while state.phase == RestorePhase::Boxes && budget > 0 {
        if state.box_cursor >= snapshot.boxes.len() {
            state.phase = RestorePhase::Lines;
            break;
        }
        restore_box(canvas, &snapshot.boxes[state.box_cursor], &mut state);
        state.box_cursor += 1;
        budget -= 1;
        if state.box_cursor >= snapshot.boxes.len() {
            state.phase = RestorePhase::Lines;
        }
    }

    while state.phase == RestorePhase::Lines && budget > 0 {
        if state.line_cursor >= snapshot.lines.len() {
            state.phase = RestorePhase::Done;
            break;
        }
        restore_line(canvas, &snapshot.lines[state.line_cursor], &mut state);
        state.line_cursor += 1;
        budget -= 1;
        if state.line_cursor >= snapshot.lines.len() {
            state.phase = RestorePhase::Done;
        }
    }

    // Zero-record snapshots complete immediately.
    if state.box_cursor >= snapshot.boxes.len() && state.line_cursor >= snapshot.lines.len() {
        state.phase = RestorePhase::Done;
    }

    let total = snapshot.boxes.len() + snapshot.lines.len();
    let processed = state.box_cursor + state.line_cursor;
    let progress = RestoreProgress {
        done: state.phase == RestorePhase::Done,
        phase: state.phase.as_str().to_string(),
        processed,
        total,
        remaining: total.saturating_sub(processed),
        counters: state.counters,
    };
    (state, progress)
}

fn restore_box(canvas: &mut Canvas, record: &BoxRecord, state: &mut RestoreState) {
    // Prefer the authoritative text; it preserves symbolic kind renderings.
    let parsed = record
        .text
        .as_deref()
        .and_then(parse_text)
        .or_else(|| parse_text(&record.kind));
    let Some((kind, args)) = parsed else {
        state.counters.skipped_boxes += 1;
        tracing::debug!(?record.id, "skipped box record with no usable kind");
        return;
    };

    let rect = record.rect.unwrap_or_default();
    // A colliding (or absent) record identifier gets a fresh one; the remap
    // keeps line records resolvable either way.
    let desired = record
        .id
        .clone()
        .filter(|id| canvas.node(id).is_none());
    let assigned = match canvas.add_node(&kind, args, rect, desired) {
        Ok(id) => id,
        Err(err) => {
            state.counters.skipped_boxes += 1;
            tracing::debug!(?record.id, error = %err, "skipped unrestorable box record");
            return;
        }
    };

    if let Some(node) = canvas.node_mut(&assigned) {
        node.num_inlets = record.num_inlets.max(1);
        node.num_outlets = record.num_outlets.max(1);
        if record.rect.is_some() {
            state.counters.restored_rects += 1;
        }
        for (key, value) in &record.attributes {
            // Snapshot attribute data must never overwrite node identity.
            if is_structural_key(key) {
                state.counters.skipped_attributes += 1;
                continue;
            }
            match sanitize(value) {
                Some(clean) => {
                    node.attributes.insert(key.clone(), clean);
                    state.counters.applied_attributes += 1;
                }
                None => state.counters.skipped_attributes += 1,
            }
        }
    }

    if let Some(original) = &record.id {
        state.remap.insert(original.clone(), assigned.clone());
    }
    if let Some(stable) = &record.stable_id {
        state.remap.insert(stable.clone(), assigned.clone());
    }
    state.counters.restored_boxes += 1;
}

fn restore_line(canvas: &mut Canvas, record: &LineRecord, state: &mut RestoreState) {
    let resolve = |id: &str| -> Option<String> {
        if let Some(mapped) = state.remap.get(id) {
            return Some(mapped.clone());
        }
        canvas.node(id).and_then(|n| n.id.clone())
    };
    let (Some(src), Some(dst)) = (resolve(&record.source.0), resolve(&record.destination.0))
    else {
        state.counters.skipped_lines += 1;
        tracing::debug!(?record.source, ?record.destination, "skipped unresolvable line");
        return;
    };
    match canvas.connect(&src, record.source.1, &dst, record.destination.1) {
        Ok(()) => state.counters.restored_lines += 1,
        Err(_) => state.counters.skipped_lines += 1,
    }
}

/// All-in-one restore: large chunks, hard pass ceiling.
pub fn restore_all(
    canvas: &mut Canvas,
    snapshot: &Snapshot,
) -> Result<RestoreProgress, PatchError> {
    let mut state = RestoreState::default();
    for _ in 0..MAX_PASSES {
        let (next, progress) = restore_step(canvas, snapshot, state, Some(MAX_CHUNK));
        if progress.done {
            tracing::info!(
                boxes = progress.counters.restored_boxes,
                lines = progress.counters.restored_lines,
                "snapshot restore complete"
            );
            return Ok(progress);
        }
        state = next;
    }
    Err(PatchError::Internal(
        "restore did not complete within the pass ceiling".into(),
    ))
}
