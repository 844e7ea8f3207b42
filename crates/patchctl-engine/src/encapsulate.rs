//! Encapsulation: extract a node subset into a new nested sub-canvas while
//! preserving all external wiring through synthesized boundary ports.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use patchctl_core::canvas::Canvas;
use patchctl_core::error::PatchError;
use patchctl_core::model::{Arg, PortRef, Rect, parse_text};
use patchctl_core::workspace::Workspace;

/// Horizontal/vertical margin applied inside the new sub-canvas.
const INNER_MARGIN: f64 = 50.0;
/// Horizontal spacing between boundary ports.
const PORT_SPACING: f64 = 80.0;
/// Y position of the inlet row.
const INLET_Y: f64 = 30.0;

/// What the caller gets back for verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncapsulateReport {
    pub subpatcher_varname: String,
    pub objects_encapsulated: usize,
    pub inlets_created: usize,
    pub outlets_created: usize,
    pub connections_rewired: usize,
    /// Old identifier to new internal identifier.
    pub remap: HashMap<String, String>,
}

/// One synthesized input boundary port: a distinct (destination, inlet)
/// pair inside the subset, with every external source that fed it.
struct InletBinding {
    target: PortRef,
    sources: Vec<PortRef>,
}

/// One synthesized output boundary port, symmetric to [`InletBinding`].
struct OutletBinding {
    origin: PortRef,
    sinks: Vec<PortRef>,
}

/// Move the nodes named by `ids` into a new sub-canvas node `sub_id`.
///
/// The operation is all-or-nothing: every identifier is resolved before any
/// mutation, the child canvas is assembled fully in memory, and the
/// originals are removed only after the parent has been rewired. A failure
/// while rewiring the parent rolls the sub-canvas node back out.
pub fn encapsulate(
    ws: &mut Workspace,
    ids: &[String],
    name: &str,
    sub_id: &str,
) -> Result<EncapsulateReport, PatchError> {
    if !ws.is_root() {
        return Err(PatchError::PreconditionFailed(
            "encapsulate only operates on the root canvas".into(),
        ));
    }
    if ids.is_empty() {
        return Err(PatchError::Validation("no objects to encapsulate".into()));
    }
    let canvas = ws.active_mut()?;
    canvas.ensure_ids();

    let subset: HashSet<&str> = ids.iter().map(String::as_str).collect();
    if subset.len() != ids.len() {
        return Err(PatchError::Validation(
            "duplicate identifiers in subset".into(),
        ));
    }
    for id in ids {
        if canvas.node(id).is_none() {
            return Err(PatchError::NotFound(id.clone()));
        }
    }
    if canvas.node(sub_id).is_some() {
        return Err(PatchError::Validation(format!(
            "identifier already in use: {sub_id}"
        )));
    }

    // Partition every connection touching the subset.
    let mut internal = Vec::new();
    let mut inbound = Vec::new();
    let mut outbound = Vec::new();
    for conn in &canvas.connections {
        let src_in = subset.contains(conn.source.id.as_str());
        let dst_in = subset.contains(conn.destination.id.as_str());
        match (src_in, dst_in) {
            (true, true) => internal.push(conn.clone()),
            (false, true) => inbound.push(conn.clone()),
            (true, false) => outbound.push(conn.clone()),
            (false, false) => {}
        }
    }

    // Group boundary crossings into ports, numbered in first-seen order.
    let mut inlets: Vec<InletBinding> = Vec::new();
    for conn in &inbound {
        match inlets.iter_mut().find(|b| b.target == conn.destination) {
            Some(binding) => binding.sources.push(conn.source.clone()),
            None => inlets.push(InletBinding {
                target: conn.destination.clone(),
                sources: vec![conn.source.clone()],
            }),
        }
    }
    let mut outlets: Vec<OutletBinding> = Vec::new();
    for conn in &outbound {
        match outlets.iter_mut().find(|b| b.origin == conn.source) {
            Some(binding) => binding.sinks.push(conn.destination.clone()),
            None => outlets.push(OutletBinding {
                origin: conn.source.clone(),
                sinks: vec![conn.destination.clone()],
            }),
        }
    }

    let bounds = ids
        .iter()
        .filter_map(|id| canvas.node(id).map(|n| n.rect))
        .fold(None::<Rect>, |acc, r| {
            Some(match acc {
                None => r,
                Some(a) => Rect::from_corners(
                    a.x.min(r.x),
                    a.y.min(r.y),
                    a.right().max(r.right()),
                    a.bottom().max(r.bottom()),
                ),
            })
        })
        .ok_or_else(|| PatchError::Internal("empty bounding box".into()))?;

    // Assemble the child canvas entirely in memory. Nothing here can leave
    // partial state in the parent.
    let mut child = Canvas::new();
    let mut remap: HashMap<String, String> = HashMap::new();

    let offset_y = INNER_MARGIN + if inlets.is_empty() { 0.0 } else { 40.0 };
    for (i, _) in inlets.iter().enumerate() {
        let x = INNER_MARGIN + i as f64 * PORT_SPACING;
        child.add_node(
            "inlet",
            vec![],
            Rect::new(x, INLET_Y, 30.0, 22.0),
            Some(format!("_inlet_{i}")),
        )?;
    }

    for id in ids {
        let node = canvas
            .node(id)
            .ok_or_else(|| PatchError::NotFound(id.clone()))?;
        // Recover kind and args from the authoritative text, not cached
        // args, so symbolic operator renderings survive the copy.
        let (kind, args) = parse_text(&node.display_text())
            .unwrap_or_else(|| (node.kind.clone(), Vec::new()));
        let rect = node
            .rect
            .at(node.rect.x - bounds.x + INNER_MARGIN, node.rect.y - bounds.y + offset_y);
        let new_id = format!("enc-{id}");
        child.add_node(&kind, args, rect, Some(new_id.clone()))?;
        remap.insert(id.clone(), new_id);
    }

    let outlet_y = bounds.h + offset_y + INNER_MARGIN;
    for (i, _) in outlets.iter().enumerate() {
        let x = INNER_MARGIN + i as f64 * PORT_SPACING;
        child.add_node(
            "outlet",
            vec![],
            Rect::new(x, outlet_y, 30.0, 22.0),
            Some(format!("_outlet_{i}")),
        )?;
    }

    let lookup = |remap: &HashMap<String, String>, id: &str| -> Result<String, PatchError> {
        remap
            .get(id)
            .cloned()
            .ok_or_else(|| PatchError::Internal(format!("remap missing {id}")))
    };

    for conn in &internal {
        child.connect(
            &lookup(&remap, &conn.source.id)?,
            conn.source.port,
            &lookup(&remap, &conn.destination.id)?,
            conn.destination.port,
        )?;
    }
    for (i, binding) in inlets.iter().enumerate() {
        child.connect(
            &format!("_inlet_{i}"),
            0,
            &lookup(&remap, &binding.target.id)?,
            binding.target.port,
        )?;
    }
    for (i, binding) in outlets.iter().enumerate() {
        child.connect(
            &lookup(&remap, &binding.origin.id)?,
            binding.origin.port,
            &format!("_outlet_{i}"),
            0,
        )?;
    }

    // Mutation of the parent starts here.
    let sub_rect = Rect::new(bounds.x, bounds.y, 120.0, 22.0);
    canvas.add_node(
        "patcher",
        vec![Arg::Symbol(name.to_string())],
        sub_rect,
        Some(sub_id.to_string()),
    )?;
    if let Some(sub) = canvas.node_mut(sub_id) {
        sub.num_inlets = inlets.len() as u32;
        sub.num_outlets = outlets.len() as u32;
        sub.subcanvas = Some(Box::new(child));
    }

    let rewire = (|| -> Result<usize, PatchError> {
        let mut rewired = internal.len();
        for (i, binding) in inlets.iter().enumerate() {
            for src in &binding.sources {
                canvas.connect(&src.id, src.port, sub_id, i as u32)?;
                rewired += 1;
            }
        }
        for (i, binding) in outlets.iter().enumerate() {
            for sink in &binding.sinks {
                canvas.connect(sub_id, i as u32, &sink.id, sink.port)?;
                rewired += 1;
            }
        }
        Ok(rewired)
    })();

    let connections_rewired = match rewire {
        Ok(count) => count,
        Err(err) => {
            // Roll the sub-canvas node back out; its connections go with it.
            let _ = canvas.remove_node(sub_id);
            tracing::warn!(error = %err, "encapsulate rolled back");
            return Err(PatchError::Internal(format!(
                "encapsulation failed and was rolled back: {err}"
            )));
        }
    };

    // Only now are the originals removed, which also drops the old
    // boundary-crossing connections.
    for id in ids {
        canvas.remove_node(id)?;
    }

    tracing::info!(
        sub_id,
        objects = ids.len(),
        inlets = inlets.len(),
        outlets = outlets.len(),
        "encapsulated subset into sub-canvas"
    );

    Ok(EncapsulateReport {
        subpatcher_varname: sub_id.to_string(),
        objects_encapsulated: ids.len(),
        inlets_created: inlets.len(),
        outlets_created: outlets.len(),
        connections_rewired,
        remap,
    })
}
