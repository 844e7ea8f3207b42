//! Maps flat JSON actions onto engine and model calls.
//!
//! Every command flows through [`dispatch`]: one write lock on the
//! workspace for the duration of the call, so requests are serialized and
//! no mutation ever interleaves.

use serde_json::{Value, json};

use patchctl_core::attrs::{is_structural_key, sanitize};
use patchctl_core::canvas::Canvas;
use patchctl_core::error::PatchError;
use patchctl_core::model::{Arg, Rect};
use patchctl_engine::encapsulate::encapsulate;
use patchctl_engine::safety::check_signal_safety;
use patchctl_engine::snapshot::{
    RestoreState, Snapshot, capture, restore_all, restore_step,
};

use crate::ServerState;
use crate::protocol::{CommandRequest, ResponseEnvelope};

/// Run one command to completion and wrap the outcome in an envelope.
pub async fn dispatch(state: &ServerState, req: CommandRequest) -> ResponseEnvelope {
    let request_id = req.request_id.clone();
    if let Err(err) = authorize(state, &req) {
        return ResponseEnvelope::failed(request_id, &err);
    }
    match perform(state, &req).await {
        Ok(results) => ResponseEnvelope::succeeded(request_id, results),
        Err(err) => {
            tracing::debug!(action = %req.action, error = %err, "command failed");
            ResponseEnvelope::failed(request_id, &err)
        }
    }
}

fn authorize(state: &ServerState, req: &CommandRequest) -> Result<(), PatchError> {
    let Some(expected) = &state.auth_token else {
        return Ok(());
    };
    match &req.auth_token {
        Some(token) if token == expected => Ok(()),
        _ => Err(PatchError::Unauthorized(
            "authentication token missing or invalid".into(),
        )),
    }
}

async fn perform(state: &ServerState, req: &CommandRequest) -> Result<Value, PatchError> {
    let mut ws = state.workspace.write().await;
    let ws = &mut *ws;

    match req.action.as_str() {
        "add_object" => {
            let kind = req.str_field("obj_type")?;
            let (x, y) = req.position_field("position")?;
            let args = parse_args(req.params.get("args"))?;
            let id = req.opt_str_field("varname");
            let assigned = ws.active_mut()?.add_node(
                &kind,
                args,
                Rect::new(x, y, 60.0, 22.0),
                id,
            )?;
            Ok(json!({ "varname": assigned, "obj_type": kind }))
        }
        "remove_object" => {
            let id = req.str_field("varname")?;
            ws.active_mut()?.remove_node(&id)?;
            Ok(json!({ "removed": id }))
        }
        "connect_objects" => {
            let (src, outlet, dst, inlet) = wire_fields(req)?;
            ws.active_mut()?.connect(&src, outlet, &dst, inlet)?;
            Ok(json!({ "connected": true }))
        }
        "disconnect_objects" => {
            let (src, outlet, dst, inlet) = wire_fields(req)?;
            ws.active_mut()?.disconnect(&src, outlet, &dst, inlet)?;
            Ok(json!({ "disconnected": true }))
        }
        "move_object" => {
            let id = req.str_field("varname")?;
            let x = req.f64_field("x")?;
            let y = req.f64_field("y")?;
            let canvas = ws.active_mut()?;
            let node = canvas
                .node_mut(&id)
                .ok_or_else(|| PatchError::NotFound(id.clone()))?;
            let old = (node.rect.x, node.rect.y);
            node.rect = node.rect.at(x, y);
            Ok(json!({
                "varname": id,
                "old_position": [old.0, old.1],
                "new_position": [x, y],
            }))
        }
        "recreate_with_args" => {
            let id = req.str_field("varname")?;
            let args = parse_args(req.params.get("new_args"))?;
            let (inputs, outputs) = ws.active_mut()?.set_args(&id, args)?;
            Ok(json!({
                "varname": id,
                "restored_inputs": inputs,
                "restored_outputs": outputs,
            }))
        }
        "set_object_attribute" => {
            let id = req.str_field("varname")?;
            let name = req.str_field("attr_name")?;
            let value = req.params.get("attr_value").cloned().ok_or_else(|| {
                PatchError::Validation("missing attr_value for set_object_attribute".into())
            })?;
            if is_structural_key(&name) {
                return Err(PatchError::Validation(format!(
                    "attribute {name} shadows a structural field"
                )));
            }
            let canvas = ws.active_mut()?;
            let node = canvas
                .node_mut(&id)
                .ok_or_else(|| PatchError::NotFound(id.clone()))?;
            let applied = match sanitize(&value) {
                Some(clean) => {
                    node.attributes.insert(name.clone(), clean);
                    true
                }
                None => false,
            };
            Ok(json!({ "varname": id, "attr_name": name, "applied": applied }))
        }
        "get_object_attributes" => {
            let id = req.str_field("varname")?;
            let canvas = ws.active()?;
            let node = canvas
                .node(&id)
                .ok_or_else(|| PatchError::NotFound(id.clone()))?;
            let mut attrs = serde_json::Map::new();
            for (key, value) in &node.attributes {
                if let Some(clean) = sanitize(value) {
                    attrs.insert(key.clone(), clean);
                }
            }
            Ok(Value::Object(attrs))
        }
        "get_object_connections" => {
            let id = req.str_field("varname")?;
            let canvas = ws.active()?;
            canvas
                .node(&id)
                .ok_or_else(|| PatchError::NotFound(id.clone()))?;
            let inputs: Vec<Value> = canvas
                .inputs_of(&id)
                .into_iter()
                .map(|c| {
                    json!({
                        "src_varname": c.source.id,
                        "src_outlet": c.source.port,
                        "dst_inlet": c.destination.port,
                    })
                })
                .collect();
            let outputs: Vec<Value> = canvas
                .outputs_of(&id)
                .into_iter()
                .map(|c| {
                    json!({
                        "src_outlet": c.source.port,
                        "dst_varname": c.destination.id,
                        "dst_inlet": c.destination.port,
                    })
                })
                .collect();
            Ok(json!({ "varname": id, "inputs": inputs, "outputs": outputs }))
        }
        "get_objects_in_patch" => {
            let snapshot = capture(ws.active_mut()?);
            to_results(&snapshot)
        }
        "get_avoid_rect_position" => {
            let bounds = ws.active()?.bounding_box();
            Ok(match bounds {
                Some(r) => json!([r.x, r.y, r.right(), r.bottom()]),
                None => Value::Null,
            })
        }
        "create_subpatcher" => {
            let (x, y) = req.position_field("position")?;
            let name = req
                .opt_str_field("name")
                .unwrap_or_else(|| "subpatch".to_string());
            let id = req.opt_str_field("varname");
            let canvas = ws.active_mut()?;
            let assigned = canvas.add_node(
                "patcher",
                vec![Arg::Symbol(name.clone())],
                Rect::new(x, y, 120.0, 22.0),
                id,
            )?;
            if let Some(node) = canvas.node_mut(&assigned) {
                node.subcanvas = Some(Box::new(Canvas::new()));
            }
            Ok(json!({ "varname": assigned, "name": name }))
        }
        "enter_subpatcher" => {
            let id = req.str_field("varname")?;
            let ctx = ws.enter(&id)?;
            to_results(&ctx)
        }
        "exit_subpatcher" => {
            let ctx = ws.exit()?;
            to_results(&ctx)
        }
        "get_patcher_context" => to_results(&ws.context()),
        "encapsulate" => {
            let ids: Vec<String> = req.typed_field("varnames")?;
            let name = req.str_field("subpatcher_name")?;
            let sub_id = req.str_field("subpatcher_varname")?;
            let report = encapsulate(ws, &ids, &name, &sub_id)?;
            to_results(&report)
        }
        "apply_topology_snapshot" => {
            let snapshot: Snapshot = req.typed_field("snapshot")?;
            let progress = restore_all(ws.active_mut()?, &snapshot)?;
            to_results(&progress)
        }
        "apply_topology_snapshot_progressive" => {
            let snapshot: Snapshot = req.typed_field("snapshot")?;
            let prev: RestoreState = req.opt_typed_field("state")?.unwrap_or_default();
            let chunk = req.opt_u64_field("chunk_size").map(|c| c as usize);
            let (next, progress) = restore_step(ws.active_mut()?, &snapshot, prev, chunk);
            let mut results = to_results(&progress.counters)?;
            results["done"] = Value::Bool(progress.done);
            results["progress"] = json!({
                "phase": progress.phase,
                "processed": progress.processed,
                "total": progress.total,
                "remaining": progress.remaining,
            });
            results["state"] = if progress.done {
                Value::Null
            } else {
                to_results(&next)?
            };
            Ok(results)
        }
        "check_signal_safety" => {
            let report = check_signal_safety(ws.active_mut()?);
            to_results(&report)
        }
        "create_checkpoint" => {
            let label = req.opt_str_field("label").unwrap_or_default();
            let snapshot = capture(ws.active_mut()?);
            let meta = state
                .checkpoints
                .save(&snapshot, &label)
                .map_err(|e| PatchError::Internal(e.to_string()))?;
            to_results(&meta)
        }
        "list_checkpoints" => {
            let metas = state
                .checkpoints
                .list()
                .map_err(|e| PatchError::Internal(e.to_string()))?;
            to_results(&metas)
        }
        "restore_checkpoint" => {
            let id = req.str_field("checkpoint_id")?;
            let snapshot = state
                .checkpoints
                .load(&id)
                .map_err(|e| PatchError::NotFound(format!("checkpoint {id}: {e}")))?;
            let progress = restore_all(ws.active_mut()?, &snapshot)?;
            let mut results = to_results(&progress)?;
            results["checkpoint_id"] = Value::String(id);
            Ok(results)
        }
        other => Err(PatchError::UnknownAction(other.to_string())),
    }
}

fn wire_fields(req: &CommandRequest) -> Result<(String, u32, String, u32), PatchError> {
    let src = req.str_field("src_varname")?;
    let dst = req.str_field("dst_varname")?;
    let outlet = req.opt_u64_field("outlet_idx").unwrap_or(0) as u32;
    let inlet = req.opt_u64_field("inlet_idx").unwrap_or(0) as u32;
    Ok((src, outlet, dst, inlet))
}

/// Convert a JSON `args` array into typed construction arguments.
fn parse_args(value: Option<&Value>) -> Result<Vec<Arg>, PatchError> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items.clone(),
        // A bare scalar is accepted as a single argument.
        other => vec![other.clone()],
    };
    items
        .iter()
        .map(|item| match item {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Arg::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Arg::Float(f))
                } else {
                    Err(PatchError::Validation("unrepresentable number in args".into()))
                }
            }
            Value::String(s) => Ok(Arg::Symbol(s.clone())),
            Value::Bool(b) => Ok(Arg::Int(*b as i64)),
            other => Err(PatchError::Validation(format!(
                "unsupported argument: {other}"
            ))),
        })
        .collect()
}

fn to_results<T: serde::Serialize>(value: &T) -> Result<Value, PatchError> {
    serde_json::to_value(value).map_err(|e| PatchError::Internal(e.to_string()))
}
