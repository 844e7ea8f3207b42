//! Integration tests for patchctl
//!
//! These tests drive the full command surface the way a remote client
//! would: JSON in, envelopes out, across several subsystems at once.

use serde_json::{Value, json};

use patchctl_core::Workspace;
use patchctl_server::dispatch::dispatch;
use patchctl_server::{CommandRequest, ResponseEnvelope, ServerState};
use tempfile::TempDir;

fn new_state() -> (TempDir, ServerState) {
    let dir = TempDir::new().unwrap();
    let state = ServerState::new(Workspace::new(), dir.path(), None);
    (dir, state)
}

async fn run(state: &ServerState, action: &str, mut params: Value) -> ResponseEnvelope {
    params
        .as_object_mut()
        .unwrap()
        .insert("action".into(), Value::String(action.into()));
    let request: CommandRequest = serde_json::from_value(params).unwrap();
    dispatch(state, request).await
}

fn ok(envelope: ResponseEnvelope) -> Value {
    assert_eq!(envelope.state, "succeeded", "error: {:?}", envelope.error);
    envelope.results.unwrap()
}

/// Build a small synth voice through the command surface.
async fn build_voice(state: &ServerState) {
    for (varname, obj_type, args, position) in [
        ("osc", "cycle~", json!([440]), [100.0, 50.0]),
        ("env", "*~", json!([0.5]), [100.0, 150.0]),
        ("out", "dac~", json!([]), [100.0, 250.0]),
    ] {
        ok(run(
            state,
            "add_object",
            json!({
                "obj_type": obj_type,
                "args": args,
                "position": position,
                "varname": varname,
            }),
        )
        .await);
    }
    for (src, dst) in [("osc", "env"), ("env", "out")] {
        ok(run(
            state,
            "connect_objects",
            json!({ "src_varname": src, "dst_varname": dst }),
        )
        .await);
    }
}

#[tokio::test]
async fn encapsulate_then_navigate_into_result() {
    let (_dir, state) = new_state();
    build_voice(&state).await;

    let report = ok(run(
        &state,
        "encapsulate",
        json!({
            "varnames": ["osc", "env"],
            "subpatcher_name": "voice",
            "subpatcher_varname": "voice-1",
        }),
    )
    .await);
    assert_eq!(report["subpatcher_varname"], "voice-1");
    assert_eq!(report["objects_encapsulated"], 2);
    assert_eq!(report["outlets_created"], 1);

    // The root now holds the subpatcher wired to dac~.
    let root = ok(run(&state, "get_objects_in_patch", json!({})).await);
    assert_eq!(root["boxes"].as_array().unwrap().len(), 2);
    assert_eq!(root["lines"].as_array().unwrap().len(), 1);

    // Inside: the two originals plus the boundary outlet.
    ok(run(&state, "enter_subpatcher", json!({ "varname": "voice-1" })).await);
    let inner = ok(run(&state, "get_objects_in_patch", json!({})).await);
    let kinds: Vec<&str> = inner["boxes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["kind"].as_str().unwrap())
        .collect();
    assert!(kinds.contains(&"cycle~"));
    assert!(kinds.contains(&"outlet"));
    ok(run(&state, "exit_subpatcher", json!({})).await);
}

#[tokio::test]
async fn snapshot_round_trip_preserves_the_patch() {
    let (_dir, state) = new_state();
    build_voice(&state).await;
    let snapshot = ok(run(&state, "get_objects_in_patch", json!({})).await);

    // Wreck the patch, then restore.
    ok(run(&state, "remove_object", json!({ "varname": "env" })).await);
    let progress = ok(run(
        &state,
        "apply_topology_snapshot",
        json!({ "snapshot": snapshot }),
    )
    .await);
    assert_eq!(progress["done"], true);
    assert_eq!(progress["restored_boxes"], 3);
    assert_eq!(progress["restored_lines"], 2);
    assert_eq!(progress["skipped_boxes"], 0);

    let after = ok(run(&state, "get_objects_in_patch", json!({})).await);
    assert_eq!(after["boxes"].as_array().unwrap().len(), 3);
    assert_eq!(after["lines"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn checkpoint_survives_destructive_edits() {
    let (_dir, state) = new_state();
    build_voice(&state).await;
    let meta = ok(run(&state, "create_checkpoint", json!({ "label": "voice" })).await);
    let id = meta["checkpoint_id"].as_str().unwrap().to_string();

    for varname in ["osc", "env", "out"] {
        ok(run(&state, "remove_object", json!({ "varname": varname })).await);
    }
    let emptied = ok(run(&state, "get_objects_in_patch", json!({})).await);
    assert!(emptied["boxes"].as_array().unwrap().is_empty());

    ok(run(&state, "restore_checkpoint", json!({ "checkpoint_id": id })).await);
    let restored = ok(run(&state, "get_objects_in_patch", json!({})).await);
    assert_eq!(restored["boxes"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn safety_check_flags_the_hot_gain() {
    let (_dir, state) = new_state();
    build_voice(&state).await;
    // Crank the gain past unity; dac~ has no limiter in front of it.
    ok(run(
        &state,
        "recreate_with_args",
        json!({ "varname": "env", "new_args": [3.0] }),
    )
    .await);

    let report = ok(run(&state, "check_signal_safety", json!({})).await);
    assert_eq!(report["safe"], false);
    let types: Vec<&str> = report["warnings"]
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["type"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"HIGH_GAIN"));
    assert!(types.contains(&"NO_LIMITER"));

    // A limiter before the output silences the coverage warning.
    ok(run(
        &state,
        "add_object",
        json!({ "obj_type": "limiter~", "position": [100.0, 200.0], "varname": "lim" }),
    )
    .await);
    ok(run(
        &state,
        "disconnect_objects",
        json!({ "src_varname": "env", "dst_varname": "out" }),
    )
    .await);
    for (src, dst) in [("env", "lim"), ("lim", "out")] {
        ok(run(
            &state,
            "connect_objects",
            json!({ "src_varname": src, "dst_varname": dst }),
        )
        .await);
    }
    let report = ok(run(&state, "check_signal_safety", json!({})).await);
    let types: Vec<&str> = report["warnings"]
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["type"].as_str().unwrap())
        .collect();
    assert!(!types.contains(&"NO_LIMITER"));
    assert!(
        types.contains(&"HIGH_GAIN"),
        "gain warning is independent of coverage"
    );
}

#[tokio::test]
async fn errors_carry_machine_readable_codes() {
    let (_dir, state) = new_state();
    let envelope = run(&state, "remove_object", json!({ "varname": "nope" })).await;
    assert_eq!(envelope.state, "failed");
    let error = envelope.error.unwrap();
    assert_eq!(error.code, "OBJECT_NOT_FOUND");
    assert!(error.hint.is_some());
    assert!(error.recoverable);
    assert_eq!(envelope.protocol_version, "2.0");
}
