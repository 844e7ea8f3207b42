//! Unit tests for the engines

use std::collections::BTreeMap;

use serde_json::json;

use patchctl_core::canvas::Canvas;
use patchctl_core::error::PatchError;
use patchctl_core::model::{Arg, Rect};
use patchctl_core::workspace::Workspace;

use crate::checkpoint::CheckpointStore;
use crate::encapsulate::encapsulate;
use crate::safety::{WarningKind, check_signal_safety};
use crate::snapshot::{
    BoxRecord, LineRecord, RestoreState, Snapshot, capture, restore_all, restore_step,
};

fn rect(x: f64, y: f64) -> Rect {
    Rect::new(x, y, 60.0, 22.0)
}

fn add(canvas: &mut Canvas, kind: &str, id: &str, x: f64, y: f64) {
    canvas
        .add_node(kind, vec![], rect(x, y), Some(id.into()))
        .unwrap();
}

/// Five nodes, subset {b, c, d}: two external inbound connections hitting
/// distinct (destination, inlet) pairs and one external outbound.
fn boundary_fixture() -> Workspace {
    let mut ws = Workspace::new();
    let canvas = ws.active_mut().unwrap();
    add(canvas, "phasor~", "a", 10.0, 10.0);
    add(canvas, "cycle~", "b", 10.0, 60.0);
    add(canvas, "*~", "c", 10.0, 110.0);
    add(canvas, "tanh~", "d", 10.0, 160.0);
    add(canvas, "dac~", "e", 10.0, 210.0);
    canvas.connect("a", 0, "b", 0).unwrap();
    canvas.connect("a", 0, "c", 1).unwrap();
    canvas.connect("b", 0, "c", 0).unwrap();
    canvas.connect("c", 0, "d", 0).unwrap();
    canvas.connect("d", 0, "e", 0).unwrap();
    ws
}

// ── Encapsulation ───────────────────────────────────────

#[test]
fn encapsulate_preserves_boundary_wiring() {
    let mut ws = boundary_fixture();
    let ids = vec!["b".to_string(), "c".to_string(), "d".to_string()];
    let report = encapsulate(&mut ws, &ids, "inner", "sub").unwrap();

    assert_eq!(report.objects_encapsulated, 3);
    assert_eq!(report.inlets_created, 2);
    assert_eq!(report.outlets_created, 1);
    // 2 internal + 2 inbound + 1 outbound
    assert_eq!(report.connections_rewired, 5);

    let parent = ws.active().unwrap();
    assert_eq!(parent.node_count(), 3);
    assert!(parent.node("sub").is_some());
    // External paths are reconnected through the sub-canvas node's ports.
    assert!(parent.connections.iter().any(|c| {
        c.source.id == "a" && c.destination.id == "sub"
    }));
    assert!(parent.connections.iter().any(|c| {
        c.source.id == "sub" && c.destination.id == "e"
    }));

    let child = parent.node("sub").unwrap().subcanvas.as_deref().unwrap();
    assert_eq!(child.node_count(), 6); // 2 inlets + 3 copies + 1 outlet
    assert_eq!(child.connection_count(), 5);
    let b_inner = report.remap.get("b").unwrap();
    let c_inner = report.remap.get("c").unwrap();
    assert!(child.connections.iter().any(|c| {
        c.source.id == *b_inner && c.destination.id == *c_inner
    }));
    assert!(child.connections.iter().any(|c| {
        c.source.id == "_inlet_0" && c.destination.id == *b_inner
    }));
}

#[test]
fn encapsulate_translates_positions_and_keeps_text() {
    let mut ws = Workspace::new();
    {
        let canvas = ws.active_mut().unwrap();
        canvas
            .add_node("cycle~", vec![Arg::Int(440)], rect(200.0, 300.0), Some("osc".into()))
            .unwrap();
    }
    let report = encapsulate(&mut ws, &["osc".to_string()], "inner", "sub").unwrap();

    let parent = ws.active().unwrap();
    let sub = parent.node("sub").unwrap();
    // Sub-canvas node sits at the subset's bounding-box origin.
    assert_eq!((sub.rect.x, sub.rect.y), (200.0, 300.0));

    let child = sub.subcanvas.as_deref().unwrap();
    let inner = child.node(report.remap.get("osc").unwrap()).unwrap();
    assert_eq!(inner.display_text(), "cycle~ 440");
    // No boundary ports, so only the fixed margin applies.
    assert_eq!((inner.rect.x, inner.rect.y), (50.0, 50.0));
    assert_eq!((inner.rect.w, inner.rect.h), (60.0, 22.0));
}

#[test]
fn encapsulate_missing_id_is_atomic() {
    let mut ws = boundary_fixture();
    let before_nodes = ws.active().unwrap().node_count();
    let before_conns = ws.active().unwrap().connection_count();

    let ids = vec!["b".to_string(), "ghost".to_string()];
    let err = encapsulate(&mut ws, &ids, "inner", "sub").unwrap_err();
    assert!(matches!(err, PatchError::NotFound(_)));

    let canvas = ws.active().unwrap();
    assert_eq!(canvas.node_count(), before_nodes);
    assert_eq!(canvas.connection_count(), before_conns);
    assert!(canvas.node("sub").is_none());
}

#[test]
fn encapsulate_rejects_empty_set_and_nested_scope() {
    let mut ws = boundary_fixture();
    assert!(matches!(
        encapsulate(&mut ws, &[], "inner", "sub"),
        Err(PatchError::Validation(_))
    ));

    // Nest once, then try again from inside.
    let ids = vec!["b".to_string()];
    encapsulate(&mut ws, &ids, "inner", "sub").unwrap();
    ws.enter("sub").unwrap();
    let err = encapsulate(&mut ws, &["a".to_string()], "deeper", "sub2").unwrap_err();
    assert!(matches!(err, PatchError::PreconditionFailed(_)));
}

// ── Snapshot ────────────────────────────────────────────

#[test]
fn snapshot_round_trip() {
    let mut source = Canvas::new();
    add(&mut source, "cycle~", "osc", 10.0, 10.0);
    add(&mut source, "*~", "vca", 10.0, 60.0);
    add(&mut source, "dac~", "out", 10.0, 110.0);
    source.connect("osc", 0, "vca", 0).unwrap();
    source.connect("vca", 0, "out", 0).unwrap();

    let snapshot = capture(&mut source);
    assert_eq!(snapshot.boxes.len(), 3);
    assert_eq!(snapshot.lines.len(), 2);

    let mut target = Canvas::new();
    let progress = restore_all(&mut target, &snapshot).unwrap();
    assert!(progress.done);
    assert_eq!(progress.counters.restored_boxes, 3);
    assert_eq!(progress.counters.restored_lines, 2);
    assert_eq!(progress.counters.skipped_boxes, 0);
    assert_eq!(progress.counters.skipped_lines, 0);
    assert_eq!(target.node_count(), 3);
    assert_eq!(target.connection_count(), 2);
    assert_eq!(kind_multiset(&target), kind_multiset(&source));
}

fn kind_multiset(canvas: &Canvas) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for node in &canvas.nodes {
        *counts.entry(node.kind.clone()).or_insert(0) += 1;
    }
    counts
}

#[test]
fn chunked_restore_matches_single_pass() {
    let mut source = Canvas::new();
    for (kind, id, y) in [
        ("phasor~", "p", 10.0),
        ("cycle~", "c", 60.0),
        ("*~", "m", 110.0),
        ("dac~", "d", 160.0),
    ] {
        add(&mut source, kind, id, 10.0, y);
    }
    source.connect("p", 0, "m", 0).unwrap();
    source.connect("c", 0, "m", 1).unwrap();
    source.connect("m", 0, "d", 0).unwrap();
    let snapshot = capture(&mut source);

    let mut whole = Canvas::new();
    let single = restore_all(&mut whole, &snapshot).unwrap();

    let mut stepped = Canvas::new();
    let mut state = RestoreState::default();
    let mut passes = 0;
    loop {
        let (next, progress) = restore_step(&mut stepped, &snapshot, state, Some(1));
        passes += 1;
        assert!(passes <= snapshot.boxes.len() + snapshot.lines.len() + 1);
        if progress.done {
            assert_eq!(progress.counters, single.counters);
            break;
        }
        state = next;
    }

    assert_eq!(kind_multiset(&stepped), kind_multiset(&whole));
    assert_eq!(stepped.connection_count(), whole.connection_count());
}

#[test]
fn restore_clears_existing_contents_once() {
    let snapshot = Snapshot {
        boxes: vec![BoxRecord {
            kind: "cycle~".into(),
            id: Some("osc".into()),
            rect: Some(rect(0.0, 0.0)),
            num_inlets: 2,
            num_outlets: 1,
            text: Some("cycle~ 440".into()),
            stable_id: None,
            attributes: serde_json::Map::new(),
        }],
        lines: vec![],
    };

    let mut canvas = Canvas::new();
    add(&mut canvas, "noise~", "old", 0.0, 0.0);
    add(&mut canvas, "js", "patchctl-bridge", 0.0, 50.0);

    let progress = restore_all(&mut canvas, &snapshot).unwrap();
    assert!(progress.done);
    // Old user node gone, bookkeeping node spared, one box restored.
    assert!(canvas.node("old").is_none());
    assert!(canvas.node("patchctl-bridge").is_some());
    assert_eq!(canvas.node("osc").unwrap().display_text(), "cycle~ 440");
    assert_eq!(canvas.node("osc").unwrap().num_inlets, 2);
}

#[test]
fn restore_skips_bad_records_and_continues() {
    let snapshot = Snapshot {
        boxes: vec![
            BoxRecord {
                kind: "".into(), // unconstructible
                id: Some("bad".into()),
                rect: None,
                num_inlets: 0,
                num_outlets: 0,
                text: None,
                stable_id: None,
                attributes: serde_json::Map::new(),
            },
            BoxRecord {
                kind: "dac~".into(),
                id: Some("out".into()),
                rect: Some(rect(0.0, 0.0)),
                num_inlets: 2,
                num_outlets: 0,
                text: Some("dac~".into()),
                stable_id: None,
                attributes: serde_json::Map::new(),
            },
        ],
        lines: vec![
            LineRecord {
                source: ("bad".into(), 0),
                destination: ("out".into(), 0),
            },
            LineRecord {
                source: ("missing".into(), 0),
                destination: ("out".into(), 0),
            },
        ],
    };

    let mut canvas = Canvas::new();
    let progress = restore_all(&mut canvas, &snapshot).unwrap();
    assert_eq!(progress.counters.restored_boxes, 1);
    assert_eq!(progress.counters.skipped_boxes, 1);
    assert_eq!(progress.counters.restored_lines, 0);
    assert_eq!(progress.counters.skipped_lines, 2);
    assert_eq!(canvas.node_count(), 1);
}

#[test]
fn restore_remaps_colliding_identifiers() {
    let mk = |id: &str| BoxRecord {
        kind: "cycle~".into(),
        id: Some(id.into()),
        rect: Some(rect(0.0, 0.0)),
        num_inlets: 1,
        num_outlets: 1,
        text: None,
        stable_id: None,
        attributes: serde_json::Map::new(),
    };
    let snapshot = Snapshot {
        boxes: vec![mk("osc"), mk("osc")],
        lines: vec![LineRecord {
            source: ("osc".into(), 0),
            destination: ("osc".into(), 0),
        }],
    };

    let mut canvas = Canvas::new();
    let progress = restore_all(&mut canvas, &snapshot).unwrap();
    // Both boxes restored; the second got a fresh identifier.
    assert_eq!(progress.counters.restored_boxes, 2);
    assert_eq!(canvas.node_count(), 2);
    assert_eq!(progress.counters.restored_lines, 1);
}

#[test]
fn restore_never_applies_structural_attributes() {
    let mut attributes = serde_json::Map::new();
    attributes.insert("kind".into(), json!("noise~"));
    attributes.insert("rect".into(), json!([0, 0, 9, 9]));
    attributes.insert("bgcolor".into(), json!([0.2, 0.2, 0.2, 1.0]));
    let snapshot = Snapshot {
        boxes: vec![BoxRecord {
            kind: "cycle~".into(),
            id: Some("osc".into()),
            rect: Some(rect(0.0, 0.0)),
            num_inlets: 1,
            num_outlets: 1,
            text: None,
            stable_id: None,
            attributes,
        }],
        lines: vec![],
    };

    let mut canvas = Canvas::new();
    let progress = restore_all(&mut canvas, &snapshot).unwrap();
    assert_eq!(progress.counters.applied_attributes, 1);
    assert_eq!(progress.counters.skipped_attributes, 2);
    let node = canvas.node("osc").unwrap();
    assert_eq!(node.kind, "cycle~");
    assert!(node.attributes.contains_key("bgcolor"));
    assert!(!node.attributes.contains_key("kind"));
}

#[test]
fn capture_excludes_bookkeeping_nodes() {
    let mut canvas = Canvas::new();
    add(&mut canvas, "js", "patchctl-bridge", 0.0, 0.0);
    add(&mut canvas, "cycle~", "osc", 0.0, 50.0);
    canvas.connect("osc", 0, "patchctl-bridge", 0).unwrap();

    let snapshot = capture(&mut canvas);
    assert_eq!(snapshot.boxes.len(), 1);
    assert_eq!(snapshot.lines.len(), 0);
}

// ── Signal safety ───────────────────────────────────────

fn cycle_canvas(with_taps: bool) -> Canvas {
    let mut canvas = Canvas::new();
    if with_taps {
        add(&mut canvas, "tapout~", "x", 0.0, 0.0);
        add(&mut canvas, "tapin~", "y", 0.0, 50.0);
        add(&mut canvas, "*~", "z", 0.0, 100.0);
        // z -> x -> y -> z: tapin~'s predecessor in the cycle is tapout~.
        canvas.connect("z", 0, "x", 0).unwrap();
        canvas.connect("x", 0, "y", 0).unwrap();
        canvas.connect("y", 0, "z", 0).unwrap();
    } else {
        add(&mut canvas, "cycle~", "x", 0.0, 0.0);
        add(&mut canvas, "*~", "y", 0.0, 50.0);
        add(&mut canvas, "+~", "z", 0.0, 100.0);
        canvas.connect("x", 0, "y", 0).unwrap();
        canvas.connect("y", 0, "z", 0).unwrap();
        canvas.connect("z", 0, "x", 0).unwrap();
    }
    canvas
}

#[test]
fn cycle_without_tap_pair_warns_once() {
    let mut canvas = cycle_canvas(false);
    let report = check_signal_safety(&mut canvas);
    assert!(!report.safe);
    let loops: Vec<_> = report
        .warnings
        .iter()
        .filter(|w| w.kind == WarningKind::FeedbackLoop)
        .collect();
    assert_eq!(loops.len(), 1);
    let mut objects = loops[0].objects.clone().unwrap();
    objects.sort();
    assert_eq!(objects, vec!["x", "y", "z"]);
    assert_eq!(report.signal_objects_count, 3);
    assert_eq!(report.signal_connections_count, 3);
}

#[test]
fn delay_tap_pair_cycle_is_accepted() {
    let mut canvas = cycle_canvas(true);
    let report = check_signal_safety(&mut canvas);
    assert!(
        report
            .warnings
            .iter()
            .all(|w| w.kind != WarningKind::FeedbackLoop)
    );
}

#[test]
fn missing_limiter_detected_and_silenced() {
    let mut canvas = Canvas::new();
    add(&mut canvas, "cycle~", "osc", 0.0, 0.0);
    add(&mut canvas, "dac~", "out", 0.0, 50.0);
    canvas.connect("osc", 0, "out", 0).unwrap();

    let report = check_signal_safety(&mut canvas);
    let count = report
        .warnings
        .iter()
        .filter(|w| w.kind == WarningKind::NoLimiter)
        .count();
    assert_eq!(count, 1);

    // A limiter-kind node anywhere in the canvas silences the warning.
    add(&mut canvas, "clip~", "lim", 0.0, 100.0);
    let report = check_signal_safety(&mut canvas);
    assert!(report.warnings.iter().all(|w| w.kind != WarningKind::NoLimiter));
    assert!(report.safe);
}

#[test]
fn gain_and_feedback_coefficients_checked() {
    let mut canvas = Canvas::new();
    canvas
        .add_node("*~", vec![Arg::Float(2.0)], rect(0.0, 0.0), Some("hot".into()))
        .unwrap();
    canvas
        .add_node("*~", vec![Arg::Float(0.5)], rect(0.0, 50.0), Some("cool".into()))
        .unwrap();
    canvas
        .add_node(
            "comb~",
            vec![
                Arg::Int(1000),
                Arg::Int(50),
                Arg::Float(1.2),
                Arg::Float(0.5),
            ],
            rect(0.0, 100.0),
            Some("cmb".into()),
        )
        .unwrap();

    let report = check_signal_safety(&mut canvas);
    let high: Vec<_> = report
        .warnings
        .iter()
        .filter(|w| w.kind == WarningKind::HighGain)
        .collect();
    assert_eq!(high.len(), 1);
    assert_eq!(high[0].object.as_deref(), Some("hot"));
    assert_eq!(high[0].value, Some(2.0));

    let feedback: Vec<_> = report
        .warnings
        .iter()
        .filter(|w| w.kind == WarningKind::UnsafeFeedback)
        .collect();
    assert_eq!(feedback.len(), 1);
    assert_eq!(feedback[0].object.as_deref(), Some("cmb"));
    assert_eq!(feedback[0].value, Some(1.2));
}

#[test]
fn analyzer_ignores_message_rate_nodes() {
    let mut canvas = Canvas::new();
    add(&mut canvas, "metro", "m", 0.0, 0.0);
    add(&mut canvas, "counter", "c", 0.0, 50.0);
    canvas.connect("m", 0, "c", 0).unwrap();
    canvas.connect("c", 0, "m", 0).unwrap(); // message-rate cycle is fine

    let report = check_signal_safety(&mut canvas);
    assert!(report.safe);
    assert_eq!(report.signal_objects_count, 0);
    assert_eq!(report.signal_connections_count, 0);
}

// ── Checkpoints ─────────────────────────────────────────

#[test]
fn checkpoint_save_list_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());

    let mut canvas = Canvas::new();
    add(&mut canvas, "cycle~", "osc", 0.0, 0.0);
    add(&mut canvas, "dac~", "out", 0.0, 50.0);
    canvas.connect("osc", 0, "out", 0).unwrap();
    let snapshot = capture(&mut canvas);

    let meta = store.save(&snapshot, "before rewiring").unwrap();
    assert_eq!(meta.box_count, 2);
    assert_eq!(meta.line_count, 1);

    let listed = store.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], meta);

    let loaded = store.load(&meta.checkpoint_id).unwrap();
    assert_eq!(loaded, snapshot);

    assert!(store.load("ckpt-missing").is_err());
}
