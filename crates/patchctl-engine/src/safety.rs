//! Static signal-safety analysis over the signal-carrying subset of a
//! canvas: feedback-cycle detection with the delay-tap exception rule,
//! missing-limiter detection, and gain/feedback coefficient checks.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use patchctl_core::canvas::Canvas;

/// Kinds that bound their output and satisfy the limiter check.
pub const LIMITER_KINDS: &[&str] = &[
    "clip~",
    "tanh~",
    "saturate~",
    "limiter~",
    "limi~",
    "omx.peaklim~",
    "omx.comp~",
];

const AUDIO_OUT: &str = "dac~";
const TAP_IN: &str = "tapin~";
const TAP_OUT: &str = "tapout~";
const GAIN_KIND: &str = "*~";
const COMB_KIND: &str = "comb~";
/// Position of the feedback coefficient among comb~'s textual tokens
/// (maxdelay, delay, feedback, feedforward, gain).
const COMB_FEEDBACK_TOKEN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningKind {
    FeedbackLoop,
    NoLimiter,
    HighGain,
    UnsafeFeedback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyWarning {
    #[serde(rename = "type")]
    pub kind: WarningKind,
    pub message: String,
    /// Full cycle membership, for feedback warnings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objects: Option<Vec<String>>,
    /// Offending node, for per-node warnings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub safe: bool,
    pub warnings: Vec<SafetyWarning>,
    pub signal_objects_count: usize,
    pub signal_connections_count: usize,
}

/// Analyze the active canvas. Read-only apart from assigning identifiers
/// to signal nodes the analysis must reference.
pub fn check_signal_safety(canvas: &mut Canvas) -> SafetyReport {
    canvas.ensure_ids();

    // Signal nodes and the signal-to-signal edges between them.
    let mut kinds: HashMap<String, String> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for node in &canvas.nodes {
        if let (true, Some(id)) = (node.is_signal(), node.id.clone()) {
            kinds.insert(id.clone(), node.kind.clone());
            order.push(id);
        }
    }
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let mut signal_connections = 0usize;
    let mut feeds_audio_out = false;
    for conn in &canvas.connections {
        if kinds.contains_key(&conn.source.id) && kinds.contains_key(&conn.destination.id) {
            signal_connections += 1;
            if kinds.get(&conn.destination.id).map(String::as_str) == Some(AUDIO_OUT) {
                feeds_audio_out = true;
            }
            adjacency
                .entry(conn.source.id.clone())
                .or_default()
                .push(conn.destination.id.clone());
        }
    }

    let mut warnings = Vec::new();
    detect_cycles(&order, &adjacency, &kinds, &mut warnings);

    if feeds_audio_out {
        let has_limiter = kinds.values().any(|k| LIMITER_KINDS.contains(&k.as_str()));
        if !has_limiter {
            warnings.push(SafetyWarning {
                kind: WarningKind::NoLimiter,
                message: format!(
                    "no limiter before {AUDIO_OUT}; consider adding clip~ or tanh~"
                ),
                objects: None,
                object: None,
                value: None,
            });
        }
    }

    check_coefficients(canvas, &mut warnings);

    SafetyReport {
        safe: warnings.is_empty(),
        warnings,
        signal_objects_count: kinds.len(),
        signal_connections_count: signal_connections,
    }
}

/// Depth-first traversal with a recursion stack. A cycle is accepted only
/// when it passes through a delay-tap pair: some `tapin~` whose immediate
/// predecessor in the cycle is `tapout~`.
fn detect_cycles(
    order: &[String],
    adjacency: &HashMap<String, Vec<String>>,
    kinds: &HashMap<String, String>,
    warnings: &mut Vec<SafetyWarning>,
) {
    let mut visited: HashSet<String> = HashSet::new();
    let mut reported: HashSet<Vec<String>> = HashSet::new();

    for start in order {
        if visited.contains(start) {
            continue;
        }
        let mut path: Vec<String> = Vec::new();
        let mut on_stack: HashSet<String> = HashSet::new();
        dfs(
            start, adjacency, kinds, &mut visited, &mut on_stack, &mut path, &mut reported,
            warnings,
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn dfs(
    node: &str,
    adjacency: &HashMap<String, Vec<String>>,
    kinds: &HashMap<String, String>,
    visited: &mut HashSet<String>,
    on_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
    reported: &mut HashSet<Vec<String>>,
    warnings: &mut Vec<SafetyWarning>,
) {
    visited.insert(node.to_string());
    on_stack.insert(node.to_string());
    path.push(node.to_string());

    if let Some(neighbors) = adjacency.get(node) {
        for next in neighbors {
            if on_stack.contains(next) {
                // Extract the cycle segment from the current stack.
                if let Some(start) = path.iter().position(|n| n == next) {
                    let cycle: Vec<String> = path[start..].to_vec();
                    if !cycle_is_safe(&cycle, kinds) {
                        let mut key = cycle.clone();
                        key.sort();
                        if reported.insert(key) {
                            warnings.push(SafetyWarning {
                                kind: WarningKind::FeedbackLoop,
                                message: "potentially dangerous feedback loop detected"
                                    .to_string(),
                                objects: Some(cycle),
                                object: None,
                                value: None,
                            });
                        }
                    }
                }
            } else if !visited.contains(next) {
                dfs(
                    next, adjacency, kinds, visited, on_stack, path, reported, warnings,
                );
            }
        }
    }

    on_stack.remove(node);
    path.pop();
}

/// Feedback is safe only through a matched delay-line pair with no
/// intermediate nodes between tap-out and tap-in.
fn cycle_is_safe(cycle: &[String], kinds: &HashMap<String, String>) -> bool {
    cycle.iter().enumerate().any(|(i, id)| {
        if kinds.get(id).map(String::as_str) != Some(TAP_IN) {
            return false;
        }
        let prev = if i == 0 { cycle.len() - 1 } else { i - 1 };
        kinds.get(&cycle[prev]).map(String::as_str) == Some(TAP_OUT)
    })
}

/// Parse gain/feedback coefficients from the authoritative textual form and
/// flag unbounded-growth conditions.
fn check_coefficients(canvas: &Canvas, warnings: &mut Vec<SafetyWarning>) {
    for node in &canvas.nodes {
        let Some(id) = node.id.as_deref() else { continue };
        let text = node.display_text();
        let tokens: Vec<&str> = text.split_whitespace().collect();
        match node.kind.as_str() {
            GAIN_KIND => {
                if let Some(gain) = tokens.get(1).and_then(|t| t.parse::<f64>().ok()) {
                    if gain > 1.0 {
                        warnings.push(SafetyWarning {
                            kind: WarningKind::HighGain,
                            message: format!("{GAIN_KIND} with gain > 1.0 may cause clipping"),
                            objects: None,
                            object: Some(id.to_string()),
                            value: Some(gain),
                        });
                    }
                }
            }
            COMB_KIND => {
                if let Some(feedback) = tokens
                    .get(COMB_FEEDBACK_TOKEN)
                    .and_then(|t| t.parse::<f64>().ok())
                {
                    if feedback.abs() >= 1.0 {
                        warnings.push(SafetyWarning {
                            kind: WarningKind::UnsafeFeedback,
                            message: format!(
                                "{COMB_KIND} feedback >= 1.0 will cause runaway gain"
                            ),
                            objects: None,
                            object: Some(id.to_string()),
                            value: Some(feedback),
                        });
                    }
                }
            }
            _ => {}
        }
    }
}
