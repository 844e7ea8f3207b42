//! Sanitization of secondary attribute values.
//!
//! Attribute bags are open-ended and may hold values that only make sense
//! inside the host's native execution context. Reads are therefore
//! fallible: a value nested past the depth bound is coerced to its string
//! rendering, and anything non-finite is dropped. Failures never propagate
//! as hard errors.

use serde_json::Value;

/// Values nested deeper than this are flattened to strings.
pub const MAX_ATTR_DEPTH: usize = 4;

/// Attribute keys that shadow structural node fields. Writes through the
/// attribute path must never touch these, or snapshot attribute data could
/// corrupt node identity.
pub const STRUCTURAL_KEYS: &[&str] = &[
    "id",
    "varname",
    "kind",
    "text",
    "rect",
    "position",
    "size",
    "num_inlets",
    "num_outlets",
];

pub fn is_structural_key(key: &str) -> bool {
    STRUCTURAL_KEYS.contains(&key)
}

/// Produce a depth-bounded copy of `value`, or `None` when the value is
/// unrepresentable and has to be dropped.
pub fn sanitize(value: &Value) -> Option<Value> {
    sanitize_at(value, 0)
}

fn sanitize_at(value: &Value, depth: usize) -> Option<Value> {
    if depth >= MAX_ATTR_DEPTH {
        return match value {
            Value::Object(_) | Value::Array(_) => Some(Value::String(value.to_string())),
            other => sanitize_leaf(other),
        };
    }
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                if let Some(clean) = sanitize_at(v, depth + 1) {
                    out.insert(k.clone(), clean);
                }
            }
            Some(Value::Object(out))
        }
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter_map(|v| sanitize_at(v, depth + 1))
                .collect(),
        )),
        other => sanitize_leaf(other),
    }
}

fn sanitize_leaf(value: &Value) -> Option<Value> {
    match value {
        // Numbers that serde_json could not represent never appear here;
        // this guards values constructed programmatically.
        Value::Number(n) if n.as_f64().is_none_or(|f| !f.is_finite()) => None,
        other => Some(other.clone()),
    }
}
