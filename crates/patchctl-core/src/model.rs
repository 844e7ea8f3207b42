//! Core data structures for the patch graph

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::canvas::Canvas;

/// Identifier prefix for internal bookkeeping nodes. Nodes carrying it are
/// excluded from snapshots and survive a destructive restore.
pub const RESERVED_PREFIX: &str = "patchctl-";

/// Axis-aligned bounding rectangle, origin at top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Rect { x, y, w, h }
    }

    /// Build from left/top/right/bottom corner coordinates.
    pub fn from_corners(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Rect {
            x: left,
            y: top,
            w: right - left,
            h: bottom - top,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    /// Same size, moved to a new origin.
    pub fn at(&self, x: f64, y: f64) -> Self {
        Rect { x, y, ..*self }
    }
}

/// A typed construction argument. The int/float distinction is preserved
/// because many node kinds interpret `440` and `440.` differently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arg {
    Int(i64),
    Float(f64),
    Symbol(String),
}

impl Arg {
    /// Parse a single textual token back into a typed argument.
    pub fn parse(token: &str) -> Arg {
        if let Ok(i) = token.parse::<i64>() {
            return Arg::Int(i);
        }
        if token
            .chars()
            .all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+')
            && token.contains('.')
        {
            if let Ok(f) = token.parse::<f64>() {
                return Arg::Float(f);
            }
        }
        Arg::Symbol(token.to_string())
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Arg::Int(i) => Some(*i as f64),
            Arg::Float(f) => Some(*f),
            Arg::Symbol(s) => s.parse::<f64>().ok(),
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Int(i) => write!(f, "{i}"),
            // Trailing dot keeps the float reading when the text is re-parsed.
            Arg::Float(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.0}.")
                } else {
                    write!(f, "{v}")
                }
            }
            Arg::Symbol(s) => write!(f, "{s}"),
        }
    }
}

/// A single node on a canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Processing-class name. A trailing `~` marks a signal-rate kind.
    pub kind: String,
    /// Unique within the owning canvas. `None` until first enumeration.
    pub id: Option<String>,
    pub args: Vec<Arg>,
    pub rect: Rect,
    pub num_inlets: u32,
    pub num_outlets: u32,
    /// Open bag of secondary properties, sanitized to depth-bounded JSON.
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    /// Child canvas for sub-canvas nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcanvas: Option<Box<Canvas>>,
}

impl Node {
    pub fn new(kind: impl Into<String>, args: Vec<Arg>, rect: Rect) -> Self {
        Node {
            kind: kind.into(),
            id: None,
            args,
            rect,
            num_inlets: 1,
            num_outlets: 1,
            attributes: HashMap::new(),
            subcanvas: None,
        }
    }

    /// The authoritative textual form: `"kind arg1 arg2 …"`. Construction
    /// arguments are recovered from this text wherever a node is recreated,
    /// so kind-specific symbolic rendering survives the round trip.
    pub fn display_text(&self) -> String {
        let mut text = self.kind.clone();
        for arg in &self.args {
            text.push(' ');
            text.push_str(&arg.to_string());
        }
        text
    }

    /// Signal-rate kinds carry a trailing `~` marker.
    pub fn is_signal(&self) -> bool {
        self.kind.ends_with('~')
    }

    pub fn is_subcanvas(&self) -> bool {
        self.subcanvas.is_some()
    }

    /// Bookkeeping nodes are invisible to snapshots and restores.
    pub fn is_reserved(&self) -> bool {
        self.id
            .as_deref()
            .is_some_and(|id| id.starts_with(RESERVED_PREFIX))
    }
}

/// One endpoint of a connection: `(node identifier, port index)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRef {
    pub id: String,
    pub port: u32,
}

impl PortRef {
    pub fn new(id: impl Into<String>, port: u32) -> Self {
        PortRef {
            id: id.into(),
            port,
        }
    }
}

/// A directed wire from one node's outlet to another node's inlet.
///
/// Connections carry no identity of their own; the four-tuple is the
/// identity. Endpoints are plain identifiers rather than live references so
/// the model stays trivially serializable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub source: PortRef,
    pub destination: PortRef,
}

impl Connection {
    pub fn new(src: &str, outlet: u32, dst: &str, inlet: u32) -> Self {
        Connection {
            source: PortRef::new(src, outlet),
            destination: PortRef::new(dst, inlet),
        }
    }

    /// True when either endpoint references the given node.
    pub fn touches(&self, id: &str) -> bool {
        self.source.id == id || self.destination.id == id
    }
}

/// Split an authoritative textual form into `(kind, args)`.
pub fn parse_text(text: &str) -> Option<(String, Vec<Arg>)> {
    let mut tokens = text.split_whitespace();
    let kind = tokens.next()?.to_string();
    let args = tokens.map(Arg::parse).collect();
    Some((kind, args))
}
