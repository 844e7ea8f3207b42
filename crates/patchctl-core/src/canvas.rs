//! The canvas arena: an ordered collection of nodes plus identifier-pair
//! connections, with identifier allocation and lookup.

use serde::{Deserialize, Serialize};

use crate::error::PatchError;
use crate::model::{Arg, Connection, Node, Rect};

/// A container of nodes and connections. May be the root workspace or
/// nested inside a parent node as a sub-canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Canvas {
    pub nodes: Vec<Node>,
    pub connections: Vec<Connection>,
    #[serde(default)]
    next_id: u64,
}

impl Canvas {
    pub fn new() -> Self {
        Canvas::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get a node by identifier.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id.as_deref() == Some(id))
    }

    /// Get a mutable node by identifier.
    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id.as_deref() == Some(id))
    }

    fn require(&self, id: &str) -> Result<&Node, PatchError> {
        self.node(id)
            .ok_or_else(|| PatchError::NotFound(id.to_string()))
    }

    /// Generate an identifier distinct from every identifier currently in
    /// use on this canvas, including ones the caller has not yet seen.
    pub fn generate_id(&mut self) -> String {
        loop {
            let candidate = format!("obj-{}", self.next_id);
            self.next_id += 1;
            if self.node(&candidate).is_none() {
                return candidate;
            }
        }
    }

    /// Create a node and return its identifier. When `id` is `None` a fresh
    /// identifier is assigned; a supplied identifier must not already be in
    /// use.
    pub fn add_node(
        &mut self,
        kind: &str,
        args: Vec<Arg>,
        rect: Rect,
        id: Option<String>,
    ) -> Result<String, PatchError> {
        if kind.trim().is_empty() {
            return Err(PatchError::Validation("node kind must be non-empty".into()));
        }
        let id = match id {
            Some(id) => {
                if self.node(&id).is_some() {
                    return Err(PatchError::Validation(format!(
                        "identifier already in use: {id}"
                    )));
                }
                id
            }
            None => self.generate_id(),
        };
        let mut node = Node::new(kind, args, rect);
        node.id = Some(id.clone());
        self.nodes.push(node);
        Ok(id)
    }

    /// Remove a node, its child canvas, and every connection touching it.
    pub fn remove_node(&mut self, id: &str) -> Result<Node, PatchError> {
        let idx = self
            .nodes
            .iter()
            .position(|n| n.id.as_deref() == Some(id))
            .ok_or_else(|| PatchError::NotFound(id.to_string()))?;
        self.connections.retain(|c| !c.touches(id));
        Ok(self.nodes.remove(idx))
    }

    /// Wire `src`'s outlet to `dst`'s inlet. Idempotent on an exact
    /// duplicate four-tuple, since connections have no identity beyond it.
    pub fn connect(
        &mut self,
        src: &str,
        outlet: u32,
        dst: &str,
        inlet: u32,
    ) -> Result<(), PatchError> {
        self.require(src)?;
        self.require(dst)?;
        let conn = Connection::new(src, outlet, dst, inlet);
        if !self.connections.contains(&conn) {
            self.connections.push(conn);
        }
        Ok(())
    }

    /// Remove the connection identified by the exact four-tuple.
    pub fn disconnect(
        &mut self,
        src: &str,
        outlet: u32,
        dst: &str,
        inlet: u32,
    ) -> Result<(), PatchError> {
        self.require(src)?;
        self.require(dst)?;
        let conn = Connection::new(src, outlet, dst, inlet);
        let before = self.connections.len();
        self.connections.retain(|c| *c != conn);
        if self.connections.len() == before {
            return Err(PatchError::NotFound(format!(
                "no connection {src}:{outlet} -> {dst}:{inlet}"
            )));
        }
        Ok(())
    }

    /// All connections leaving `id`.
    pub fn outputs_of(&self, id: &str) -> Vec<&Connection> {
        self.connections.iter().filter(|c| c.source.id == id).collect()
    }

    /// All connections arriving at `id`.
    pub fn inputs_of(&self, id: &str) -> Vec<&Connection> {
        self.connections
            .iter()
            .filter(|c| c.destination.id == id)
            .collect()
    }

    /// Assign identifiers to every node that lacks one. Returns how many
    /// were assigned. One used-id set backs the whole pass.
    pub fn ensure_ids(&mut self) -> usize {
        let mut assigned = 0;
        for i in 0..self.nodes.len() {
            if self.nodes[i].id.is_none() {
                let id = self.generate_id();
                self.nodes[i].id = Some(id);
                assigned += 1;
            }
        }
        assigned
    }

    /// Replace a node's construction arguments in place. Wiring survives
    /// untouched because connections reference the identifier, not the
    /// node value. Returns `(inputs, outputs)` still attached.
    pub fn set_args(&mut self, id: &str, args: Vec<Arg>) -> Result<(usize, usize), PatchError> {
        let node = self
            .node_mut(id)
            .ok_or_else(|| PatchError::NotFound(id.to_string()))?;
        node.args = args;
        Ok((self.inputs_of(id).len(), self.outputs_of(id).len()))
    }

    /// Union of all node rectangles, the region new placements should avoid.
    pub fn bounding_box(&self) -> Option<Rect> {
        let mut it = self.nodes.iter().map(|n| n.rect);
        let first = it.next()?;
        let mut left = first.x;
        let mut top = first.y;
        let mut right = first.right();
        let mut bottom = first.bottom();
        for r in it {
            left = left.min(r.x);
            top = top.min(r.y);
            right = right.max(r.right());
            bottom = bottom.max(r.bottom());
        }
        Some(Rect::from_corners(left, top, right, bottom))
    }

    /// Drop every non-bookkeeping node and all connections touching them.
    /// Used once at the start of a destructive restore.
    pub fn clear_user_nodes(&mut self) -> usize {
        let removed_ids: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| !n.is_reserved())
            .filter_map(|n| n.id.clone())
            .collect();
        let before = self.nodes.len();
        self.nodes.retain(|n| n.is_reserved());
        self.connections
            .retain(|c| !removed_ids.iter().any(|id| c.touches(id)));
        before - self.nodes.len()
    }

    /// Nodes visible to snapshots (bookkeeping nodes excluded).
    pub fn user_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| !n.is_reserved())
    }
}
