//! Workspace navigator: tracks canvas nesting and resolves the active canvas.

use serde::{Deserialize, Serialize};

use crate::canvas::Canvas;
use crate::error::PatchError;

/// Where navigation currently stands, as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavContext {
    pub depth: usize,
    pub path: Vec<String>,
    pub is_root: bool,
}

/// The canvas tree plus the navigation path into it. All engines resolve
/// "the active canvas" through here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workspace {
    pub root: Canvas,
    path: Vec<String>,
}

impl Workspace {
    pub fn new() -> Self {
        Workspace::default()
    }

    pub fn with_root(root: Canvas) -> Self {
        Workspace { root, path: Vec::new() }
    }

    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn context(&self) -> NavContext {
        NavContext {
            depth: self.path.len(),
            path: self.path.clone(),
            is_root: self.path.is_empty(),
        }
    }

    /// The canvas the navigation path points at.
    pub fn active(&self) -> Result<&Canvas, PatchError> {
        let mut canvas = &self.root;
        for id in &self.path {
            canvas = canvas
                .node(id)
                .and_then(|n| n.subcanvas.as_deref())
                .ok_or_else(|| {
                    PatchError::Internal(format!("navigation path broken at {id}"))
                })?;
        }
        Ok(canvas)
    }

    pub fn active_mut(&mut self) -> Result<&mut Canvas, PatchError> {
        let mut canvas = &mut self.root;
        for id in &self.path {
            canvas = canvas
                .node_mut(id)
                .and_then(|n| n.subcanvas.as_deref_mut())
                .ok_or_else(|| {
                    PatchError::Internal(format!("navigation path broken at {id}"))
                })?;
        }
        Ok(canvas)
    }

    /// Descend into the sub-canvas owned by `id` on the active canvas.
    pub fn enter(&mut self, id: &str) -> Result<NavContext, PatchError> {
        let active = self.active()?;
        let node = active
            .node(id)
            .ok_or_else(|| PatchError::NotFound(id.to_string()))?;
        if !node.is_subcanvas() {
            return Err(PatchError::Validation(format!(
                "{id} is not a sub-canvas node"
            )));
        }
        self.path.push(id.to_string());
        tracing::debug!(id, depth = self.path.len(), "entered sub-canvas");
        Ok(self.context())
    }

    /// Return to the parent canvas.
    pub fn exit(&mut self) -> Result<NavContext, PatchError> {
        if self.path.pop().is_none() {
            return Err(PatchError::PreconditionFailed(
                "already at root canvas".into(),
            ));
        }
        tracing::debug!(depth = self.path.len(), "exited to parent canvas");
        Ok(self.context())
    }
}
