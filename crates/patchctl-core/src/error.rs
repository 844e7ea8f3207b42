//! Error taxonomy shared by the graph model, the engines, and the protocol.

use thiserror::Error;

/// Every operation failure maps onto one of these variants; engines never
/// panic past their own boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PatchError {
    /// Malformed or missing request fields. Caller error.
    #[error("{0}")]
    Validation(String),

    /// A referenced identifier is absent from the current canvas.
    #[error("object not found: {0}")]
    NotFound(String),

    /// Operation invoked outside its required state.
    #[error("{0}")]
    PreconditionFailed(String),

    /// Authentication token missing or invalid.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Request named an action the dispatcher does not recognize.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Unexpected failure during mutation. Rollback paths report this.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PatchError {
    /// Machine-readable protocol code.
    pub fn code(&self) -> &'static str {
        match self {
            PatchError::Validation(_) => "VALIDATION_ERROR",
            PatchError::NotFound(_) => "OBJECT_NOT_FOUND",
            PatchError::PreconditionFailed(_) => "PRECONDITION_FAILED",
            PatchError::Unauthorized(_) => "UNAUTHORIZED",
            PatchError::UnknownAction(_) => "UNKNOWN_ACTION",
            PatchError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller can expect a retry (possibly after correction)
    /// to succeed. Internal failures leave no partial state behind, so
    /// they are recoverable by convention.
    pub fn recoverable(&self) -> bool {
        true
    }

    /// Corrective action, where one exists.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            PatchError::NotFound(_) => {
                Some("re-query the canvas; identifiers may have changed")
            }
            PatchError::PreconditionFailed(_) => {
                Some("call exit_subpatcher until at root, then retry")
            }
            _ => None,
        }
    }
}
