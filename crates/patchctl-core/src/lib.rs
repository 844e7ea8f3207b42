//! patchctl core — graph data model, workspace navigator, and error taxonomy

pub mod attrs;
pub mod canvas;
pub mod error;
pub mod model;
pub mod workspace;


pub use canvas::Canvas;
pub use error::PatchError;
pub use model::{Arg, Connection, Node, PortRef, Rect, RESERVED_PREFIX, parse_text};
pub use workspace::{NavContext, Workspace};
