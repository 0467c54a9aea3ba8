//! In-memory page model: the DOM substrate the perception engine observes
//! and the executor acts on.

pub mod document;
pub mod events;
pub mod node;

pub use document::Document;
pub use events::{EventKind, Mutation, SyntheticEvent};
pub use node::{Element, NodeId, StyleFlags};
