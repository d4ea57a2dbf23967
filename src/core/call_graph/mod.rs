// src/core/call_graph/mod.rs
//! Call graph discovered during a traversal session.
//!
//! Nodes are created before any edge points at them; cycles are allowed and
//! recorded as `cyclic` edges instead of being expanded again.

mod graph;
mod snapshot;

pub use graph::{CallGraph, CallEdge, CallGraphStats, Claim, EdgeKind};
pub use snapshot::{GraphSnapshot, NodeView, EdgeView};
