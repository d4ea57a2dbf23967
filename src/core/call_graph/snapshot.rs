// src/core/call_graph/snapshot.rs
use serde::{Serialize, Deserialize};

use super::super::model::{FunctionId, NodeState};
use super::EdgeKind;

/// One node as seen by renderers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeView {
    pub depth: usize,
    pub id: FunctionId,
    pub name: String,
    /// Comprehensive analysis, absent unless the node was analyzed
    pub analysis: Option<String>,
    pub state: NodeState,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeView {
    pub caller: FunctionId,
    pub callee: FunctionId,
    pub kind: EdgeKind,
}

/// Immutable copy of the call graph at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub roots: Vec<FunctionId>,
    pub nodes: Vec<NodeView>,
    pub edges: Vec<EdgeView>,
}

impl GraphSnapshot {
    pub fn node(&self, id: &FunctionId) -> Option<&NodeView> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Outgoing edges of `id` in discovery order
    pub fn edges_from<'a>(&'a self, id: &'a FunctionId) -> impl Iterator<Item = &'a EdgeView> + 'a {
        self.edges.iter().filter(move |e| &e.caller == id)
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.nodes.iter().filter(|n| n.state == state).count()
    }
}
