// src/core/call_graph/graph.rs
use std::collections::HashMap;
use std::fmt;
use serde::{Serialize, Deserialize};

use super::super::model::{
    AnalysisResult, FailureReason, FunctionId, FunctionNode, LocatedFunction, NodeState,
};
use super::snapshot::{EdgeView, GraphSnapshot, NodeView};

/// How the traversal treated a discovered call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    /// The callee was (or already had been) traversed
    Expanded,
    /// The callee lies beyond the depth bound and was not analyzed
    Truncated,
    /// The callee is on the current path (recursion)
    Cyclic,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EdgeKind::Expanded => "expanded",
            EdgeKind::Truncated => "truncated",
            EdgeKind::Cyclic => "cyclic",
        };
        f.write_str(label)
    }
}

/// Edge in the call graph representing a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEdge {
    /// Function making the call
    pub caller: FunctionId,
    /// Function being called
    pub callee: FunctionId,
    pub kind: EdgeKind,
}

/// Result of trying to take ownership of a node for traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// The caller now owns the node; it was absent or a placeholder
    Acquired,
    /// Somebody else already traversed or is traversing the node
    Taken(NodeState),
}

/// Call graph discovered by one session
#[derive(Debug, Clone, Default)]
pub struct CallGraph {
    nodes: HashMap<FunctionId, FunctionNode>,
    /// Insertion order of `nodes`
    order: Vec<FunctionId>,
    edges: Vec<CallEdge>,
    /// Adjacency list for efficient traversal
    adjacency_list: HashMap<FunctionId, Vec<FunctionId>>,
    /// Reverse adjacency list (who calls this function)
    reverse_adjacency: HashMap<FunctionId, Vec<FunctionId>>,
    roots: Vec<FunctionId>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a node for traversal at `depth`.
    ///
    /// Absent nodes are inserted `in-progress`; `unvisited` placeholders are
    /// promoted in place. Anything else is left alone.
    pub fn claim(&mut self, located: LocatedFunction, depth: usize) -> Claim {
        if let Some(node) = self.nodes.get_mut(&located.id) {
            if node.state != NodeState::Unvisited {
                return Claim::Taken(node.state);
            }
            node.state = NodeState::InProgress;
            node.depth = node.depth.min(depth);
            return Claim::Acquired;
        }

        self.insert(FunctionNode::new(located, depth, NodeState::InProgress));
        Claim::Acquired
    }

    /// Record a function beyond the depth bound. Returns false if it already exists.
    pub fn insert_placeholder(&mut self, located: LocatedFunction, depth: usize) -> bool {
        if self.nodes.contains_key(&located.id) {
            return false;
        }
        self.insert(FunctionNode::new(located, depth, NodeState::Unvisited));
        true
    }

    fn insert(&mut self, node: FunctionNode) {
        self.order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn mark_root(&mut self, id: &FunctionId) {
        if !self.roots.contains(id) {
            self.roots.push(id.clone());
        }
    }

    /// Add a call edge. Both ends must already be nodes; a repeated
    /// caller/callee pair keeps its first kind.
    pub fn add_edge(&mut self, caller: &FunctionId, callee: &FunctionId, kind: EdgeKind) -> bool {
        if !self.nodes.contains_key(caller) || !self.nodes.contains_key(callee) {
            return false;
        }
        if self.edges.iter().any(|e| &e.caller == caller && &e.callee == callee) {
            return false;
        }

        self.edges.push(CallEdge {
            caller: caller.clone(),
            callee: callee.clone(),
            kind,
        });
        self.adjacency_list
            .entry(caller.clone())
            .or_default()
            .push(callee.clone());
        self.reverse_adjacency
            .entry(callee.clone())
            .or_default()
            .push(caller.clone());
        true
    }

    /// Change a node's state, returning the previous one
    pub fn set_state(&mut self, id: &FunctionId, state: NodeState) -> Option<NodeState> {
        let node = self.nodes.get_mut(id)?;
        let old = node.state;
        node.state = state;
        Some(old)
    }

    /// Store the analysis and mark the node `analyzed`
    pub fn complete(&mut self, id: &FunctionId, result: AnalysisResult) -> Option<NodeState> {
        let node = self.nodes.get_mut(id)?;
        let old = node.state;
        node.children = result.retained_children.clone();
        node.analysis = Some(result);
        node.failure = None;
        node.state = NodeState::Analyzed;
        Some(old)
    }

    /// Mark the node `failed`; it keeps its slot but carries no analysis
    pub fn fail(&mut self, id: &FunctionId, reason: FailureReason) -> Option<NodeState> {
        let node = self.nodes.get_mut(id)?;
        let old = node.state;
        node.analysis = None;
        node.failure = Some(reason);
        node.state = NodeState::Failed;
        Some(old)
    }

    pub fn get(&self, id: &FunctionId) -> Option<&FunctionNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &FunctionId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &FunctionNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn edges(&self) -> &[CallEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get functions that this function calls (outgoing edges)
    pub fn get_callees(&self, id: &FunctionId) -> Vec<&FunctionId> {
        self.adjacency_list
            .get(id)
            .map(|callees| callees.iter().collect())
            .unwrap_or_default()
    }

    /// Get functions that call this function (incoming edges)
    pub fn get_callers(&self, id: &FunctionId) -> Vec<&FunctionId> {
        self.reverse_adjacency
            .get(id)
            .map(|callers| callers.iter().collect())
            .unwrap_or_default()
    }

    pub fn edge_kind(&self, caller: &FunctionId, callee: &FunctionId) -> Option<EdgeKind> {
        self.edges
            .iter()
            .find(|e| &e.caller == caller && &e.callee == callee)
            .map(|e| e.kind)
    }

    pub fn count_in_state(&self, state: NodeState) -> usize {
        self.nodes.values().filter(|n| n.state == state).count()
    }

    /// Get statistics about the call graph
    pub fn get_statistics(&self) -> CallGraphStats {
        let count_edges = |kind: EdgeKind| self.edges.iter().filter(|e| e.kind == kind).count();
        CallGraphStats {
            total_functions: self.nodes.len(),
            analyzed: self.count_in_state(NodeState::Analyzed),
            failed: self.count_in_state(NodeState::Failed),
            unvisited: self.count_in_state(NodeState::Unvisited),
            total_calls: self.edges.len(),
            truncated_calls: count_edges(EdgeKind::Truncated),
            cyclic_calls: count_edges(EdgeKind::Cyclic),
            max_depth: self.nodes.values().map(|n| n.depth).max().unwrap_or(0),
        }
    }

    /// Read-only view handed to renderers and UIs
    pub fn snapshot(&self) -> GraphSnapshot {
        let nodes = self
            .nodes()
            .map(|node| NodeView {
                depth: node.depth,
                id: node.id.clone(),
                name: node.name.clone(),
                analysis: node.analysis.as_ref().map(|a| a.comprehensive.clone()),
                state: node.state,
                failure: node.failure.as_ref().map(|f| f.to_string()),
            })
            .collect();

        let edges = self
            .edges
            .iter()
            .map(|e| EdgeView {
                caller: e.caller.clone(),
                callee: e.callee.clone(),
                kind: e.kind,
            })
            .collect();

        GraphSnapshot {
            roots: self.roots.clone(),
            nodes,
            edges,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallGraphStats {
    pub total_functions: usize,
    pub analyzed: usize,
    pub failed: usize,
    pub unvisited: usize,
    pub total_calls: usize,
    pub truncated_calls: usize,
    pub cyclic_calls: usize,
    pub max_depth: usize,
}
