//! Diagram and report output over a [`GraphSnapshot`](super::call_graph::GraphSnapshot).
//!
//! Renderers are pure: they never touch the session, only the snapshot.

mod ascii;
mod flow;
mod mermaid;
mod report;

pub use ascii::AsciiRenderer;
pub use flow::MermaidFlowRenderer;
pub use mermaid::MermaidRenderer;
pub use report::{Diagrams, ReportRenderer};

use crate::config::VisualizationConfig;
use super::call_graph::GraphSnapshot;

pub trait GraphRenderer: Send + Sync {
    /// Short name, e.g. "ascii" or "mermaid"
    fn name(&self) -> &str;

    fn render(&self, snapshot: &GraphSnapshot) -> String;
}

/// The diagram renderers switched on in `config`, in display order
pub fn create_renderers(config: &VisualizationConfig) -> Vec<Box<dyn GraphRenderer>> {
    let mut renderers: Vec<Box<dyn GraphRenderer>> = Vec::new();
    if !config.enabled {
        return renderers;
    }
    if config.ascii_graph {
        renderers.push(Box::new(AsciiRenderer::new(config.max_depth)));
    }
    if config.mermaid_graph {
        renderers.push(Box::new(MermaidRenderer::new(config.max_depth)));
    }
    if config.mermaid_flow {
        renderers.push(Box::new(MermaidFlowRenderer::new(config.max_depth)));
    }
    renderers
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::core::call_graph::{EdgeKind, EdgeView, GraphSnapshot, NodeView};
    use crate::core::model::{FunctionId, NodeState};

    pub fn id(line: usize) -> FunctionId {
        FunctionId {
            path: "src/main.rs".into(),
            line,
            column: 1,
        }
    }

    fn node(line: usize, name: &str, depth: usize, state: NodeState) -> NodeView {
        NodeView {
            depth,
            id: id(line),
            name: name.to_string(),
            analysis: (state == NodeState::Analyzed).then(|| format!("{} summary", name)),
            state,
            failure: (state == NodeState::Failed).then(|| "timed out".to_string()),
        }
    }

    fn edge(from: usize, to: usize, kind: EdgeKind) -> EdgeView {
        EdgeView {
            caller: id(from),
            callee: id(to),
            kind,
        }
    }

    /// main -> {run, helper}, run -> {execute, run}, execute -> deep (beyond the bound)
    pub fn snapshot() -> GraphSnapshot {
        GraphSnapshot {
            roots: vec![id(1)],
            nodes: vec![
                node(1, "main", 0, NodeState::Analyzed),
                node(10, "run", 1, NodeState::Analyzed),
                node(20, "execute", 2, NodeState::Analyzed),
                node(30, "deep", 3, NodeState::Unvisited),
                node(40, "helper", 1, NodeState::Failed),
            ],
            edges: vec![
                edge(1, 10, EdgeKind::Expanded),
                edge(10, 20, EdgeKind::Expanded),
                edge(20, 30, EdgeKind::Truncated),
                edge(10, 10, EdgeKind::Cyclic),
                edge(1, 40, EdgeKind::Expanded),
            ],
        }
    }
}
