use std::collections::HashSet;

use super::GraphRenderer;
use crate::core::call_graph::{EdgeKind, GraphSnapshot};
use crate::core::model::{FunctionId, NodeState};

/// Indented tree, one line per call, starting from each root
pub struct AsciiRenderer {
    max_depth: usize,
}

impl AsciiRenderer {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    fn label(snapshot: &GraphSnapshot, id: &FunctionId) -> String {
        match snapshot.node(id) {
            Some(node) => {
                let marker = match node.state {
                    NodeState::Analyzed => String::new(),
                    NodeState::InProgress => " [in progress]".to_string(),
                    NodeState::Unvisited => " [not analyzed]".to_string(),
                    NodeState::Failed => format!(
                        " [FAILED: {}]",
                        node.failure.as_deref().unwrap_or("unknown")
                    ),
                };
                format!("{}{}", node.name, marker)
            }
            None => id.to_string(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn render_child(
        &self,
        snapshot: &GraphSnapshot,
        id: &FunctionId,
        kind: EdgeKind,
        depth: usize,
        prefix: &str,
        is_last: bool,
        seen: &mut HashSet<FunctionId>,
        output: &mut String,
    ) {
        let connector = if is_last { "└── " } else { "├── " };
        let mut line = Self::label(snapshot, id);
        let expand = match kind {
            EdgeKind::Cyclic => {
                line.push_str(" ↻ recursive");
                false
            }
            EdgeKind::Truncated => {
                line.push_str(" … depth limit");
                false
            }
            EdgeKind::Expanded if !seen.insert(id.clone()) => {
                line.push_str(" [seen]");
                false
            }
            EdgeKind::Expanded => true,
        };
        output.push_str(&format!("{}{}{}\n", prefix, connector, line));

        if expand {
            let child_prefix = format!("{}{}   ", prefix, if is_last { " " } else { "│" });
            self.render_children(snapshot, id, depth, &child_prefix, seen, output);
        }
    }

    fn render_children(
        &self,
        snapshot: &GraphSnapshot,
        id: &FunctionId,
        depth: usize,
        prefix: &str,
        seen: &mut HashSet<FunctionId>,
        output: &mut String,
    ) {
        let edges: Vec<_> = snapshot.edges_from(id).collect();
        if edges.is_empty() {
            return;
        }
        if depth >= self.max_depth {
            output.push_str(&format!("{}└── … {} more\n", prefix, edges.len()));
            return;
        }
        for (i, edge) in edges.iter().enumerate() {
            let is_last = i == edges.len() - 1;
            self.render_child(snapshot, &edge.callee, edge.kind, depth + 1, prefix, is_last, seen, output);
        }
    }
}

impl GraphRenderer for AsciiRenderer {
    fn name(&self) -> &str {
        "ascii"
    }

    fn render(&self, snapshot: &GraphSnapshot) -> String {
        let mut output = String::new();
        let mut seen = HashSet::new();

        for root in &snapshot.roots {
            seen.insert(root.clone());
            output.push_str(&Self::label(snapshot, root));
            output.push('\n');
            self.render_children(snapshot, root, 0, "", &mut seen, &mut output);
        }

        output
    }
}
