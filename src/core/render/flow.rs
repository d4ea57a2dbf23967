use std::collections::{HashMap, HashSet};

use super::GraphRenderer;
use crate::core::call_graph::{EdgeKind, GraphSnapshot};
use crate::core::model::{FunctionId, NodeState};

/// Mermaid sequence diagram that replays the calls depth-first from the roots
pub struct MermaidFlowRenderer {
    max_depth: usize,
}

impl MermaidFlowRenderer {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    fn walk(
        &self,
        snapshot: &GraphSnapshot,
        ids: &HashMap<&FunctionId, String>,
        caller: &FunctionId,
        shown: &mut HashSet<FunctionId>,
        lines: &mut Vec<String>,
    ) {
        let Some(from) = ids.get(caller) else {
            return;
        };
        for edge in snapshot.edges_from(caller) {
            let (Some(to), Some(callee)) = (ids.get(&edge.callee), snapshot.node(&edge.callee)) else {
                continue;
            };
            match (edge.kind, callee.state) {
                (EdgeKind::Cyclic, _) => lines.push(format!("    {}->>{}: recursive", from, to)),
                (EdgeKind::Truncated, _) | (_, NodeState::Unvisited) => {
                    lines.push(format!("    {}--){}: depth limit", from, to))
                }
                (_, NodeState::Failed) => lines.push(format!("    {}-x{}: failed", from, to)),
                _ if !shown.insert(edge.callee.clone()) => {
                    lines.push(format!("    {}->>{}: calls (seen)", from, to))
                }
                _ => {
                    lines.push(format!("    {}->>+{}: calls", from, to));
                    self.walk(snapshot, ids, &edge.callee, shown, lines);
                    lines.push(format!("    {}-->>-{}: returns", to, from));
                }
            }
        }
    }
}

impl GraphRenderer for MermaidFlowRenderer {
    fn name(&self) -> &str {
        "mermaid-flow"
    }

    fn render(&self, snapshot: &GraphSnapshot) -> String {
        let mut lines = vec!["sequenceDiagram".to_string()];

        let mut ids = HashMap::new();
        for node in snapshot.nodes.iter().filter(|n| n.depth <= self.max_depth) {
            let key = format!("p{}", ids.len());
            lines.push(format!("    participant {} as {}", key, node.name));
            ids.insert(&node.id, key);
        }

        let mut shown = HashSet::new();
        for root in &snapshot.roots {
            if shown.insert(root.clone()) {
                self.walk(snapshot, &ids, root, &mut shown, &mut lines);
            }
        }

        let mut output = lines.join("\n");
        output.push('\n');
        output
    }
}
