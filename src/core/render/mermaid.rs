use std::collections::HashMap;

use super::GraphRenderer;
use crate::core::call_graph::{EdgeKind, GraphSnapshot};
use crate::core::model::NodeState;

/// Mermaid flowchart of the nodes up to `max_depth`
pub struct MermaidRenderer {
    max_depth: usize,
}

impl MermaidRenderer {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    fn escape_label(label: &str) -> String {
        label
            .replace('"', "#quot;")
            .replace('<', "#lt;")
            .replace('>', "#gt;")
    }
}

impl GraphRenderer for MermaidRenderer {
    fn name(&self) -> &str {
        "mermaid"
    }

    fn render(&self, snapshot: &GraphSnapshot) -> String {
        let mut lines = vec!["flowchart TD".to_string()];

        // Mermaid ids must be plain words; number nodes in snapshot order
        let mut ids = HashMap::new();
        for node in snapshot.nodes.iter().filter(|n| n.depth <= self.max_depth) {
            let key = format!("n{}", ids.len());
            let class = match node.state {
                NodeState::Analyzed => "",
                NodeState::InProgress => ":::progress",
                NodeState::Unvisited => ":::unvisited",
                NodeState::Failed => ":::failed",
            };
            let label = match node.state {
                NodeState::Failed => format!("{} (failed)", node.name),
                _ => node.name.clone(),
            };
            lines.push(format!(
                "    {}[\"{}\"]{}",
                key,
                Self::escape_label(&label),
                class
            ));
            ids.insert(&node.id, key);
        }

        for edge in &snapshot.edges {
            let (Some(from), Some(to)) = (ids.get(&edge.caller), ids.get(&edge.callee)) else {
                continue;
            };
            let arrow = match edge.kind {
                EdgeKind::Expanded => "-->",
                EdgeKind::Truncated => "-.->|depth limit|",
                EdgeKind::Cyclic => "-->|recursive|",
            };
            lines.push(format!("    {} {} {}", from, arrow, to));
        }

        lines.push("    classDef failed fill:#f38ba8,stroke:#d20f39".to_string());
        lines.push("    classDef unvisited fill:#e6e9ef,stroke:#6c7086,stroke-dasharray: 4 4".to_string());
        lines.push("    classDef progress fill:#f9e2af,stroke:#df8e1d".to_string());

        let mut output = lines.join("\n");
        output.push('\n');
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::render::fixtures;

    #[test]
    fn test_flowchart_styles_edges_and_failures() {
        let output = MermaidRenderer::new(5).render(&fixtures::snapshot());

        assert!(output.starts_with("flowchart TD\n"));
        assert!(output.contains("    n0[\"main\"]\n"));
        assert!(output.contains("    n3[\"deep\"]:::unvisited\n"));
        assert!(output.contains("    n4[\"helper (failed)\"]:::failed\n"));
        assert!(output.contains("    n0 --> n1\n"));
        assert!(output.contains("    n2 -.->|depth limit| n3\n"));
        assert!(output.contains("    n1 -->|recursive| n1\n"));
    }

    #[test]
    fn test_nodes_beyond_max_depth_are_dropped() {
        let output = MermaidRenderer::new(1).render(&fixtures::snapshot());

        assert!(!output.contains("execute"));
        assert!(!output.contains("deep"));
        assert!(!output.contains("depth limit|"));
        assert!(output.contains("n0 --> n2"));
    }

    #[test]
    fn test_labels_are_escaped() {
        assert_eq!(
            MermaidRenderer::escape_label("Vec<\"x\">"),
            "Vec#lt;#quot;x#quot;#gt;"
        );
    }
}
