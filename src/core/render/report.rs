use serde::Serialize;
use tera::{Context, Tera};

use crate::core::call_graph::{CallGraphStats, GraphSnapshot};
use crate::core::model::NodeState;
use crate::core::traversal::TraversalReport;
use crate::error::Result;

const REPORT_TEMPLATE: &str = r#"# Call graph of `{{ root_name }}`

- Root: `{{ root }}`
- Generated: {{ generated_at }}
- Functions: {{ stats.total_functions }} ({{ stats.analyzed }} analyzed, {{ stats.failed }} failed, {{ stats.unvisited }} beyond the depth limit)
- Calls: {{ stats.total_calls }} ({{ stats.cyclic_calls }} recursive, {{ stats.truncated_calls }} truncated)
{% if cancelled %}
> Traversal was cancelled; the graph is partial.
{% endif %}
{% if tree %}
## Call tree

```
{{ tree }}```
{% endif %}{% if flowchart %}
## Flowchart

```mermaid
{{ flowchart }}```
{% endif %}{% if flow %}
## Call flow

```mermaid
{{ flow }}```
{% endif %}
## Functions
{% for node in nodes %}
### {{ node.name }}

`{{ node.id }}` at depth {{ node.depth }}
{% if node.analysis %}
{{ node.analysis }}
{% elif node.failure %}
**Analysis failed:** {{ node.failure }}
{% else %}
_Not analyzed._
{% endif %}{% endfor %}"#;

#[derive(Serialize)]
struct NodeEntry<'a> {
    name: &'a str,
    id: String,
    depth: usize,
    analysis: Option<&'a str>,
    failure: Option<&'a str>,
}

/// Diagrams embedded in a report
#[derive(Debug, Default, Clone)]
pub struct Diagrams {
    pub tree: Option<String>,
    pub flowchart: Option<String>,
    pub flow: Option<String>,
}

/// Markdown report: counts, optional diagrams, and every node's analysis
pub struct ReportRenderer {
    tera: Tera,
}

impl ReportRenderer {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_template("report.md", REPORT_TEMPLATE)?;
        // Markdown output; analysis text must not be HTML-escaped
        tera.autoescape_on(vec![]);
        Ok(Self { tera })
    }

    pub fn render(
        &self,
        report: &TraversalReport,
        snapshot: &GraphSnapshot,
        stats: &CallGraphStats,
        diagrams: &Diagrams,
    ) -> Result<String> {
        let nodes: Vec<NodeEntry> = snapshot
            .nodes
            .iter()
            .filter(|n| n.state != NodeState::Unvisited)
            .map(|n| NodeEntry {
                name: &n.name,
                id: n.id.to_string(),
                depth: n.depth,
                analysis: n.analysis.as_deref(),
                failure: n.failure.as_deref(),
            })
            .collect();

        let mut context = Context::new();
        context.insert("root_name", &report.root_name);
        context.insert("root", &report.root.to_string());
        context.insert("generated_at", &chrono::Utc::now().to_rfc3339());
        context.insert("cancelled", &report.cancelled);
        context.insert("stats", stats);
        context.insert("tree", &diagrams.tree);
        context.insert("flowchart", &diagrams.flowchart);
        context.insert("flow", &diagrams.flow);
        context.insert("nodes", &nodes);

        Ok(self.tera.render("report.md", &context)?)
    }
}
