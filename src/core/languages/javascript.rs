use tree_sitter::{Language, Node};

use super::{LanguageGrammar, node_text};

/// JavaScript grammar: declarations, methods and function values
pub struct JavaScriptGrammar;

impl LanguageGrammar for JavaScriptGrammar {
    fn language(&self) -> Language {
        tree_sitter_javascript::language()
    }

    fn language_name(&self) -> &str {
        "javascript"
    }

    fn file_extensions(&self) -> &[&str] {
        &["js", "mjs", "cjs", "jsx"]
    }

    fn function_kinds(&self) -> &[&str] {
        &[
            "function_declaration",
            "generator_function_declaration",
            "method_definition",
            "function_expression",
            "function",
            "arrow_function",
        ]
    }

    fn call_kinds(&self) -> &[&str] {
        &["call_expression"]
    }

    /// Anonymous functions take the name they are bound to
    /// (`const load = () => ...`, `{ load: function () {} }`, `exports.load = ...`)
    fn function_name(&self, node: Node, source: &str) -> Option<String> {
        if let Some(name) = node.child_by_field_name("name") {
            return Some(node_text(name, source).to_string());
        }

        let parent = node.parent()?;
        let binding = match parent.kind() {
            "variable_declarator" => parent.child_by_field_name("name"),
            "pair" => parent.child_by_field_name("key"),
            "assignment_expression" => parent.child_by_field_name("left"),
            _ => None,
        }?;
        super::last_segment(node_text(binding, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::{call_nodes, enclosing_function, parse_source};

    #[test]
    fn test_arrow_function_takes_binding_name() {
        let source = "const start = () => {\n  const cfg = loadConfig();\n  app.listen(cfg.port);\n};\n";
        let grammar = JavaScriptGrammar;
        let tree = parse_source(&grammar, source).unwrap();
        let function = enclosing_function(&grammar, &tree, 2, 3).unwrap();
        assert_eq!(grammar.function_name(function, source).as_deref(), Some("start"));

        let names: Vec<String> = call_nodes(&grammar, function)
            .into_iter()
            .filter_map(|n| grammar.callee_name(n, source))
            .collect();
        assert_eq!(names, vec!["loadConfig", "listen"]);
    }
}
