//! Tree-sitter grammars for the languages CallGraphite can walk
//!
//! Each language describes which syntax nodes are functions and which are
//! calls; locating and reference resolution are shared on top of that.

mod rust;
mod java;
mod python;
mod csharp;
mod javascript;

pub use rust::RustGrammar;
pub use java::JavaGrammar;
pub use python::PythonGrammar;
pub use csharp::CSharpGrammar;
pub use javascript::JavaScriptGrammar;

use std::path::Path;
use std::sync::Arc;
use tree_sitter::{Language, Node, Parser, Point, Tree};

use crate::error::{CallGraphiteError, Result};

/// Trait that all language grammars must implement
pub trait LanguageGrammar: Send + Sync {
    /// Get the tree-sitter language
    fn language(&self) -> Language;

    /// Get the language name
    fn language_name(&self) -> &str;

    /// Get the file extensions this grammar handles
    fn file_extensions(&self) -> &[&str];

    /// Node kinds that define a function or method
    fn function_kinds(&self) -> &[&str];

    /// Node kinds that call a function or method
    fn call_kinds(&self) -> &[&str];

    /// Field of a call node holding the callee expression
    fn callee_field(&self) -> &str {
        "function"
    }

    /// Name of a function node, if it has one
    fn function_name(&self, node: Node, source: &str) -> Option<String> {
        node.child_by_field_name("name")
            .map(|n| node_text(n, source).to_string())
    }

    /// Bare callee name of a call node ("self.cfg.load()" -> "load")
    fn callee_name(&self, node: Node, source: &str) -> Option<String> {
        let callee = node.child_by_field_name(self.callee_field())?;
        last_segment(node_text(callee, source))
    }

    fn is_function(&self, node: Node) -> bool {
        self.function_kinds().contains(&node.kind())
    }

    fn is_call(&self, node: Node) -> bool {
        self.call_kinds().contains(&node.kind())
    }
}

/// 1-based (line, column) of a tree-sitter point
pub fn line_col(point: Point) -> (usize, usize) {
    (point.row + 1, point.column + 1)
}

pub(crate) fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    source.get(node.byte_range()).unwrap_or("")
}

/// Last identifier of a (possibly qualified or generic) callee expression
pub(crate) fn last_segment(expr: &str) -> Option<String> {
    let mut depth = 0usize;
    let without_generics: String = expr
        .chars()
        .filter(|&c| match c {
            '<' => {
                depth += 1;
                false
            }
            '>' if depth > 0 => {
                depth -= 1;
                false
            }
            _ => depth == 0,
        })
        .collect();
    without_generics
        .rsplit(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .find(|s| !s.is_empty() && !s.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

/// Registry of supported grammars, looked up by file extension
#[derive(Clone)]
pub struct Languages {
    grammars: Vec<Arc<dyn LanguageGrammar>>,
}

impl Languages {
    pub fn new() -> Self {
        Self {
            grammars: vec![
                Arc::new(RustGrammar),
                Arc::new(PythonGrammar),
                Arc::new(JavaGrammar),
                Arc::new(JavaScriptGrammar),
                Arc::new(CSharpGrammar),
            ],
        }
    }

    pub fn for_path(&self, path: &Path) -> Option<Arc<dyn LanguageGrammar>> {
        let ext = path.extension()?.to_str()?;
        self.grammars
            .iter()
            .find(|g| g.file_extensions().contains(&ext))
            .cloned()
    }

    pub fn supports(&self, path: &Path) -> bool {
        self.for_path(path).is_some()
    }
}

impl Default for Languages {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse `source` with `grammar`
pub fn parse_source(grammar: &dyn LanguageGrammar, source: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    parser.set_language(&grammar.language()).map_err(|e| {
        CallGraphiteError::Parser(format!(
            "Failed to set {} language: {}",
            grammar.language_name(),
            e
        ))
    })?;
    parser.parse(source, None).ok_or_else(|| {
        CallGraphiteError::Parser(format!("Failed to parse {} code", grammar.language_name()))
    })
}

/// Innermost function node enclosing a 1-based (line, column)
pub fn enclosing_function<'t>(
    grammar: &dyn LanguageGrammar,
    tree: &'t Tree,
    line: usize,
    column: usize,
) -> Option<Node<'t>> {
    let point = Point {
        row: line.saturating_sub(1),
        column: column.saturating_sub(1),
    };
    let mut node = tree.root_node().descendant_for_point_range(point, point)?;
    loop {
        if grammar.is_function(node) {
            return Some(node);
        }
        node = node.parent()?;
    }
}

/// Every function node in the tree, in source order
pub fn function_nodes<'t>(grammar: &dyn LanguageGrammar, tree: &'t Tree) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    collect_nodes(tree.root_node(), &mut found, &|n| grammar.is_function(n));
    found
}

/// Every call node below `node`, in source order
pub fn call_nodes<'t>(grammar: &dyn LanguageGrammar, node: Node<'t>) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    collect_nodes(node, &mut found, &|n| grammar.is_call(n));
    found
}

fn collect_nodes<'t>(node: Node<'t>, found: &mut Vec<Node<'t>>, keep: &dyn Fn(Node<'t>) -> bool) {
    if keep(node) {
        found.push(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_nodes(child, found, keep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_segment() {
        assert_eq!(last_segment("run").as_deref(), Some("run"));
        assert_eq!(last_segment("self.config.load").as_deref(), Some("load"));
        assert_eq!(last_segment("std::process::exit").as_deref(), Some("exit"));
        assert_eq!(last_segment("Vec::<u8>::new").as_deref(), Some("new"));
        assert_eq!(last_segment("Foo.Bar<int>").as_deref(), Some("Bar"));
        assert_eq!(last_segment("parse::<T>").as_deref(), Some("parse"));
        assert_eq!(last_segment("$.ajax").as_deref(), Some("ajax"));
        assert_eq!(last_segment("").as_deref(), None);
    }

    #[test]
    fn test_lookup_by_extension() {
        let languages = Languages::new();
        assert_eq!(
            languages.for_path(Path::new("src/main.rs")).unwrap().language_name(),
            "rust"
        );
        assert_eq!(
            languages.for_path(Path::new("app/index.mjs")).unwrap().language_name(),
            "javascript"
        );
        assert!(!languages.supports(Path::new("README.md")));
        assert!(!languages.supports(Path::new("Makefile")));
    }

    #[test]
    fn test_enclosing_function_rust() {
        let source = "fn outer() {\n    let x = inner(1);\n}\n\nfn inner(v: u32) -> u32 {\n    v + 1\n}\n";
        let grammar = RustGrammar;
        let tree = parse_source(&grammar, source).unwrap();

        let node = enclosing_function(&grammar, &tree, 2, 14).unwrap();
        assert_eq!(grammar.function_name(node, source).as_deref(), Some("outer"));

        let node = enclosing_function(&grammar, &tree, 6, 5).unwrap();
        assert_eq!(grammar.function_name(node, source).as_deref(), Some("inner"));

        assert!(enclosing_function(&grammar, &tree, 4, 1).is_none());
        assert_eq!(function_nodes(&grammar, &tree).len(), 2);
    }
}
