use tree_sitter::Language;

use super::LanguageGrammar;

/// Rust grammar: free functions, methods and trait default methods
pub struct RustGrammar;

impl LanguageGrammar for RustGrammar {
    fn language(&self) -> Language {
        tree_sitter_rust::language()
    }

    fn language_name(&self) -> &str {
        "rust"
    }

    fn file_extensions(&self) -> &[&str] {
        &["rs"]
    }

    fn function_kinds(&self) -> &[&str] {
        &["function_item"]
    }

    // Method calls are call_expressions over a field_expression; macros are skipped
    fn call_kinds(&self) -> &[&str] {
        &["call_expression"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::{call_nodes, enclosing_function, parse_source};

    #[test]
    fn test_rust_callee_names() {
        let source = r#"
impl App {
    fn run(&self) {
        let cfg = Config::load("x");
        self.execute(cfg);
        helper::<u8>();
        println!("done");
    }
}
"#;
        let grammar = RustGrammar;
        let tree = parse_source(&grammar, source).unwrap();
        let function = enclosing_function(&grammar, &tree, 5, 9).unwrap();
        assert_eq!(grammar.function_name(function, source).as_deref(), Some("run"));

        let names: Vec<String> = call_nodes(&grammar, function)
            .into_iter()
            .filter_map(|n| grammar.callee_name(n, source))
            .collect();
        assert_eq!(names, vec!["load", "execute", "helper"]);
    }
}
