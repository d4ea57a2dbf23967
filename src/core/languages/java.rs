use tree_sitter::Language;

use super::LanguageGrammar;

/// Java grammar: methods and constructors
pub struct JavaGrammar;

impl LanguageGrammar for JavaGrammar {
    fn language(&self) -> Language {
        tree_sitter_java::language()
    }

    fn language_name(&self) -> &str {
        "java"
    }

    fn file_extensions(&self) -> &[&str] {
        &["java"]
    }

    fn function_kinds(&self) -> &[&str] {
        &["method_declaration", "constructor_declaration"]
    }

    fn call_kinds(&self) -> &[&str] {
        &["method_invocation"]
    }

    // method_invocation keeps the bare method name in its own field
    fn callee_field(&self) -> &str {
        "name"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::{call_nodes, enclosing_function, parse_source};

    #[test]
    fn test_java_invocations() {
        let source = "class A {\n  void run() {\n    this.load();\n    Util.process(1);\n  }\n}\n";
        let grammar = JavaGrammar;
        let tree = parse_source(&grammar, source).unwrap();
        let function = enclosing_function(&grammar, &tree, 3, 5).unwrap();
        assert_eq!(grammar.function_name(function, source).as_deref(), Some("run"));

        let names: Vec<String> = call_nodes(&grammar, function)
            .into_iter()
            .filter_map(|n| grammar.callee_name(n, source))
            .collect();
        assert_eq!(names, vec!["load", "process"]);
    }
}
