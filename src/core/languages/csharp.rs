use tree_sitter::Language;

use super::LanguageGrammar;

/// C# grammar: methods, constructors and local functions
pub struct CSharpGrammar;

impl LanguageGrammar for CSharpGrammar {
    fn language(&self) -> Language {
        tree_sitter_c_sharp::language()
    }

    fn language_name(&self) -> &str {
        "csharp"
    }

    fn file_extensions(&self) -> &[&str] {
        &["cs"]
    }

    fn function_kinds(&self) -> &[&str] {
        &[
            "method_declaration",
            "constructor_declaration",
            "local_function_statement",
        ]
    }

    fn call_kinds(&self) -> &[&str] {
        &["invocation_expression"]
    }
}
