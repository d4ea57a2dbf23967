use tree_sitter::Language;

use super::LanguageGrammar;

/// Python grammar: `def` functions and methods (async included)
pub struct PythonGrammar;

impl LanguageGrammar for PythonGrammar {
    fn language(&self) -> Language {
        tree_sitter_python::language()
    }

    fn language_name(&self) -> &str {
        "python"
    }

    fn file_extensions(&self) -> &[&str] {
        &["py", "pyi"]
    }

    fn function_kinds(&self) -> &[&str] {
        &["function_definition"]
    }

    fn call_kinds(&self) -> &[&str] {
        &["call"]
    }
}
