//! Resolving a cursor position to the function that encloses it.

use std::path::Path;
use async_trait::async_trait;
use tracing::debug;

use crate::error::{CallGraphiteError, Result};
use super::languages::{self, Languages, node_text};
use super::model::{FunctionId, LocatedFunction, Position, Span};

/// Resolves a position to the exact text span of the function around it.
#[async_trait]
pub trait FunctionLocator: Send + Sync {
    /// Fails with [`CallGraphiteError::LocationNotFound`] when no function encloses `position`
    async fn locate(&self, position: &Position) -> Result<LocatedFunction>;
}

/// Locator backed by the tree-sitter grammars in [`Languages`]
#[derive(Clone, Default)]
pub struct TreeSitterLocator {
    languages: Languages,
}

impl TreeSitterLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locate inside already loaded source text. `path` becomes part of the id as given.
    pub fn locate_in_source(
        &self,
        path: &Path,
        source: &str,
        line: usize,
        column: usize,
    ) -> Result<LocatedFunction> {
        let not_found = || CallGraphiteError::LocationNotFound {
            path: path.to_path_buf(),
            line,
            column,
        };

        let grammar = self.languages.for_path(path).ok_or_else(not_found)?;
        let tree = languages::parse_source(grammar.as_ref(), source)?;
        let node = languages::enclosing_function(grammar.as_ref(), &tree, line, column)
            .ok_or_else(not_found)?;

        let span = Span {
            start_byte: node.start_byte(),
            end_byte: node.end_byte(),
            start: languages::line_col(node.start_position()),
            end: languages::line_col(node.end_position()),
        };
        let name = grammar
            .function_name(node, source)
            .unwrap_or_else(|| "<anonymous>".to_string());

        Ok(LocatedFunction {
            id: FunctionId::from_span(path, &span),
            name,
            text: node_text(node, source).to_string(),
            span,
        })
    }
}

#[async_trait]
impl FunctionLocator for TreeSitterLocator {
    async fn locate(&self, position: &Position) -> Result<LocatedFunction> {
        let not_found = || CallGraphiteError::LocationNotFound {
            path: position.path.clone(),
            line: position.line,
            column: position.column,
        };

        // Canonical paths keep ids equal no matter how a file was reached
        let path = tokio::fs::canonicalize(&position.path).await.map_err(|e| {
            debug!("Cannot resolve {}: {}", position.path.display(), e);
            not_found()
        })?;
        let source = tokio::fs::read_to_string(&path).await.map_err(|e| {
            debug!("Cannot read {}: {}", path.display(), e);
            not_found()
        })?;

        self.locate_in_source(&path, &source, position.line, position.column)
    }
}
