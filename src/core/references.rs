//! Resolving the calls made inside a function to the definitions they reach.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::ProjectConfig;
use crate::error::{CallGraphiteError, Result};
use super::languages::{self, Languages};
use super::model::{CallSite, Position};

/// Resolves a function position to the call sites reachable from it.
#[async_trait]
pub trait ReferenceResolver: Send + Sync {
    /// Every call inside the function at `position` whose callee could be
    /// resolved, in source order. Fails with
    /// [`CallGraphiteError::ReferenceQueryFailed`].
    async fn find_references(&self, position: &Position) -> Result<Vec<CallSite>>;
}

/// Function definitions in a project, by bare name
#[derive(Debug, Default)]
pub struct DefinitionIndex {
    definitions: HashMap<String, Vec<Position>>,
    files: usize,
}

impl DefinitionIndex {
    /// Walk `root` honouring .gitignore and the configured ignore patterns
    pub fn build(root: &Path, project: &ProjectConfig, languages: &Languages) -> Result<Self> {
        let mut overrides = OverrideBuilder::new(root);
        for pattern in &project.ignore_patterns {
            overrides
                .add(&format!("!{}", pattern))
                .map_err(|e| CallGraphiteError::Config(format!("Bad ignore pattern {}: {}", pattern, e)))?;
        }
        let overrides = overrides
            .build()
            .map_err(|e| CallGraphiteError::Config(e.to_string()))?;

        let walker = WalkBuilder::new(root)
            .hidden(false)
            .git_ignore(true)
            .overrides(overrides)
            .max_filesize(Some(project.max_file_size))
            .build();

        let mut index = Self::default();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() || !languages.supports(path) {
                continue;
            }
            // Non UTF-8 files cannot hold code we can parse
            let Ok(source) = std::fs::read_to_string(path) else {
                continue;
            };
            index.add_file(path, &source, languages);
        }

        for positions in index.definitions.values_mut() {
            positions.sort();
            positions.dedup();
        }
        Ok(index)
    }

    fn add_file(&mut self, path: &Path, source: &str, languages: &Languages) {
        for (name, position) in definitions_in(path, source, languages) {
            self.definitions.entry(name).or_default().push(position);
        }
        self.files += 1;
    }

    pub fn lookup(&self, name: &str) -> &[Position] {
        self.definitions.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn file_count(&self) -> usize {
        self.files
    }

    pub fn definition_count(&self) -> usize {
        self.definitions.values().map(Vec::len).sum()
    }
}

/// (name, start position) of every named function in one file
fn definitions_in(path: &Path, source: &str, languages: &Languages) -> Vec<(String, Position)> {
    let Some(grammar) = languages.for_path(path) else {
        return Vec::new();
    };
    let Ok(tree) = languages::parse_source(grammar.as_ref(), source) else {
        return Vec::new();
    };

    languages::function_nodes(grammar.as_ref(), &tree)
        .into_iter()
        .filter_map(|node| {
            let name = grammar.function_name(node, source)?;
            let (line, column) = languages::line_col(node.start_position());
            Some((name, Position::new(path, line, column)))
        })
        .collect()
}

/// Resolver over a lazily built [`DefinitionIndex`] of the project.
///
/// Calls resolve by bare name: a definition in the calling file wins, otherwise
/// the first indexed definition by path and line. Unresolved calls (library
/// functions, dynamic dispatch) are dropped.
pub struct SourceIndexResolver {
    root: PathBuf,
    project: ProjectConfig,
    languages: Languages,
    index: OnceCell<Arc<DefinitionIndex>>,
}

impl SourceIndexResolver {
    pub fn new(project: &ProjectConfig) -> Self {
        Self {
            root: project.root.clone(),
            project: project.clone(),
            languages: Languages::new(),
            index: OnceCell::new(),
        }
    }

    async fn index(&self) -> Result<Arc<DefinitionIndex>> {
        self.index
            .get_or_try_init(|| async {
                let root = tokio::fs::canonicalize(&self.root).await.map_err(|e| {
                    CallGraphiteError::ReferenceQueryFailed(format!(
                        "project root {}: {}",
                        self.root.display(),
                        e
                    ))
                })?;
                let project = self.project.clone();
                let languages = self.languages.clone();

                info!("Indexing function definitions under {}", root.display());
                let index = tokio::task::spawn_blocking(move || {
                    DefinitionIndex::build(&root, &project, &languages)
                })
                .await
                .map_err(|e| CallGraphiteError::ReferenceQueryFailed(format!("indexing aborted: {}", e)))??;

                info!(
                    "Indexed {} definitions in {} files",
                    index.definition_count(),
                    index.file_count()
                );
                Ok(Arc::new(index))
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl ReferenceResolver for SourceIndexResolver {
    async fn find_references(&self, position: &Position) -> Result<Vec<CallSite>> {
        let failed = |reason: String| {
            CallGraphiteError::ReferenceQueryFailed(format!("{}: {}", position, reason))
        };

        let path = tokio::fs::canonicalize(&position.path)
            .await
            .map_err(|e| failed(e.to_string()))?;
        let source = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| failed(e.to_string()))?;
        let index = self.index().await?;

        let grammar = self
            .languages
            .for_path(&path)
            .ok_or_else(|| failed("unsupported language".to_string()))?;
        let tree = languages::parse_source(grammar.as_ref(), &source)?;
        let function = languages::enclosing_function(grammar.as_ref(), &tree, position.line, position.column)
            .ok_or_else(|| failed("no enclosing function".to_string()))?;

        // The calling file is parsed anyway; its own definitions take priority
        // and cover files outside the indexed root.
        let mut local: HashMap<String, Position> = HashMap::new();
        for (name, definition) in definitions_in(&path, &source, &self.languages) {
            local.entry(name).or_insert(definition);
        }

        let mut sites = Vec::new();
        for call in languages::call_nodes(grammar.as_ref(), function) {
            let Some(callee) = grammar.callee_name(call, &source) else {
                continue;
            };
            let target = local
                .get(&callee)
                .cloned()
                .or_else(|| index.lookup(&callee).first().cloned());

            match target {
                Some(target) => {
                    let (line, column) = languages::line_col(call.start_position());
                    sites.push(CallSite {
                        callee,
                        site: Position::new(&path, line, column),
                        target,
                    });
                }
                None => debug!("No definition found for call to {}", callee),
            }
        }

        Ok(sites)
    }
}
