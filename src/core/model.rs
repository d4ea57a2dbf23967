// src/core/model.rs
use std::fmt;
use std::path::{Path, PathBuf};
use serde::{Serialize, Deserialize};

use crate::error::AnalysisError;

/// A cursor position inside a source file (1-based line and column)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub path: PathBuf,
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(path: impl Into<PathBuf>, line: usize, column: usize) -> Self {
        Self {
            path: path.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path.display(), self.line, self.column)
    }
}

/// Exact extent of a function in its file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start_byte: usize,
    pub end_byte: usize,
    /// (line, column), 1-based
    pub start: (usize, usize),
    /// (line, column), 1-based
    pub end: (usize, usize),
}

impl Span {
    pub fn contains(&self, line: usize, column: usize) -> bool {
        (line, column) >= self.start && (line, column) <= self.end
    }
}

/// Identity of a function: the file it lives in plus the start of its span.
///
/// Every position inside one span resolves to the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId {
    pub path: PathBuf,
    pub line: usize,
    pub column: usize,
}

impl FunctionId {
    pub fn from_span(path: &Path, span: &Span) -> Self {
        Self {
            path: path.to_path_buf(),
            line: span.start.0,
            column: span.start.1,
        }
    }

    /// Position of the function's first character
    pub fn position(&self) -> Position {
        Position::new(self.path.clone(), self.line, self.column)
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path.display(), self.line, self.column)
    }
}

/// Function text returned by a [`FunctionLocator`](super::FunctionLocator)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedFunction {
    pub id: FunctionId,
    pub name: String,
    pub text: String,
    pub span: Span,
}

/// A call made from inside a function
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallSite {
    /// Callee name as written at the call site (last path segment)
    pub callee: String,
    /// Where the call expression sits
    pub site: Position,
    /// Where the callee is defined; this is what gets traversed
    pub target: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeState {
    Unvisited,
    InProgress,
    Analyzed,
    Failed,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeState::Unvisited => "unvisited",
            NodeState::InProgress => "in-progress",
            NodeState::Analyzed => "analyzed",
            NodeState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Why a node ended up `failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Analysis(AnalysisError),
    Cancelled,
    /// The shared computation for this node vanished without an outcome
    CacheConsistency(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Analysis(e) => write!(f, "{}", e),
            FailureReason::Cancelled => f.write_str("cancelled"),
            FailureReason::CacheConsistency(msg) => write!(f, "cache consistency violated: {}", msg),
        }
    }
}

impl From<AnalysisError> for FailureReason {
    fn from(e: AnalysisError) -> Self {
        FailureReason::Analysis(e)
    }
}

/// Outcome of the two-phase protocol for one function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Phase 1: the function's text alone
    pub preliminary: String,
    /// Phase 2: preliminary plus the children's comprehensive analyses
    pub comprehensive: String,
    /// Callee names the model marked as important, most important first
    pub ranked_calls: Vec<String>,
    /// Call targets kept after ranking and breadth truncation
    pub retained_children: Vec<Position>,
}

/// One visited function in the call graph
#[derive(Debug, Clone)]
pub struct FunctionNode {
    pub id: FunctionId,
    pub name: String,
    pub source: String,
    pub depth: usize,
    pub state: NodeState,
    pub children: Vec<Position>,
    pub analysis: Option<AnalysisResult>,
    pub failure: Option<FailureReason>,
}

impl FunctionNode {
    pub fn new(located: LocatedFunction, depth: usize, state: NodeState) -> Self {
        Self {
            id: located.id,
            name: located.name,
            source: located.text,
            depth,
            state,
            children: Vec::new(),
            analysis: None,
            failure: None,
        }
    }
}
