use std::path::PathBuf;

use thiserror::Error;

/// Main error type for CallGraphite operations
#[derive(Error, Debug)]
pub enum CallGraphiteError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parser error: {0}")]
    Parser(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No function encloses {path}:{line}:{column}")]
    LocationNotFound {
        path: PathBuf,
        line: usize,
        column: usize,
    },

    #[error("Reference query failed: {0}")]
    ReferenceQueryFailed(String),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("Result cache consistency violated: {0}")]
    CacheConsistency(String),

    #[error("Traversal was cancelled")]
    Cancelled,
}

/// Failure of a single request to the reasoning service.
///
/// Kept separate from [`CallGraphiteError`] because one outcome is handed to
/// every waiter of an in-flight computation, so it has to be `Clone`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("Analysis request timed out after {0}s")]
    Timeout(u64),

    #[error("Analysis service error: {0}")]
    RemoteError(String),

    #[error("Analysis service rate limited the request")]
    RateLimited,
}

pub type Result<T> = std::result::Result<T, CallGraphiteError>;
