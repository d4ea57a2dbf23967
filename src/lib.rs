//! CallGraphite explores a codebase's call graph from one function, analyzes
//! every reachable function with a remote reasoning service, and folds the
//! callees' analyses into each caller's summary.

pub mod config;
pub mod core;
pub mod error;

pub use crate::config::Config;
pub use crate::error::{AnalysisError, CallGraphiteError, Result};
