mod engine;
mod cache;
mod navigation;
mod session;
mod traversal;
pub mod model;
pub mod call_graph;
pub mod languages;
pub mod llm;
pub mod locator;
pub mod references;
pub mod render;

pub use cache::{CacheEntry, CacheError, ResultCache};
pub use call_graph::{CallEdge, CallGraph, CallGraphStats, EdgeKind, GraphSnapshot};
pub use llm::{AnalysisClient, ChatCompletionsClient, create_client};
pub use locator::{FunctionLocator, TreeSitterLocator};
pub use model::{
    AnalysisResult, CallSite, FailureReason, FunctionId, FunctionNode, LocatedFunction, NodeState,
    Position, Span,
};
pub use navigation::NavigationHistory;
pub use references::{DefinitionIndex, ReferenceResolver, SourceIndexResolver};
pub use render::{AsciiRenderer, GraphRenderer, MermaidFlowRenderer, MermaidRenderer, ReportRenderer};
pub use session::{NodeStateChange, Session, SessionOptions};
pub use traversal::{TraversalEngine, TraversalOptions, TraversalReport};

// Export the main engine
pub use engine::{Engine, OutputFormat};
