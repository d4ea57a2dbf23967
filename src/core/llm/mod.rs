//! LLM integration for function analysis
//!
//! The traversal only sees the [`AnalysisClient`] trait; providers speak HTTP
//! to a concrete service and prompts build the text sent in each phase.

mod client;
mod providers;
pub mod prompts;

pub use client::AnalysisClient;
pub use providers::{ChatCompletionsClient, create_client};
