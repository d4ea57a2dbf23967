use async_trait::async_trait;

use crate::error::AnalysisError;

/// A remote reasoning service: one prompt in, one text reply out.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Send `prompt` and return the model's reply
    async fn analyze(&self, prompt: &str) -> std::result::Result<String, AnalysisError>;

    /// Get the provider name (e.g., "DeepSeek", "OpenAI")
    fn provider_name(&self) -> &str;

    /// Get the model name being used
    fn model_name(&self) -> &str;
}
