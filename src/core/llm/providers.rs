use std::time::Duration;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;

use crate::config::LlmConfig;
use crate::error::{AnalysisError, CallGraphiteError, Result};
use super::client::AnalysisClient;

const SYSTEM_PROMPT: &str = "You are an expert software engineer reading unfamiliar code. \
Explain what functions do precisely and concisely, and point out the calls that matter.";

/// Factory function to create the analysis client described by config
pub fn create_client(config: &LlmConfig) -> Result<Box<dyn AnalysisClient>> {
    Ok(Box::new(ChatCompletionsClient::new(config)?))
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint
/// (OpenAI, DeepSeek, Ollama, LM Studio, ...)
pub struct ChatCompletionsClient {
    config: LlmConfig,
    client: reqwest::Client,
    provider: String,
}

impl ChatCompletionsClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let is_local = config.endpoint.contains("localhost") || config.endpoint.contains("127.0.0.1");
        if config.api_key.as_deref().map_or(true, str::is_empty) && !is_local {
            return Err(CallGraphiteError::Config(
                "API key required for remote LLM endpoints (set llm.api_key or OPENAI_API_KEY)"
                    .to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CallGraphiteError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config: config.clone(),
            client,
            provider: provider_label(&config.endpoint).to_string(),
        })
    }

    fn payload(&self, prompt: &str) -> serde_json::Value {
        json!({
            "model": self.config.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt }
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature
        })
    }
}

#[async_trait]
impl AnalysisClient for ChatCompletionsClient {
    async fn analyze(&self, prompt: &str) -> std::result::Result<String, AnalysisError> {
        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json")
            .json(&self.payload(prompt));
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AnalysisError::Timeout(self.config.timeout_secs)
            } else {
                AnalysisError::RemoteError(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AnalysisError::RateLimited);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AnalysisError::RemoteError(format!("{} {}", status, error_text)));
        }

        let response_data: serde_json::Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                AnalysisError::Timeout(self.config.timeout_secs)
            } else {
                AnalysisError::RemoteError(format!("unreadable response: {}", e))
            }
        })?;

        if let Some(usage) = response_data.get("usage") {
            debug!("{} tokens used: {}", self.provider, usage["total_tokens"]);
        }

        extract_content(&response_data)
    }

    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

fn extract_content(response: &serde_json::Value) -> std::result::Result<String, AnalysisError> {
    response["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AnalysisError::RemoteError("response carried no message content".to_string()))
}

fn provider_label(endpoint: &str) -> &'static str {
    if endpoint.contains("deepseek") {
        "DeepSeek"
    } else if endpoint.contains("openai.com") {
        "OpenAI"
    } else if endpoint.contains("localhost") || endpoint.contains("127.0.0.1") {
        "Local"
    } else {
        "OpenAI-compatible"
    }
}
