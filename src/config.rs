use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CallGraphiteError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,

    /// API key sent as a bearer token
    pub api_key: Option<String>,

    /// Model name (e.g., "deepseek-chat", "gpt-4o")
    pub model: String,

    /// Temperature for LLM responses (0.0 to 2.0)
    pub temperature: f32,

    /// Maximum tokens for LLM responses
    pub max_tokens: u32,

    /// Per-request timeout; a timed out request fails only its own node
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraversalConfig {
    /// Deepest call level that is analyzed (root is depth 0)
    pub max_depth: usize,

    /// Call sites kept per function after ranking
    pub max_breadth_per_node: usize,

    /// Sibling subtrees explored concurrently (1 = sequential)
    pub max_parallel_branches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Whether to run the synthesis pass over child analyses
    pub comprehensive: bool,

    /// Whether to reuse analysis results within a session
    pub cache_results: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Keep graph, cache and history between traversals instead of resetting them
    pub resume: bool,

    /// Keep cached analyses when a new traversal resets the session
    pub keep_cache: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationConfig {
    /// Whether to print diagrams after a traversal
    pub enabled: bool,

    /// Render an indented ASCII tree
    pub ascii_graph: bool,

    /// Render a Mermaid flowchart
    pub mermaid_graph: bool,

    /// Render a Mermaid sequence diagram of the call flow
    pub mermaid_flow: bool,

    /// Deepest level drawn by the renderers
    pub max_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Root directory indexed by the reference resolver
    pub root: PathBuf,

    /// Extra ignore globs on top of .gitignore
    pub ignore_patterns: Vec<String>,

    /// Maximum file size to index (in bytes)
    pub max_file_size: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Reasoning service settings
    pub llm: LlmConfig,

    /// Traversal bounds
    pub traversal: TraversalConfig,

    /// Analysis protocol switches
    pub analysis: AnalysisConfig,

    /// Session lifecycle
    pub session: SessionConfig,

    /// Diagram output
    pub visualization: VisualizationConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.deepseek.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "deepseek-chat".to_string(),
            temperature: 0.3,
            max_tokens: 4096,
            timeout_secs: 120,
        }
    }
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_breadth_per_node: 8,
            max_parallel_branches: 1,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            comprehensive: true,
            cache_results: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            resume: false,
            keep_cache: false,
        }
    }
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ascii_graph: true,
            mermaid_graph: true,
            mermaid_flow: true,
            max_depth: 5,
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            ignore_patterns: vec![
                "target/".to_string(),
                "node_modules/".to_string(),
                ".git/".to_string(),
            ],
            max_file_size: 1024 * 1024, // 1MB
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| CallGraphiteError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| CallGraphiteError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default, then apply environment overrides
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)?
                } else {
                    Self::default()
                }
            }
            None => match Self::find_config_file() {
                Some(found) => Self::load(found)?,
                None => Self::default(),
            },
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Path of the per-user config file, e.g. `~/.config/callgraphite/config.toml`
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("callgraphite").join("config.toml"))
    }

    fn find_config_file() -> Option<PathBuf> {
        let candidates = [
            "CallGraphite.toml",
            "callgraphite.toml",
            ".callgraphite.toml",
        ];

        for candidate in &candidates {
            if Path::new(candidate).exists() {
                return Some(PathBuf::from(candidate));
            }
        }

        Self::user_config_path().filter(|p| p.exists())
    }

    /// Environment wins over the file for credentials and model selection
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.llm.api_key = Some(key);
        }
        if let Some(model) = lookup("OPENAI_MODEL").filter(|m| !m.is_empty()) {
            self.llm.model = model;
        }
        if let Some(endpoint) = lookup("CALLGRAPHITE_ENDPOINT").filter(|e| !e.is_empty()) {
            self.llm.endpoint = endpoint;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.traversal.max_parallel_branches == 0 {
            return Err(CallGraphiteError::Config(
                "traversal.max_parallel_branches must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(CallGraphiteError::Config(format!(
                "llm.temperature must be within 0.0..=2.0, got {}",
                self.llm.temperature
            )));
        }
        if self.llm.timeout_secs == 0 {
            return Err(CallGraphiteError::Config(
                "llm.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
