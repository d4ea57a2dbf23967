use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::ValueEnum;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use super::llm::{AnalysisClient, create_client};
use super::locator::{FunctionLocator, TreeSitterLocator};
use super::model::{LocatedFunction, NodeState, Position};
use super::references::SourceIndexResolver;
use super::render::{
    AsciiRenderer, Diagrams, GraphRenderer, MermaidFlowRenderer, MermaidRenderer, ReportRenderer,
    create_renderers,
};
use super::session::{NodeStateChange, Session, SessionOptions};
use super::traversal::{TraversalEngine, TraversalOptions, TraversalReport};

/// How `analyze` prints its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Indented call tree
    Ascii,
    /// Mermaid flowchart
    Mermaid,
    /// Mermaid sequence diagram of the call flow
    Flow,
    /// Report, statistics and graph snapshot as JSON
    Json,
    /// Markdown report with every analysis
    Report,
}

/// Main orchestration engine for CallGraphite
pub struct Engine {
    config: Config,
    session: Session,
}

impl Engine {
    /// Create a new engine instance from the config file at `config_path`
    /// (or the first one found, or defaults)
    pub async fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;
        debug!("Loaded configuration: {:?}", config);
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        let session = Session::new(session_options(&config));
        Self { config, session }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Apply command-line overrides. The session is rebuilt so cache settings take effect.
    pub fn configure(&mut self, apply: impl FnOnce(&mut Config)) -> Result<()> {
        apply(&mut self.config);
        self.config.validate()?;
        self.session = Session::new(session_options(&self.config));
        Ok(())
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Explore the call graph below the function at `file:line:column`
    pub async fn analyze(
        &self,
        file: &Path,
        line: usize,
        column: usize,
        cancel: CancellationToken,
    ) -> Result<TraversalReport> {
        let client: Arc<dyn AnalysisClient> = Arc::from(
            create_client(&self.config.llm).context("Failed to initialize the analysis client")?,
        );
        info!(
            "✅ Analysis client ready: {} ({})",
            client.provider_name(),
            client.model_name()
        );

        let traversal = TraversalEngine::new(
            Arc::new(TreeSitterLocator::new()),
            Arc::new(SourceIndexResolver::new(&self.config.project)),
            client,
            TraversalOptions::from_config(&self.config),
        )
        .with_cancellation(cancel);

        let progress = tokio::spawn(report_progress(self.session.subscribe()));

        let root = Position::new(file, line, column);
        info!("🔍 Exploring calls from {}", root);
        let result = traversal
            .traverse(&self.session, &root)
            .await
            .with_context(|| format!("Traversal from {} failed", root));
        progress.abort();

        let report = result?;
        if report.failed > 0 {
            warn!("{} function(s) could not be analyzed", report.failed);
        }
        Ok(report)
    }

    /// Text of the function enclosing `file:line:column`
    pub async fn capture(&self, file: &Path, line: usize, column: usize) -> Result<LocatedFunction> {
        let position = Position::new(file, line, column);
        let located = TreeSitterLocator::new()
            .locate(&position)
            .await
            .with_context(|| format!("Could not capture a function at {}", position))?;
        info!(
            "Captured {} ({} lines)",
            located.name,
            located.span.end.0 - located.span.start.0 + 1
        );
        Ok(located)
    }

    /// Write a default config file into `path` (or the current directory)
    pub async fn init(&self, path: Option<PathBuf>, force: bool) -> Result<PathBuf> {
        let target_dir = match path {
            Some(path) => path,
            None => std::env::current_dir().context("Cannot determine the current directory")?,
        };
        let target = target_dir.join("callgraphite.toml");
        if target.exists() && !force {
            anyhow::bail!(
                "{} already exists (use --force to overwrite)",
                target.display()
            );
        }

        tokio::fs::create_dir_all(&target_dir).await?;
        Config::default().save(&target)?;
        info!("Initialized CallGraphite config at {}", target.display());
        Ok(target)
    }

    /// Render the session's graph for `report`
    pub fn render(&self, report: &TraversalReport, format: OutputFormat) -> Result<String> {
        let snapshot = self.session.snapshot();
        let visualization = &self.config.visualization;

        let output = match format {
            OutputFormat::Ascii => AsciiRenderer::new(visualization.max_depth).render(&snapshot),
            OutputFormat::Mermaid => MermaidRenderer::new(visualization.max_depth).render(&snapshot),
            OutputFormat::Flow => MermaidFlowRenderer::new(visualization.max_depth).render(&snapshot),
            OutputFormat::Json => serde_json::to_string_pretty(&serde_json::json!({
                "report": report,
                "statistics": self.session.statistics(),
                "graph": snapshot,
            }))?,
            OutputFormat::Report => {
                let mut diagrams = Diagrams::default();
                for renderer in create_renderers(visualization) {
                    let rendered = renderer.render(&snapshot);
                    match renderer.name() {
                        "ascii" => diagrams.tree = Some(rendered),
                        "mermaid" => diagrams.flowchart = Some(rendered),
                        "mermaid-flow" => diagrams.flow = Some(rendered),
                        _ => {}
                    }
                }
                ReportRenderer::new()?.render(report, &snapshot, &self.session.statistics(), &diagrams)?
            }
        };
        Ok(output)
    }

    /// Human-readable summary of the function navigation currently points at
    pub fn describe_focus(&self) -> Option<String> {
        let id = self.session.current_focus()?;
        let node = self.session.node(&id)?;

        let mut text = format!("{} ({}, depth {})\n", node.name, node.id, node.depth);
        match (&node.analysis, node.state) {
            (Some(analysis), _) => {
                text.push('\n');
                text.push_str(analysis.comprehensive.trim());
                text.push('\n');
            }
            (None, NodeState::Failed) => {
                if let Some(reason) = &node.failure {
                    text.push_str(&format!("Analysis failed: {}\n", reason));
                }
            }
            (None, _) => text.push_str("Not analyzed\n"),
        }
        Some(text)
    }
}

fn session_options(config: &Config) -> SessionOptions {
    SessionOptions {
        cache_results: config.analysis.cache_results,
        keep_cache_on_reset: config.session.keep_cache,
    }
}

async fn report_progress(mut events: broadcast::Receiver<NodeStateChange>) {
    let mut collected = 0usize;
    loop {
        match events.recv().await {
            Ok(change) => match change.new {
                NodeState::Analyzed => {
                    collected += 1;
                    info!("Collected {} functions (latest: {})", collected, change.name);
                }
                NodeState::Failed => warn!("✗ {} failed", change.name),
                NodeState::InProgress => debug!("→ {}", change.name),
                NodeState::Unvisited => {}
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Progress display skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
