use std::path::PathBuf;
use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use callgraphite::core::{Engine, OutputFormat};

#[derive(Parser)]
#[command(name = "callgraphite")]
#[command(about = "Explore a call graph and explain it with an LLM")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze the function at a position and everything it calls
    Analyze {
        /// Source file containing the root function
        file: PathBuf,

        /// 1-based line inside the root function
        line: usize,

        /// 1-based column inside the root function
        #[arg(default_value_t = 1)]
        column: usize,

        /// Deepest call level to analyze (root is 0)
        #[arg(long)]
        max_depth: Option<usize>,

        /// Calls followed per function
        #[arg(long)]
        max_breadth: Option<usize>,

        /// Sibling subtrees analyzed concurrently
        #[arg(long)]
        parallel: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "report")]
        format: OutputFormat,

        /// Step back and forth through analyzed functions afterwards
        #[arg(long)]
        explore: bool,

        /// Analyze repeated functions again instead of reusing results
        #[arg(long)]
        no_cache: bool,

        /// Skip the synthesis pass over callee analyses
        #[arg(long)]
        preliminary_only: bool,
    },

    /// Print the function enclosing a position
    Capture {
        file: PathBuf,

        line: usize,

        #[arg(default_value_t = 1)]
        column: usize,
    },

    /// Write a default configuration file
    Init {
        /// Target directory (defaults to current directory)
        #[arg(short, long)]
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    pub async fn execute(self, mut engine: Engine) -> Result<()> {
        match self.command {
            Commands::Analyze {
                file,
                line,
                column,
                max_depth,
                max_breadth,
                parallel,
                format,
                explore,
                no_cache,
                preliminary_only,
            } => {
                engine.configure(|config| {
                    if let Some(depth) = max_depth {
                        config.traversal.max_depth = depth;
                    }
                    if let Some(breadth) = max_breadth {
                        config.traversal.max_breadth_per_node = breadth;
                    }
                    if let Some(parallel) = parallel {
                        config.traversal.max_parallel_branches = parallel;
                    }
                    if no_cache {
                        config.analysis.cache_results = false;
                    }
                    if preliminary_only {
                        config.analysis.comprehensive = false;
                    }
                })?;

                let cancel = CancellationToken::new();
                let ctrl_c = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
                let report = engine.analyze(&file, line, column, cancel).await;
                ctrl_c.abort();
                let report = report?;

                println!("{}", engine.render(&report, format)?);

                if explore {
                    explore_history(&engine).await?;
                }
                Ok(())
            }
            Commands::Capture { file, line, column } => {
                let located = engine.capture(&file, line, column).await?;
                println!("{}", located.text);
                Ok(())
            }
            Commands::Init { path, force } => {
                let written = engine.init(path, force).await?;
                println!("{}", written.display());
                Ok(())
            }
        }
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupted; cancelling the traversal");
        cancel.cancel();
    }
}

/// Interactive jump list over the analyzed functions, driven from stdin
async fn explore_history(engine: &Engine) -> Result<()> {
    let session = engine.session();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    if let Some(text) = engine.describe_focus() {
        stdout.write_all(text.as_bytes()).await?;
    }

    loop {
        stdout
            .write_all(b"\n[b]ack, [f]orward, [s]how, [q]uit > ")
            .await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let moved = match line.trim() {
            "b" | "back" => session.move_back(),
            "f" | "forward" => session.move_forward(),
            "s" | "show" => session.current_focus(),
            "q" | "quit" => break,
            "" => continue,
            other => {
                info!("Unknown command: {}", other);
                continue;
            }
        };

        match moved.and_then(|_| engine.describe_focus()) {
            Some(text) => stdout.write_all(text.as_bytes()).await?,
            None => stdout.write_all(b"Nothing there.\n").await?,
        }
    }
    Ok(())
}
