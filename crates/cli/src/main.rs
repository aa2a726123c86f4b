//! Cortex CLI - local, knowledge-backed, tool-using assistant.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cortex_ai::{Assistant, CancellationToken, StreamEvent, Termination};
use cortex_backend::OllamaClient;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cortex")]
#[command(about = "Ask a local model questions about your files", long_about = None)]
struct Cli {
    /// Configuration file (TOML); falls back to $CORTEX_CONFIG, then ./cortex.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question
    Ask {
        /// The question
        query: String,
        /// Print the answer as it is generated
        #[arg(long)]
        stream: bool,
    },
    /// Index files or directories into the knowledge store
    Index {
        /// Files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Add a piece of knowledge directly
    Add {
        /// Text to remember
        text: String,
    },
    /// Show knowledge store statistics
    Stats,
    /// Remove everything from the knowledge store
    Clear,
    /// List the capabilities offered to the model
    Tools,
    /// Check that the model server is reachable
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = config::resolve_path(cli.config, std::env::var(config::CONFIG_ENV).ok());
    let config = config::load_or_default(config_path.as_deref())?;

    let client = Arc::new(OllamaClient::new(config.llm.base_url.clone()));

    let assistant = Assistant::with_default_capabilities(config, client.clone(), client.clone())?;
    assistant
        .load_knowledge()
        .await
        .context("Failed to load the knowledge store")?;

    match cli.command {
        Commands::Ask { query, stream } => {
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            if stream {
                ask_streaming(&assistant, query, cancel).await?;
            } else {
                let answer = assistant.ask_with_cancel(&query, cancel).await?;
                if answer.termination == Termination::IterationLimit {
                    warn!("Stopped after {} tool rounds", answer.iterations);
                }
                println!("{}", answer.content);
            }
        }
        Commands::Index { paths } => {
            let mut files = 0;
            let mut dirs = Vec::new();
            for path in paths {
                if path.is_dir() {
                    dirs.push(path);
                } else {
                    let chunks = assistant.index_file(&path).await?;
                    println!("✓ Indexed: {} ({} chunks)", path.display(), chunks);
                    if chunks > 0 {
                        files += 1;
                    }
                }
            }
            if !dirs.is_empty() {
                files += assistant.index_directories(&dirs).await?;
            }
            println!("Indexed {} files ({} documents in store)", files, assistant.knowledge_count().await);
        }
        Commands::Add { text } => {
            let id = assistant.add_knowledge(&text).await?;
            println!("Added knowledge: {}", id);
        }
        Commands::Stats => {
            let config = assistant.config();
            println!("Cortex Status");
            println!("  Documents: {}", assistant.knowledge_count().await);
            println!("  Store: {}", config.storage.store_file().display());
            println!("  Chat model: {}", config.llm.model);
            println!("  Embedding model: {}", config.embedding.model);
            println!("  Granted permission: {}", config.permissions.granted);
        }
        Commands::Clear => {
            let removed = assistant.knowledge_count().await;
            assistant.clear_knowledge().await?;
            println!("Removed {} documents", removed);
        }
        Commands::Tools => {
            let specs = assistant.available_capabilities();
            println!("Capabilities ({})", specs.len());
            for spec in specs {
                println!("  {} [{}] - {}", spec.name, spec.required_permission, spec.description);
            }
        }
        Commands::Health => health(&client).await?,
    }

    Ok(())
}

async fn ask_streaming(assistant: &Assistant, query: String, cancel: CancellationToken) -> Result<()> {
    let mut events = assistant.stream(query, cancel);
    let mut stdout = std::io::stdout();

    while let Some(event) = events.recv().await {
        match event? {
            StreamEvent::Fragment(text) => {
                print!("{}", text);
                stdout.flush()?;
            }
            StreamEvent::ToolCall(call) => {
                info!("Calling {} {}", call.name, call.arguments);
            }
            StreamEvent::ToolResult { name, is_error, .. } => {
                if is_error {
                    warn!("{} failed", name);
                }
            }
            StreamEvent::Done(answer) => {
                println!();
                if answer.termination == Termination::IterationLimit {
                    println!("{}", answer.content);
                }
            }
        }
    }
    Ok(())
}

async fn health(client: &OllamaClient) -> Result<()> {
    match client.health_check().await {
        Ok(true) => {
            println!("Model server at {} is up", client.url());
            Ok(())
        }
        Ok(false) => anyhow::bail!("Model server at {} answered with an error", client.url()),
        Err(e) => anyhow::bail!("Model server at {} is unreachable: {}", client.url(), e),
    }
}
