//! Turnstile CLI - Replay transcripts through a compacting session

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use turnstile_core::prelude::*;

#[derive(Parser)]
#[command(name = "turnstile")]
#[command(about = "Turn-aware conversation compaction", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed a JSON-lines transcript through a session and print the result
    Replay {
        /// Transcript file, one item per line
        file: PathBuf,

        /// Config file layered over turnstile.toml, in place of
        /// TURNSTILE_CONFIG_PATH (TURNSTILE_* env overrides still apply)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Turns kept verbatim after compaction
        #[arg(short, long)]
        keep: Option<usize>,

        /// Real user turns allowed before compaction
        #[arg(short, long)]
        limit: Option<usize>,

        /// Print records with metadata instead of the model view
        #[arg(long)]
        full: bool,
    },
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("turnstile {}", env!("CARGO_PKG_VERSION"));
            println!("turnstile-core {}", turnstile_core::VERSION);
        }
        Commands::Replay {
            file,
            config,
            keep,
            limit,
            full,
        } => {
            let mut config = CompactionConfig::load_with(config.as_deref())?;
            if let Some(keep) = keep {
                config.keep_last_n_turns = keep;
            }
            if let Some(limit) = limit {
                config.context_limit = limit;
            }

            replay(&file, &config, full).await?;
        }
    }

    Ok(())
}

async fn replay(file: &Path, config: &CompactionConfig, full: bool) -> Result<()> {
    let session = CompactingSession::from_config(config)?;
    let transcript = std::fs::read_to_string(file)
        .with_context(|| format!("reading transcript {}", file.display()))?;

    for line in transcript.lines().filter(|l| !l.trim().is_empty()) {
        session.add_items(vec![parse_line(line)]).await;
    }

    let stats = session.stats().await;
    tracing::info!(
        session_id = session.session_id(),
        records = session.len().await,
        real_turns = session.real_turn_count().await,
        applied = stats.applied,
        failed = stats.failed,
        "replay finished"
    );

    let output = if full {
        serde_json::to_string_pretty(&session.get_full_history(None).await)?
    } else {
        serde_json::to_string_pretty(&session.get_items(None).await)?
    };
    println!("{}", output);

    Ok(())
}

/// Lines that are not JSON objects become plain user content
fn parse_line(line: &str) -> RawItem {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => map,
        _ => {
            let mut map = RawItem::new();
            map.insert("content".to_string(), Value::String(line.to_string()));
            map
        }
    }
}
