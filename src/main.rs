//! Face index operator tool
//!
//! Inspects, matches against and purges event indexes on disk. Ingestion and
//! selfie queries need an embedding oracle and go through `IndexService`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use faceindex::config::Config;
use faceindex::embedding::{Embedding, EventId};
use faceindex::matcher::Matcher;
use faceindex::service::EventSummary;
use faceindex::storage::open_store;

/// Event photo face index
#[derive(Parser)]
#[command(name = "faceindex", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "FACEINDEX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show how many faces each photo of an event has
    Inspect {
        event_id: EventId,
    },
    /// Match a precomputed embedding against an event
    Match {
        event_id: EventId,
        /// Query embedding as a JSON array of numbers
        #[arg(long)]
        embedding: String,
        /// Override `matching.threshold`
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Delete the whole index of an event
    Purge {
        event_id: EventId,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout carries the JSON results
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(cli.config.as_deref())?;
    if let Command::Match {
        threshold: Some(threshold),
        ..
    } = &cli.command
    {
        config.matching.threshold = *threshold;
    }
    config.validate()?;

    info!(
        "Index root: {} ({:?} backend)",
        config.index.root.display(),
        config.index.backend
    );
    let store = open_store(&config.index).await?;

    let output = match cli.command {
        Command::Inspect { event_id } => {
            let records = store.list(event_id).await?;
            serde_json::to_value(EventSummary::from_records(event_id, &records))?
        }
        Command::Match {
            event_id, embedding, ..
        } => {
            let values: Vec<f32> = serde_json::from_str(&embedding)
                .context("--embedding must be a JSON array of numbers")?;
            let query = Embedding::new(values);

            let candidates = store.list(event_id).await?;
            let matcher = Matcher::new(config.matching.threshold);
            let mut matched: Vec<_> = matcher
                .match_candidates(&query, &candidates)
                .into_iter()
                .collect();
            matched.sort();

            json!({
                "matched_photo_ids": matched,
                "candidates_scanned": candidates.len(),
            })
        }
        Command::Purge { event_id } => {
            store.purge(event_id).await?;
            json!({ "success": true })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)?,
        None => Config::load(Config::default_path()).unwrap_or_else(|e| {
            info!("Using default config ({:#})", e);
            Config::default()
        }),
    };
    config.apply_env();
    Ok(config)
}
