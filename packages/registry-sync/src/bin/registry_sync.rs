//! Registry sync CLI
//!
//! `sync` acquires documents from a registry mirror and merges them;
//! `scan` merges what is already in the input directory.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use registry_sync::ai::GeminiExtractionService;
use registry_sync::pipeline::discover_entities;
use registry_sync::sessions::DirectoryMirror;
use registry_sync::{
    EntitySyncOrchestrator, FileContentExtractor, JsonFileStore, MetadataMerger, ProgressLog,
    ResilientExtractionClient, SyncConfig, SyncSummary,
};

#[derive(Parser)]
#[command(name = "registry-sync")]
#[command(about = "Sync registry documents and merge them into per-entity records")]
struct Cli {
    /// Print the run summary as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire documents from a registry mirror, then merge
    Sync {
        /// Mirror root holding one directory per entity
        #[arg(long)]
        mirror: PathBuf,

        /// Entity ids (default: every entity in the mirror)
        entity_ids: Vec<String>,
    },

    /// Merge documents already in the input directory
    Scan {
        /// Entity ids (default: every entity in the input directory)
        entity_ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,registry_sync=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env()?;

    let service = GeminiExtractionService::new(gemini_client::GeminiClient::new(
        config.gemini_api_key.clone(),
    ))
    .with_model(config.gemini_model.clone());
    let client = ResilientExtractionClient::new(service)
        .with_policy(config.retry_policy())
        .with_max_concurrent_calls(config.max_concurrent_calls)
        .with_requests_per_minute(config.requests_per_minute);
    let merger = MetadataMerger::new(
        Arc::new(client),
        Arc::new(FileContentExtractor::new()),
        Arc::new(JsonFileStore::new(config.output_dir.clone())),
    );

    let summary = match cli.command {
        Commands::Sync { mirror, entity_ids } => {
            let ids = resolve_ids(entity_ids, &mirror).await?;
            let orchestrator = EntitySyncOrchestrator::new(merger, config.orchestrator_config())
                .with_observer(Arc::new(ProgressLog::new(ids.len())));
            cancel_on_ctrl_c(&orchestrator);
            orchestrator.sync(&DirectoryMirror::new(mirror), &ids).await
        }
        Commands::Scan { entity_ids } => {
            let ids = resolve_ids(entity_ids, &config.input_dir).await?;
            let orchestrator = EntitySyncOrchestrator::new(merger, config.orchestrator_config())
                .with_observer(Arc::new(ProgressLog::new(ids.len())));
            cancel_on_ctrl_c(&orchestrator);
            orchestrator.scan(&ids).await
        }
    };

    print_summary(&summary, cli.json)
}

async fn resolve_ids(explicit: Vec<String>, root: &Path) -> Result<Vec<String>> {
    if !explicit.is_empty() {
        return Ok(explicit);
    }
    discover_entities(root)
        .await
        .with_context(|| format!("Failed to list entities in {}", root.display()))
}

fn cancel_on_ctrl_c<E, C, S>(orchestrator: &EntitySyncOrchestrator<E, C, S>)
where
    E: registry_sync::ExtractionService + 'static,
    C: registry_sync::ContentExtractor + 'static,
    S: registry_sync::SnapshotStore + 'static,
{
    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing scheduled merges");
            token.cancel();
        }
    });
}

fn print_summary(summary: &SyncSummary, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
        println!("{}", out);
    } else {
        print!("{}", summary);
    }
    Ok(())
}
