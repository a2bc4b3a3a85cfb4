//! genarc-ingest - AI image metadata ingestion
//!
//! `ingest` queues provider payload files through the pipeline;
//! `reconcile` renames an existing directory to canonical names.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use genarc_common::config::{default_config_path, resolve_root_folder, IngestConfig};
use genarc_common::events::EventBus;
use genarc_ingest::ledger::{omit_own_creations, NightCafeLedger};
use genarc_ingest::providers::firebase::{firebase_documents, is_firebase_raw};
use genarc_ingest::providers::{shared_store, AdapterContext, IngestOptions};
use genarc_ingest::reconcile::Reconciler;
use genarc_ingest::services::{ExifToolFactory, FileOps, ReqwestFetcher, WebpTranscoder};
use genarc_ingest::store::JsonFileStore;
use genarc_ingest::workflow::{Pipeline, PipelineConfig, WorkQueue};
use serde_json::Value;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for genarc-ingest
#[derive(Parser, Debug)]
#[command(name = "genarc-ingest")]
#[command(about = "Normalize AI image generation metadata and archive tagged images")]
#[command(version)]
struct Args {
    /// Root folder (overrides GENARC_ROOT and the config file)
    #[arg(short, long)]
    root_folder: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Queue payload files (JSON object, JSON array, or Firestore capture)
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Transcode downloads to WebP
        #[arg(long)]
        compressed: bool,

        /// Only store upscaled images
        #[arg(long)]
        upscales_only: bool,

        /// Skip NightCafe jobs already in the user's creation ledger
        #[arg(long)]
        new_only: bool,

        /// Skip jobs created by this user (repeatable)
        #[arg(long = "omit-user")]
        omit_users: Vec<String>,

        /// Record the payload's jobs as liked by this user
        #[arg(long)]
        liked_by: Option<String>,
    },

    /// Rename files in a directory to canonical names (dry run unless --commit)
    Reconcile {
        dir: PathBuf,

        #[arg(long)]
        commit: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);
    let config = IngestConfig::load_or_default(config_path.as_deref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    let root = resolve_root_folder(args.root_folder.as_deref(), &config);
    info!("Root folder: {}", root.display());

    match args.command {
        Command::Ingest {
            files,
            compressed,
            upscales_only,
            new_only,
            omit_users,
            liked_by,
        } => {
            let options = IngestOptions {
                compressed: compressed || config.compressed,
                upscales_only: upscales_only || config.upscales_only,
            };
            let filters = BatchFilters {
                new_only,
                omit_users,
                liked_by,
            };
            run_ingest(&config, &root, options, &files, filters).await
        }
        Command::Reconcile { dir, commit } => run_reconcile(&config, &root, &dir, commit).await,
    }
}

struct BatchFilters {
    new_only: bool,
    omit_users: Vec<String>,
    liked_by: Option<String>,
}

async fn adapter_context(config: &IngestConfig, cache_dir: &Path, options: IngestOptions) -> Result<AdapterContext> {
    tokio::fs::create_dir_all(cache_dir)
        .await
        .with_context(|| format!("Failed to create cache directory {}", cache_dir.display()))?;
    let fetch = ReqwestFetcher::new(Duration::from_secs(config.http_timeout_secs))?;
    let mut ctx = AdapterContext::new(Arc::new(fetch));
    ctx.civitai_models = shared_store(JsonFileStore::open(cache_dir, "civitai_models").await?);
    ctx.happy_models = shared_store(JsonFileStore::open(cache_dir, "happyaccidents_models").await?);
    ctx.options = options;
    ctx.provider_headers = config.provider_headers.clone();
    Ok(ctx)
}

/// Payloads held by one file, and whether they form a newest-first batch
async fn read_payloads(path: &Path) -> Result<(Vec<Value>, bool)> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if is_firebase_raw(&text) {
        let docs = firebase_documents(&text, "jobs")?;
        return Ok((docs, true));
    }
    let value: Value = serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))?;
    Ok(match value {
        Value::Array(items) => (items, true),
        other => (vec![other], false),
    })
}

async fn run_ingest(
    config: &IngestConfig,
    root: &Path,
    options: IngestOptions,
    files: &[PathBuf],
    filters: BatchFilters,
) -> Result<()> {
    let cache_dir = config.resolve_dir(root, &config.cache_dir);
    let ctx = adapter_context(config, &cache_dir, options).await?;
    let ledger = NightCafeLedger::new(&cache_dir);

    let tools = Arc::new(ExifToolFactory::new(config.exiftool_path.clone()));
    let pipeline = Pipeline::new(
        PipelineConfig::from_ingest_config(config, root),
        ctx,
        tools,
        Arc::new(WebpTranscoder),
    );

    let events = Arc::new(EventBus::new(config.event_capacity));
    let mut rx = events.subscribe();
    let progress = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            debug!(?event, "Queue progress");
        }
    });

    let queue = WorkQueue::new(Arc::new(pipeline), config.queue_concurrency, Arc::clone(&events));
    let mut ingested: Vec<Vec<Value>> = Vec::new();
    for path in files {
        let (mut payloads, is_batch) = match read_payloads(path).await {
            Ok(read) => read,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping payload file");
                continue;
            }
        };
        if let Some(user) = &filters.liked_by {
            let added = ledger.register_liked(user, &payloads).await?;
            info!(user = %user, added, "Recorded liked creations");
        }
        payloads = omit_own_creations(payloads, &filters.omit_users);
        if !is_batch {
            for payload in payloads {
                queue.push(payload);
            }
            continue;
        }
        if filters.new_only {
            // Returned oldest first; restore listing order for the queue
            payloads = ledger.filter_new_creations(payloads).await?;
            payloads.reverse();
        }
        info!(path = %path.display(), jobs = payloads.len(), "Queued batch");
        if filters.new_only {
            ingested.push(payloads.clone());
        }
        queue.push_batch(payloads);
    }

    queue.close().await;
    drop(events);
    if let Err(e) = progress.await {
        warn!(error = %e, "Progress logger failed");
    }

    for batch in ingested {
        ledger.register_downloaded(&batch).await?;
    }
    info!("Ingestion complete");
    Ok(())
}

async fn run_reconcile(config: &IngestConfig, root: &Path, dir: &Path, commit: bool) -> Result<()> {
    let cache_dir = config.resolve_dir(root, &config.cache_dir);
    let ctx = adapter_context(config, &cache_dir, IngestOptions::default()).await?;
    let reconciler = Reconciler::new(
        ctx,
        Arc::new(ExifToolFactory::new(config.exiftool_path.clone())),
        FileOps::new(!commit),
    );
    let report = reconciler
        .reconcile_dir(dir)
        .await
        .with_context(|| format!("Reconciliation of {} failed", dir.display()))?;

    for (old, new) in &report.renames {
        info!("{} -> {}", old, new);
    }
    for name in &report.deletions {
        info!("deleted {}", name);
    }
    if !commit && !report.is_empty() {
        info!("Dry run; pass --commit to apply");
    }
    Ok(())
}
