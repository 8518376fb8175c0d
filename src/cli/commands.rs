//! CLI command definitions for digest-forge.
//!
//! Provides commands to run the digest pipeline, reclaim stale workspaces,
//! inspect the result cache and preview what a workspace digest looks like.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use crate::adapters::{
    DigestAnalyzer, JsonFileSink, JsonFileSource, JsonSnapshotStore, LogNotifier, WebhookNotifier,
};
use crate::cache::ResultCache;
use crate::pipeline::{AnalysisResult, Pipeline, PipelineConfig, Provenance};
use crate::workspace::{DirectoryMaterializer, WorkspaceManager};

/// Default items file for `run`.
const DEFAULT_ITEMS_FILE: &str = "items.json";

/// Recurring repository digest pipeline.
#[derive(Parser)]
#[command(name = "digest-forge")]
#[command(about = "Analyze a batch of repositories and publish a daily digest")]
#[command(version)]
#[command(
    long_about = "digest-forge collects a batch of repositories, analyzes each one in a bounded temporary workspace, compares the batch against the previous run and publishes a digest.\n\nExample usage:\n  digest-forge run --items items.json\n  digest-forge cache stats"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// YAML configuration file; environment variables override its values.
    #[arg(short, long, global = true, env = "DIGEST_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the pipeline once.
    Run(RunArgs),

    /// Delete workspaces older than the staleness threshold.
    Sweep(SweepArgs),

    /// Inspect or clear the result cache.
    Cache(CacheArgs),

    /// Print the content digest of a local directory.
    Extract(ExtractArgs),
}

/// Arguments for `digest-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// JSON file with the items to analyze.
    #[arg(short, long, default_value = DEFAULT_ITEMS_FILE)]
    pub items: PathBuf,

    /// Copy local directories instead of cloning with git.
    #[arg(long)]
    pub local: bool,

    /// Skip writing the aggregate JSON file.
    #[arg(long)]
    pub no_sink: bool,

    /// Also post the summary to this webhook.
    #[arg(long, env = "DIGEST_WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Print the run report as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `digest-forge sweep`.
#[derive(Parser, Debug)]
pub struct SweepArgs {
    /// Override the staleness threshold, in minutes.
    #[arg(long)]
    pub max_age_mins: Option<u64>,
}

/// Arguments for `digest-forge cache`.
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Cache subcommand to run.
    #[command(subcommand)]
    pub command: CacheSubcommand,
}

/// Cache subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum CacheSubcommand {
    /// Show cache statistics.
    Stats {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Remove every cached analysis.
    Clear,
}

/// Arguments for `digest-forge extract`.
#[derive(Parser, Debug)]
pub struct ExtractArgs {
    /// Directory to digest.
    pub dir: PathBuf,

    /// Preview budget in bytes; defaults to the configured value.
    #[arg(long)]
    pub max_bytes: Option<usize>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = PipelineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Run(args) => run_pipeline_command(config, args).await,
        Commands::Sweep(args) => run_sweep_command(config, args).await,
        Commands::Cache(args) => run_cache_command(config, args),
        Commands::Extract(args) => run_extract_command(config, args).await,
    }
}

async fn run_pipeline_command(config: PipelineConfig, args: RunArgs) -> anyhow::Result<()> {
    let mut builder = Pipeline::builder(config.clone())
        .source(Arc::new(JsonFileSource::new(&args.items)))
        .analyzer(Arc::new(DigestAnalyzer::new()))
        .snapshots(Arc::new(JsonSnapshotStore::new(&config.snapshot_path)))
        .notifier(Arc::new(LogNotifier::new()));

    if args.local {
        builder = builder.materializer(Arc::new(DirectoryMaterializer::new()));
    }
    if !args.no_sink {
        builder = builder.sink(Arc::new(JsonFileSink::new(&config.output_dir)));
    }
    if let Some(url) = args.webhook_url {
        info!(url = %url, "Webhook notifications enabled");
        builder = builder.notifier(Arc::new(WebhookNotifier::new(url)));
    }

    let pipeline = builder.build()?;
    let report = pipeline.run().await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\n=== Digest Run {} ===", report.run_id);
    println!("Items:          {}", report.total_items);
    for provenance in [Provenance::CacheHit, Provenance::Deep, Provenance::Fallback, Provenance::Stub] {
        println!("  {:<13} {}", format!("{}:", provenance), report.names_with(provenance).len());
    }
    println!("Trends:         {}", report.trends_summary);
    println!("Snapshot saved: {}", report.snapshot_saved);
    match &report.sink_url {
        Some(url) => println!("Report:         {}", url),
        None => println!("Report:         not dispatched"),
    }
    println!("Notified:       {}", report.notifications_sent);
    if !report.item_errors.is_empty() {
        println!("\nDegraded items:");
        for err in &report.item_errors {
            println!("  {} [{}]: {}", err.name, err.stage, err.message);
        }
    }
    Ok(())
}

async fn run_sweep_command(config: PipelineConfig, args: SweepArgs) -> anyhow::Result<()> {
    let manager = WorkspaceManager::new(config.workspace)?;
    let removed = match args.max_age_mins {
        Some(mins) => manager.sweep(Duration::from_secs(mins * 60)).await,
        None => manager.sweep_stale().await,
    };
    println!("Removed {} stale workspace(s)", removed);
    Ok(())
}

fn run_cache_command(config: PipelineConfig, args: CacheArgs) -> anyhow::Result<()> {
    if !config.cache.persist {
        warn!("Cache persistence is disabled; only this process's entries are visible");
    }
    let cache: ResultCache<AnalysisResult> = ResultCache::with_config(config.cache);

    match args.command {
        CacheSubcommand::Stats { json } => {
            let expired = cache.cleanup();
            let stats = cache.stats();
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Entries:  {} / {}", stats.size, stats.max_size);
                println!("Expired:  {} purged", expired);
                println!("TTL:      {}s", cache.config().ttl.as_secs());
                println!("Location: {}", cache.config().cache_dir.display());
            }
        }
        CacheSubcommand::Clear => {
            let removed = cache.clear();
            println!("Cleared {} cached analysis(es)", removed);
        }
    }
    Ok(())
}

async fn run_extract_command(config: PipelineConfig, args: ExtractArgs) -> anyhow::Result<()> {
    let source_ref = args.dir.to_string_lossy().to_string();
    let name = args
        .dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "extract".to_string());
    let max_bytes = args.max_bytes.unwrap_or(config.max_content_bytes);

    let manager = WorkspaceManager::with_materializer(config.workspace, Arc::new(DirectoryMaterializer::new()))?;
    let workspace = manager
        .acquire(&source_ref, &name)
        .await
        .with_context(|| format!("failed to materialize {}", args.dir.display()))?;
    let digest = manager.extract(&workspace, max_bytes).await;
    manager.release(workspace).await;
    let digest = digest?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&digest)?);
    } else {
        println!("{}", digest.render());
        println!(
            "{} of {} candidate files previewed, {} bytes of preview",
            digest.files.len(),
            digest.candidate_files,
            digest.preview_bytes()
        );
    }
    Ok(())
}
