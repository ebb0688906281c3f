//! Harvest - resumable issue harvesting tool

use anyhow::{Context, Result};
use clap::Parser;
use harvest_common::logging::{init_logging, LogConfig, LogLevel};
use harvest_ingest::config::parse_projects;
use harvest_ingest::fetcher::rate_limiter;
use harvest_ingest::{
    FileCheckpointStore, HarvestConfig, HttpFetcher, JsonlSink, Pipeline, RetryPolicy,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "harvest")]
#[command(author, version, about = "Resumable issue tracker harvester")]
struct Cli {
    /// Comma separated project keys (overrides HARVEST_PROJECTS)
    #[arg(short, long)]
    projects: Option<String>,

    /// Records requested per page
    #[arg(long)]
    page_size: Option<u32>,

    /// Directory for JSONL output
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Directory for checkpoint files
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Issue search endpoint
    #[arg(long)]
    search_url: Option<String>,

    /// Projects harvested at the same time
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Shared request budget per minute, 0 disables limiting
    #[arg(long)]
    requests_per_minute: Option<u32>,

    /// Pause between pages in milliseconds
    #[arg(long)]
    page_delay_ms: Option<u64>,

    /// Stop each project after this many records in this run
    #[arg(long)]
    max_records: Option<u64>,

    /// Disable progress bars
    #[arg(long)]
    no_progress: bool,

    /// Environment file loaded before reading configuration
    #[arg(long, env = "HARVEST_ENV_FILE")]
    env_file: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Apply flags on top of the environment configuration
    fn apply(&self, config: &mut HarvestConfig) {
        if let Some(projects) = &self.projects {
            config.projects = parse_projects(projects);
        }
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(dir) = &self.checkpoint_dir {
            config.checkpoint_dir = dir.clone();
        }
        if let Some(url) = &self.search_url {
            config.search_url = url.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(rpm) = self.requests_per_minute {
            config.requests_per_minute = rpm;
        }
        if let Some(ms) = self.page_delay_ms {
            config.page_delay = Duration::from_millis(ms);
        }
        if let Some(limit) = self.max_records {
            config.max_records_per_query = (limit > 0).then_some(limit);
        }
        if self.no_progress {
            config.show_progress = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
        },
        None => {
            dotenvy::dotenv().ok();
        },
    }

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the defaults chosen here
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("harvest")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let mut config = HarvestConfig::default()
        .merge_env()
        .context("Failed to read HARVEST_* environment")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let fetcher = HttpFetcher::new(config.fetcher_config(), RetryPolicy::new(config.retry.clone()))?
        .with_rate_limiter(rate_limiter(config.requests_per_minute));
    let store = FileCheckpointStore::open(&config.checkpoint_dir)
        .await
        .with_context(|| format!("Failed to open {}", config.checkpoint_dir.display()))?;
    let sink = JsonlSink::open(&config.output_dir)
        .await
        .with_context(|| format!("Failed to open {}", config.output_dir.display()))?;

    let token = CancellationToken::new();
    let pipeline = Pipeline::new(
        Arc::new(fetcher),
        Arc::new(store),
        Arc::new(sink),
        config.pipeline_config(),
    )
    .with_cancellation(token.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current page");
            token.cancel();
        }
    });

    info!(projects = ?config.projects, "Starting harvest");
    let report = pipeline.run(&config.queries()).await;

    for query in &report.queries {
        match query.error() {
            Some(e) => error!(
                query_id = %query.query_id,
                offset = query.offset,
                error = %e,
                "Query failed"
            ),
            None => info!(
                query_id = %query.query_id,
                status = query.status.as_str(),
                offset = query.offset,
                total = ?query.total,
                records = query.records_emitted,
                "Query finished"
            ),
        }
    }

    if report.is_failure() {
        error!("Every query failed without progress");
        return Ok(ExitCode::FAILURE);
    }

    info!(records = report.records_emitted(), "Harvest complete");
    Ok(ExitCode::SUCCESS)
}
