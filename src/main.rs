mod artifact;
mod cache;
mod config;
mod db;
mod error;
mod extract;
mod hash;
mod http;
mod ics;
mod merge;
mod parse;
mod query;
mod render;
mod sched;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use artifact::ArtifactDir;
use cache::ScheduleCache;
use config::Config;
use extract::{Orchestrator, SourceExtractor};
use http::AppState;
use ics::IcsFetcher;
use render::RendererPool;

#[derive(Parser)]
#[command(name = "roomboard", about = "Room schedule aggregation service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server with background tasks (default)
    Serve,

    /// Run one full extraction and exit
    Extract,

    /// Import calendar sources from a publisher CSV export
    ImportCsv {
        /// Path to the CSV file
        path: std::path::PathBuf,
    },

    /// Run the retention cleanup once
    Cleanup,

    /// List all configured calendar sources
    ListSources,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve);

    match command {
        Commands::Serve => run_server().await,
        Commands::Extract => cmd_extract().await,
        Commands::ImportCsv { path } => cmd_import_csv(&path).await,
        Commands::Cleanup => cmd_cleanup().await,
        Commands::ListSources => cmd_list_sources().await,
    }
}

/// Build the shared application state from configuration.
async fn build_state(config: Config, cancel: CancellationToken) -> anyhow::Result<AppState> {
    let pool = db::init_pool(&config.database_url).await?;
    tracing::info!("Database initialized");

    let artifacts = ArtifactDir::new(config.artifact_dir.clone());
    let cache = ScheduleCache::new(artifacts.clone());
    let fetcher = IcsFetcher::new(config.fetch_timeout, config.local_utc_offset)?;
    let renderer = RendererPool::new(
        config.render_concurrency,
        config.render_watchdog,
        config.local_utc_offset,
    );
    let extractor = SourceExtractor::new(
        pool.clone(),
        fetcher,
        renderer,
        artifacts.clone(),
        extract::source::WINDOW_DAYS,
    );
    let orchestrator = Orchestrator::new(
        pool.clone(),
        extractor,
        artifacts.clone(),
        cache.clone(),
        cancel,
        config.ics_concurrency,
        config.render_concurrency,
    );

    Ok(AppState {
        pool,
        config: Arc::new(config),
        cache,
        orchestrator,
        artifacts,
    })
}

/// Start the HTTP server and the background scheduler.
async fn run_server() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    let cancel = CancellationToken::new();
    let state = build_state(config, cancel.clone()).await?;

    if state.config.disable_background_tasks {
        tracing::info!("background tasks disabled");
    } else {
        let scheduler = sched::Scheduler::new(
            state.pool.clone(),
            state.orchestrator.clone(),
            state.artifacts.clone(),
            state.config.extract_interval,
            state.config.retention_days,
            cancel.clone(),
        );
        scheduler.spawn();
        tracing::info!(
            interval_min = state.config.extract_interval.as_secs() / 60,
            retention_days = state.config.retention_days,
            "background tasks started"
        );
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "roomboard listening");

    let app = http::router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            cancel.cancel();
        })
        .await?;

    Ok(())
}

/// Helper: build state for one-shot CLI commands (no background tasks).
async fn cli_state() -> anyhow::Result<AppState> {
    let config = Config::from_env()?;
    build_state(config, CancellationToken::new()).await
}

/// Run one full extraction and report counters.
async fn cmd_extract() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let state = cli_state().await?;
    let summary = state.orchestrator.run_full_extraction().await?;
    println!(
        "Extraction finished: {} succeeded, {} failed, out of {} ({} artifacts on disk)",
        summary.succeeded, summary.failed, summary.total, summary.files_written
    );
    Ok(())
}

/// Import sources from a CSV file.
async fn cmd_import_csv(path: &std::path::Path) -> anyhow::Result<()> {
    let state = cli_state().await?;
    let file = std::fs::File::open(path)?;
    let stats = db::csv_import::import_csv(&state.pool, file).await?;
    println!(
        "Imported: {} created, {} updated, {} skipped",
        stats.created, stats.updated, stats.skipped
    );
    Ok(())
}

/// Run the retention cleanup once.
async fn cmd_cleanup() -> anyhow::Result<()> {
    let state = cli_state().await?;
    let stats = sched::run_retention_cleanup(
        &state.pool,
        &state.artifacts,
        state.config.retention_days,
    )
    .await?;
    println!(
        "Cleanup finished: {} manual events deleted, {} stale artifacts removed",
        stats.manual_deleted, stats.artifacts_removed
    );
    Ok(())
}

/// List all configured sources.
async fn cmd_list_sources() -> anyhow::Result<()> {
    let state = cli_state().await?;
    let sources = db::sources::list_sources(&state.pool, false).await?;

    if sources.is_empty() {
        println!("No sources configured.");
        return Ok(());
    }

    println!("{:<5} {:<30} {:<8} {:<10} URL", "ID", "Name", "Enabled", "Room");
    println!("{}", "-".repeat(90));
    for s in &sources {
        println!(
            "{:<5} {:<30} {:<8} {:<10} {}",
            s.id,
            s.name,
            if s.enabled { "yes" } else { "no" },
            s.room,
            s.url
        );
    }
    Ok(())
}
