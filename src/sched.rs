//! Background tasks: the periodic extraction trigger and the daily
//! retention pass. Both are disabled by a global flag for tests and
//! single-shot workers, and both stop on the shared cancel token.

use std::fs;
use std::sync::Arc;
use std::time::{Duration as StdDuration, SystemTime};

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::artifact::ArtifactDir;
use crate::db::manual;
use crate::error::{AppError, AppResult};
use crate::extract::Orchestrator;

const CLEANUP_INTERVAL: StdDuration = StdDuration::from_secs(24 * 60 * 60);

/// Counters from one retention pass.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CleanupStats {
    pub manual_deleted: u64,
    pub artifacts_removed: usize,
}

pub struct Scheduler {
    pool: SqlitePool,
    orchestrator: Arc<Orchestrator>,
    artifacts: ArtifactDir,
    extract_interval: StdDuration,
    retention_days: i64,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        pool: SqlitePool,
        orchestrator: Arc<Orchestrator>,
        artifacts: ArtifactDir,
        extract_interval: StdDuration,
        retention_days: i64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            pool,
            orchestrator,
            artifacts,
            extract_interval,
            retention_days,
            cancel,
        }
    }

    /// Start both periodic tasks. The first extraction fires immediately;
    /// missed ticks are skipped, not made up.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let Self {
            pool,
            orchestrator,
            artifacts,
            extract_interval,
            retention_days,
            cancel,
        } = self;

        let fetch_cancel = cancel.clone();
        let fetch_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(extract_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = fetch_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match orchestrator.run_full_extraction().await {
                    Ok(summary) => {
                        tracing::info!(
                            succeeded = summary.succeeded,
                            failed = summary.failed,
                            "scheduled extraction finished"
                        );
                    }
                    Err(AppError::AlreadyRunning) => {
                        tracing::debug!("extraction still running, skipping tick");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "scheduled extraction failed");
                    }
                }
            }
            tracing::info!("periodic fetcher stopped");
        });

        let cleanup_cancel = cancel;
        let cleanup_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cleanup_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match run_retention_cleanup(&pool, &artifacts, retention_days).await {
                    Ok(stats) => {
                        tracing::info!(
                            manual_deleted = stats.manual_deleted,
                            artifacts_removed = stats.artifacts_removed,
                            "retention cleanup finished"
                        );
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "retention cleanup failed");
                    }
                }
            }
            tracing::info!("retention task stopped");
        });

        vec![fetch_task, cleanup_task]
    }
}

/// Delete manual events older than the retention horizon and prune
/// per-calendar artifacts that have not been rewritten since it. Healthy
/// artifacts are rewritten every run, so only orphans age out.
pub async fn run_retention_cleanup(
    pool: &SqlitePool,
    artifacts: &ArtifactDir,
    retention_days: i64,
) -> AppResult<CleanupStats> {
    let cutoff = Utc::now() - Duration::days(retention_days);
    let manual_deleted = manual::delete_ended_before(pool, cutoff).await?;

    let mut artifacts_removed = 0usize;
    let cutoff_sys = SystemTime::now() - StdDuration::from_secs(retention_days as u64 * 86_400);
    if let Ok(entries) = fs::read_dir(artifacts.root()) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("events_") || !name.ends_with(".json") {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let Ok(mtime) = meta.modified() else { continue };
            if mtime < cutoff_sys {
                if fs::remove_file(entry.path()).is_ok() {
                    tracing::info!(artifact = %name, "pruned stale artifact");
                    artifacts_removed += 1;
                }
            }
        }
    }

    Ok(CleanupStats {
        manual_deleted,
        artifacts_removed,
    })
}
