//! Three-phase extraction orchestrator.
//!
//! Phase 1 fetches every enabled source with a structured feed under a
//! bounded worker pool. Sources whose feed failed (or that have no feed
//! URL) fall through to phase 2, the headless renderer, under its own
//! tighter bound. Phase 3 rebuilds the merged schedule once.
//!
//! At most one run exists per process: callers acquire a run token or get
//! "already running". Per-source failures never abort a run; the cancel
//! signal is observed between dispatches and between phases, never
//! mid-render.

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::progress::{Phase, ProgressWriter};
use super::source::SourceExtractor;
use crate::artifact::ArtifactDir;
use crate::cache::ScheduleCache;
use crate::db::models::CalendarSource;
use crate::db::sources;
use crate::error::{AppError, AppResult};

/// Writer handle for one extraction run. Holding it is the permission to
/// write artifacts; it releases on drop.
pub struct RunToken {
    _guard: OwnedMutexGuard<()>,
}

/// Counters reported after a run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub files_written: usize,
    pub cancelled: bool,
}

pub struct Orchestrator {
    pool: SqlitePool,
    extractor: SourceExtractor,
    artifacts: ArtifactDir,
    cache: Arc<ScheduleCache>,
    cancel: CancellationToken,
    ics_concurrency: usize,
    render_concurrency: usize,
    run_slot: Arc<Mutex<()>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        extractor: SourceExtractor,
        artifacts: ArtifactDir,
        cache: Arc<ScheduleCache>,
        cancel: CancellationToken,
        ics_concurrency: usize,
        render_concurrency: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            pool,
            extractor,
            artifacts,
            cache,
            cancel,
            ics_concurrency: ics_concurrency.max(1),
            render_concurrency: render_concurrency.max(1),
            run_slot: Arc::new(Mutex::new(())),
        })
    }

    /// Acquire the run token, or report that a run is already in flight.
    pub fn try_begin(&self) -> AppResult<RunToken> {
        let guard = self
            .run_slot
            .clone()
            .try_lock_owned()
            .map_err(|_| AppError::AlreadyRunning)?;
        Ok(RunToken { _guard: guard })
    }

    pub fn is_running(&self) -> bool {
        self.run_slot.try_lock().is_err()
    }

    /// Convenience wrapper: acquire the token and run to completion.
    pub async fn run_full_extraction(&self) -> AppResult<RunSummary> {
        let token = self.try_begin()?;
        Ok(self.run(token).await)
    }

    /// Execute one full run. Never fails: every error is absorbed into the
    /// progress document and the summary, and `finished = true` is always
    /// the last write.
    pub async fn run(&self, _token: RunToken) -> RunSummary {
        let catalog = match sources::list_sources(&self.pool, true).await {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::error!(error = %e, "cannot list sources, aborting run");
                let mut progress = ProgressWriter::start(self.artifacts.clone(), 0);
                progress.finish(Some(format!("failed to list sources: {e}")));
                return RunSummary::default();
            }
        };

        let total = catalog.len();
        let mut progress = ProgressWriter::start(self.artifacts.clone(), total);
        let mut summary = RunSummary {
            total,
            ..Default::default()
        };
        tracing::info!(total, "extraction run started");

        // Sources without a feed URL go straight to the renderer.
        let (ics_sources, mut render_queue): (Vec<_>, Vec<_>) = catalog
            .into_iter()
            .partition(|s: &CalendarSource| s.ics_url.is_some());

        progress.enter_phase(Phase::Ics);
        let escalated = self
            .run_ics_phase(ics_sources, &mut progress, &mut summary)
            .await;
        render_queue.extend(escalated);

        if !self.cancel.is_cancelled() {
            progress.enter_phase(Phase::Render);
            self.run_render_phase(render_queue, &mut progress, &mut summary)
                .await;
        }

        let mut run_error = None;
        if self.cancel.is_cancelled() {
            summary.cancelled = true;
            run_error = Some("cancelled".to_string());
            tracing::info!("extraction run cancelled");
        } else {
            progress.enter_phase(Phase::Merge);
            if let Err(e) = self.cache.ensure_schedule(&self.pool).await {
                tracing::error!(error = %e, "merge failed, previous schedule retained");
                run_error = Some(format!("merge failed: {e}"));
            }
            self.write_complete_marker(&summary);
        }

        summary.files_written = self.artifacts.artifact_count();
        progress.set_files_written(summary.files_written);
        progress.finish(run_error);
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            files = summary.files_written,
            cancelled = summary.cancelled,
            "extraction run finished"
        );
        summary
    }

    /// Phase 1: structured feeds under `ics_concurrency`. Returns the
    /// sources that must fall through to the renderer.
    async fn run_ics_phase(
        &self,
        ics_sources: Vec<CalendarSource>,
        progress: &mut ProgressWriter,
        summary: &mut RunSummary,
    ) -> Vec<CalendarSource> {
        let mut escalated = Vec::new();
        let semaphore = Arc::new(Semaphore::new(self.ics_concurrency));
        let mut tasks = JoinSet::new();

        for source in ics_sources {
            if self.cancel.is_cancelled() {
                break;
            }
            let semaphore = semaphore.clone();
            let extractor = self.extractor.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = extractor.extract_via_ics(&source).await;
                (source, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((source, Ok(events))) => {
                    tracing::debug!(name = %source.name, events, "feed extraction succeeded");
                    summary.succeeded += 1;
                    progress.record_success(&source.name);
                }
                Ok((source, Err(e))) => {
                    tracing::warn!(name = %source.name, error = %e, "feed extraction failed, queuing render");
                    escalated.push(source);
                }
                Err(e) => {
                    tracing::error!(error = %e, "extraction task panicked");
                    summary.failed += 1;
                    progress.record_failure("(task failure)");
                }
            }
        }

        escalated
    }

    /// Phase 2: headless renders under `render_concurrency`. A failure here
    /// is terminal for the source this run; its previous artifact stays.
    async fn run_render_phase(
        &self,
        render_queue: Vec<CalendarSource>,
        progress: &mut ProgressWriter,
        summary: &mut RunSummary,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.render_concurrency));
        let mut tasks = JoinSet::new();

        for source in render_queue {
            if self.cancel.is_cancelled() {
                break;
            }
            let semaphore = semaphore.clone();
            let extractor = self.extractor.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = extractor.extract_via_render(&source).await;
                (source, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((source, Ok(events))) => {
                    tracing::debug!(name = %source.name, events, "render extraction succeeded");
                    summary.succeeded += 1;
                    progress.record_success(&source.name);
                }
                Ok((source, Err(e))) => {
                    tracing::warn!(name = %source.name, error = %e, "render extraction failed");
                    summary.failed += 1;
                    progress.record_failure(&source.name);
                }
                Err(e) => {
                    tracing::error!(error = %e, "render task panicked");
                    summary.failed += 1;
                    progress.record_failure("(task failure)");
                }
            }
        }

        self.extractor.save_abbrevs();
    }

    fn write_complete_marker(&self, summary: &RunSummary) {
        let info = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "total": summary.total,
            "succeeded": summary.succeeded,
            "failed": summary.failed,
        });
        let body = format!("Import complete\n{info:#}\n");
        if let Err(e) =
            crate::artifact::write_text_atomic(&self.artifacts.complete_marker_file(), &body)
        {
            tracing::warn!(error = %e, "failed to write completion marker");
        }
    }
}
