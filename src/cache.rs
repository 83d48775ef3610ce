//! Fingerprint-checked lazy rebuild of the merged schedule.
//!
//! Many HTTP workers read the schedule; at most one of them rebuilds it.
//! The in-memory slot short-circuits the common case, an advisory file
//! lock in the artifact directory serializes rebuilds across processes,
//! and the fingerprint recorded next to the on-disk schedule lets workers
//! adopt another process's rebuild instead of repeating it.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::artifact::{read_json_opt, write_json_atomic, ArtifactDir};
use crate::error::AppResult;
use crate::hash::{fingerprint, Fingerprint};
use crate::merge::{self, CalendarMap, MergedSchedule};

/// How long an in-memory schedule is trusted without re-checking the
/// fingerprint on disk.
const FRESH_FOR: Duration = Duration::from_secs(60);

struct CachedSchedule {
    fp: Fingerprint,
    loaded_at: Instant,
    schedule: Arc<MergedSchedule>,
    map: Arc<CalendarMap>,
}

pub struct ScheduleCache {
    artifacts: ArtifactDir,
    slot: Mutex<Option<CachedSchedule>>,
    rebuilds: AtomicU64,
}

impl ScheduleCache {
    pub fn new(artifacts: ArtifactDir) -> Arc<Self> {
        Arc::new(Self {
            artifacts,
            slot: Mutex::new(None),
            rebuilds: AtomicU64::new(0),
        })
    }

    /// Number of merger invocations this process has performed.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }

    /// Fingerprint of the artifact directory as of now.
    pub fn current_fingerprint(&self) -> AppResult<Fingerprint> {
        Ok(fingerprint(self.artifacts.root()).map_err(anyhow::Error::from)?)
    }

    /// Return the merged schedule, rebuilding it only when the artifact
    /// directory changed since the last build.
    pub async fn ensure_schedule(
        &self,
        pool: &SqlitePool,
    ) -> AppResult<(Arc<MergedSchedule>, Arc<CalendarMap>)> {
        let fp = self.current_fingerprint()?;

        {
            let slot = self.slot.lock().await;
            if let Some(cached) = slot.as_ref() {
                if cached.fp == fp && cached.loaded_at.elapsed() < FRESH_FOR {
                    return Ok((cached.schedule.clone(), cached.map.clone()));
                }
            }
        }

        // Slow path: serialize against other workers and processes.
        let _lock = FileLock::acquire(self.artifacts.lock_file()).await?;

        // Recompute under the lock: another worker may have rebuilt while
        // we waited.
        let fp = self.current_fingerprint()?;
        {
            let mut slot = self.slot.lock().await;
            if let Some(cached) = slot.as_mut() {
                if cached.fp == fp {
                    cached.loaded_at = Instant::now();
                    return Ok((cached.schedule.clone(), cached.map.clone()));
                }
            }
        }

        // Another process may have produced a matching schedule already.
        let stored_fp: Option<Fingerprint> =
            read_json_opt(&self.artifacts.fingerprint_file()).unwrap_or(None);
        if stored_fp == Some(fp) {
            if let (Some(schedule), Some(map)) = (
                read_json_opt::<MergedSchedule>(&self.artifacts.schedule_file())?,
                read_json_opt::<CalendarMap>(&self.artifacts.calendar_map_file())?,
            ) {
                return Ok(self.store(fp, schedule, map).await);
            }
        }

        tracing::info!(?fp, "schedule fingerprint changed, rebuilding");
        let (schedule, map) = merge::rebuild(pool, &self.artifacts).await?;
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        write_json_atomic(&self.artifacts.fingerprint_file(), &fp)?;

        Ok(self.store(fp, schedule, map).await)
    }

    async fn store(
        &self,
        fp: Fingerprint,
        schedule: MergedSchedule,
        map: CalendarMap,
    ) -> (Arc<MergedSchedule>, Arc<CalendarMap>) {
        let schedule = Arc::new(schedule);
        let map = Arc::new(map);
        let mut slot = self.slot.lock().await;
        *slot = Some(CachedSchedule {
            fp,
            loaded_at: Instant::now(),
            schedule: schedule.clone(),
            map: map.clone(),
        });
        (schedule, map)
    }
}

/// Advisory exclusive lock on a sentinel file, released on drop. Acquiring
/// blocks, so it runs on the blocking pool.
struct FileLock {
    file: File,
}

impl FileLock {
    async fn acquire(path: PathBuf) -> anyhow::Result<FileLock> {
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = File::create(&path)?;
            file.lock_exclusive()?;
            Ok(FileLock { file })
        })
        .await?
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
