//! Per-calendar extraction: fetch, normalize, window, deduplicate, persist.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use crate::artifact::{ArtifactDir, StoredEvent};
use crate::db::models::CalendarSource;
use crate::db::sources;
use crate::hash::source_hash;
use crate::ics::{FeedEvent, FeedOutcome, IcsFetcher};
use crate::parse::{self, AbbrevMap};
use crate::render::{RenderError, RendererPool};

/// Events outside this rolling window around "now" are dropped at
/// extraction. Closed interval on both ends.
pub const WINDOW_DAYS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("no ICS URL configured")]
    NoIcsUrl,

    #[error(transparent)]
    Feed(#[from] crate::ics::FeedError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("artifact write failed: {0}")]
    Store(#[from] anyhow::Error),

    #[error(transparent)]
    App(#[from] crate::error::AppError),
}

/// Extracts one source at a time; shared by both orchestrator phases.
#[derive(Clone)]
pub struct SourceExtractor {
    pool: SqlitePool,
    fetcher: IcsFetcher,
    renderer: Arc<RendererPool>,
    artifacts: ArtifactDir,
    window_days: i64,
    abbrevs: Arc<Mutex<AbbrevMap>>,
}

impl SourceExtractor {
    pub fn new(
        pool: SqlitePool,
        fetcher: IcsFetcher,
        renderer: Arc<RendererPool>,
        artifacts: ArtifactDir,
        window_days: i64,
    ) -> Self {
        let abbrevs = crate::artifact::read_json_opt(&artifacts.subject_map_file())
            .ok()
            .flatten()
            .unwrap_or_default();
        Self {
            pool,
            fetcher,
            renderer,
            artifacts,
            window_days,
            abbrevs: Arc::new(Mutex::new(abbrevs)),
        }
    }

    /// Persist the learned abbreviation table for the next run.
    pub fn save_abbrevs(&self) {
        let snapshot = match self.abbrevs.lock() {
            Ok(map) => map.clone(),
            Err(_) => return,
        };
        if snapshot.is_empty() {
            return;
        }
        if let Err(e) =
            crate::artifact::write_json_atomic(&self.artifacts.subject_map_file(), &snapshot)
        {
            tracing::warn!(error = %e, "failed to persist subject map");
        }
    }

    /// Phase-1 path: structured feed only. A valid zero-event feed writes an
    /// empty artifact and succeeds; the renderer is not consulted.
    pub async fn extract_via_ics(&self, source: &CalendarSource) -> Result<usize, ExtractError> {
        let ics_url = source.ics_url.as_deref().ok_or(ExtractError::NoIcsUrl)?;
        let outcome = self.fetcher.fetch(ics_url).await?;
        let events = match outcome {
            FeedOutcome::Events(events) => events,
            FeedOutcome::Empty => Vec::new(),
        };
        self.finalize(source, events).await
    }

    /// Phase-2 path: headless render of the published HTML page.
    pub async fn extract_via_render(&self, source: &CalendarSource) -> Result<usize, ExtractError> {
        let events = self.renderer.render(&source.url).await?;
        self.finalize(source, events).await
    }

    /// Normalize, window, deduplicate and persist one source's events, then
    /// stamp the source as fetched. The artifact replaces the previous one
    /// atomically; on any earlier error the previous artifact is untouched.
    async fn finalize(
        &self,
        source: &CalendarSource,
        feed_events: Vec<FeedEvent>,
    ) -> Result<usize, ExtractError> {
        let hash = source_hash(&source.url);
        let now = Utc::now();
        let window_start = now - Duration::days(self.window_days);
        let window_end = now + Duration::days(self.window_days);

        // Learn abbreviations from every title first so short forms in the
        // same feed expand against the freshest table.
        {
            let mut abbrevs = self
                .abbrevs
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for event in &feed_events {
                abbrevs.learn(&event.title);
            }
        }
        let abbrevs = self
            .abbrevs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        let mut stored = Vec::new();
        for event in feed_events {
            if event.end < event.start {
                continue;
            }
            // Closed window: events exactly on the boundary are kept.
            let start_utc = event.start.with_timezone(&Utc);
            if start_utc < window_start || start_utc > window_end {
                continue;
            }
            let key = (
                event.start.to_rfc3339(),
                event.end.to_rfc3339(),
                event.title.clone(),
            );
            if !seen.insert(key) {
                continue;
            }

            let title = parse::parse_title(&event.title, &abbrevs);
            let mut location = parse::parse_location(&event.location);
            if location.room.is_empty() && !source.room.is_empty() {
                // The catalog knows which room this calendar belongs to.
                location.room = source.room.clone();
            }
            if location.building.is_empty() && !source.building.is_empty() {
                location.building = source.building.clone();
            }

            stored.push(StoredEvent {
                source: hash.clone(),
                start: event.start,
                end: event.end,
                title: event.title,
                display_title: title.display_title,
                subject: title.subject,
                professor: title.professor,
                room: location.room,
                building: location.building,
                group_display: title.group_display,
                location: event.location,
                color: source.color.clone(),
                calendar_name: source.name.clone(),
            });
        }

        self.artifacts.write_events(&hash, &stored)?;
        sources::mark_fetched(&self.pool, source.id).await?;

        tracing::debug!(
            source = %hash,
            name = %source.name,
            events = stored.len(),
            "artifact written"
        );
        Ok(stored.len())
    }
}
