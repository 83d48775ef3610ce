//! Collapses all per-calendar artifacts into the room-indexed schedule
//! consumed by every read endpoint.
//!
//! The merger never filters by date (extraction already windowed) and never
//! mutates per-calendar artifacts. Its two outputs are written atomically,
//! so readers see either the previous schedule or the new one, never a mix.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::artifact::{ArtifactDir, StoredEvent};
use crate::db::sources;
use crate::error::AppResult;

/// Room bucket for events whose location could not be resolved. They stay
/// in the flat list so nothing silently disappears.
pub const UNASSIGNED_ROOM: &str = "__unassigned__";

/// The merged schedule: canonical room -> events, plus a flat list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergedSchedule {
    pub rooms: BTreeMap<String, Vec<StoredEvent>>,
    pub events: Vec<StoredEvent>,
}

/// Source metadata resolvable without touching the event store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarMeta {
    pub url: String,
    pub name: String,
    pub color: String,
    pub building: String,
    pub room: String,
}

pub type CalendarMap = BTreeMap<String, CalendarMeta>;

/// Rebuild the merged schedule and calendar map from all per-calendar
/// artifacts and write both atomically.
pub async fn rebuild(
    pool: &SqlitePool,
    artifacts: &ArtifactDir,
) -> AppResult<(MergedSchedule, CalendarMap)> {
    let catalog = sources::list_sources(pool, false).await?;
    let by_hash: HashMap<String, &crate::db::models::CalendarSource> = catalog
        .iter()
        .map(|s| (crate::hash::source_hash(&s.url), s))
        .collect();

    let mut calendar_map = CalendarMap::new();
    for (hash, source) in &by_hash {
        if !source.enabled {
            continue;
        }
        calendar_map.insert(
            hash.clone(),
            CalendarMeta {
                url: source.url.clone(),
                name: source.name.clone(),
                color: source.color.clone(),
                building: source.building.clone(),
                room: source.room.clone(),
            },
        );
    }

    let mut schedule = MergedSchedule::default();
    for (hash, events) in artifacts.read_all_events()? {
        let Some(source) = by_hash.get(&hash) else {
            // Artifact from a source since removed from the catalog.
            tracing::debug!(source = %hash, "skipping orphaned artifact");
            continue;
        };
        if !source.enabled {
            continue;
        }

        let mut seen: HashSet<(String, String, String)> = HashSet::new();
        for mut event in events {
            let key = (
                event.start.to_rfc3339(),
                event.end.to_rfc3339(),
                event.title.clone(),
            );
            if !seen.insert(key) {
                continue;
            }

            // Source metadata wins over whatever the artifact carried; the
            // catalog may have been corrected since extraction.
            event.color = source.color.clone();
            event.calendar_name = source.name.clone();

            let room_key = if event.room.is_empty() {
                UNASSIGNED_ROOM.to_string()
            } else {
                event.room.clone()
            };
            schedule
                .rooms
                .entry(room_key)
                .or_default()
                .push(event.clone());
            schedule.events.push(event);
        }
    }

    for events in schedule.rooms.values_mut() {
        sort_events(events);
    }
    sort_events(&mut schedule.events);

    crate::artifact::write_json_atomic(&artifacts.schedule_file(), &schedule)?;
    crate::artifact::write_json_atomic(&artifacts.calendar_map_file(), &calendar_map)?;

    tracing::info!(
        rooms = schedule.rooms.len(),
        events = schedule.events.len(),
        sources = calendar_map.len(),
        "merged schedule rebuilt"
    );

    Ok((schedule, calendar_map))
}

/// Start-ascending order with a stable tie-break on source then raw title.
fn sort_events(events: &mut [StoredEvent]) {
    events.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.title.cmp(&b.title))
    });
}
