//! Read-side queries over the merged schedule plus manual events.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::artifact::StoredEvent;
use crate::cache::ScheduleCache;
use crate::db::manual;
use crate::error::AppResult;
use crate::parse::{self, AbbrevMap};

/// Synthetic source tag for admin-entered events.
pub const MANUAL_SOURCE: &str = "manual";

/// Case-insensitive substring filters over the parsed fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilters {
    pub subject: Option<String>,
    pub professor: Option<String>,
    pub room: Option<String>,
    pub building: Option<String>,
    pub group: Option<String>,
}

impl EventFilters {
    fn matches(&self, event: &StoredEvent) -> bool {
        contains(&self.subject, &event.subject)
            && contains(&self.professor, &event.professor)
            && contains(&self.room, &event.room)
            && contains(&self.building, &event.building)
            && contains(&self.group, &event.group_display)
    }
}

fn contains(filter: &Option<String>, field: &str) -> bool {
    match filter {
        None => true,
        Some(needle) => {
            let needle = needle.trim();
            needle.is_empty() || field.to_lowercase().contains(&needle.to_lowercase())
        }
    }
}

/// Query events in `[from, to]` (dates, inclusive) with optional filters.
/// Defaults to a week either side of today. Always returns a result; an
/// unavailable schedule surfaces as the last good one via the cache.
pub async fn query_events(
    pool: &SqlitePool,
    cache: &ScheduleCache,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    filters: &EventFilters,
) -> AppResult<Vec<StoredEvent>> {
    let today = Utc::now().date_naive();
    let from = from.unwrap_or(today - Duration::days(7));
    let to = to.unwrap_or(today + Duration::days(7));

    let (schedule, _) = cache.ensure_schedule(pool).await?;

    let mut events: Vec<StoredEvent> = schedule
        .events
        .iter()
        .filter(|e| {
            let day = e.start.date_naive();
            day >= from && day <= to && filters.matches(e)
        })
        .cloned()
        .collect();

    for event in manual_events_in_range(pool, from, to).await? {
        if filters.matches(&event) {
            events.push(event);
        }
    }

    events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.source.cmp(&b.source)));
    Ok(events)
}

/// Events for today and tomorrow, grouped by ISO date.
pub async fn departures(
    pool: &SqlitePool,
    cache: &ScheduleCache,
) -> AppResult<BTreeMap<NaiveDate, Vec<StoredEvent>>> {
    let today = Utc::now().date_naive();
    let tomorrow = today + Duration::days(1);
    let events = query_events(
        pool,
        cache,
        Some(today),
        Some(tomorrow),
        &EventFilters::default(),
    )
    .await?;

    let mut grouped: BTreeMap<NaiveDate, Vec<StoredEvent>> = BTreeMap::new();
    for event in events {
        grouped.entry(event.start.date_naive()).or_default().push(event);
    }
    Ok(grouped)
}

/// Manual events surfaced in the same record shape as extracted ones so
/// the same filters apply. They carry no canonical room index entry.
async fn manual_events_in_range(
    pool: &SqlitePool,
    from: NaiveDate,
    to: NaiveDate,
) -> AppResult<Vec<StoredEvent>> {
    let from_ts = Utc.from_utc_datetime(&from.and_time(NaiveTime::MIN));
    let to_ts = Utc.from_utc_datetime(
        &to.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)),
    );

    let abbrevs = AbbrevMap::default();
    let mut out = Vec::new();
    for row in manual::list_manual_events(pool, from_ts, to_ts).await? {
        let (Ok(start), Ok(end)) = (
            DateTime::parse_from_rfc3339(&row.start),
            DateTime::parse_from_rfc3339(&row.end),
        ) else {
            tracing::warn!(id = row.id, "manual event with unparseable timestamps skipped");
            continue;
        };
        let title = parse::parse_title(&row.title, &abbrevs);
        let location = parse::parse_location(&row.location);
        out.push(StoredEvent {
            source: MANUAL_SOURCE.to_string(),
            start,
            end,
            title: row.title,
            display_title: title.display_title,
            subject: title.subject,
            professor: title.professor,
            room: location.room,
            building: location.building,
            group_display: title.group_display,
            location: row.location,
            color: String::new(),
            calendar_name: String::new(),
        });
    }
    Ok(out)
}
