use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;

use super::models::ManualEvent;
use crate::error::{AppError, AppResult};

/// Canonical stored form: UTC RFC 3339 with a trailing Z, so TEXT range
/// predicates compare correctly.
fn to_stored(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Add a manual event. `end` must not precede `start`.
pub async fn add_manual_event(
    pool: &SqlitePool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    title: &str,
    location: &str,
    raw: Option<&str>,
) -> AppResult<ManualEvent> {
    if end < start {
        return Err(AppError::BadRequest("end precedes start".into()));
    }

    let result = sqlx::query(
        "INSERT INTO manual_events (start, \"end\", title, location, raw)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(to_stored(start))
    .bind(to_stored(end))
    .bind(title)
    .bind(location)
    .bind(raw)
    .execute(pool)
    .await?;

    let id = result.last_insert_rowid();
    get_manual_event(pool, id)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Manual event created but not found")))
}

/// Get a manual event by ID.
pub async fn get_manual_event(pool: &SqlitePool, id: i64) -> AppResult<Option<ManualEvent>> {
    let event = sqlx::query_as::<_, ManualEvent>("SELECT * FROM manual_events WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(event)
}

/// List manual events starting within `[from, to]`, ordered by start.
pub async fn list_manual_events(
    pool: &SqlitePool,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> AppResult<Vec<ManualEvent>> {
    let events = sqlx::query_as::<_, ManualEvent>(
        "SELECT * FROM manual_events WHERE start >= ? AND start <= ? ORDER BY start, id",
    )
    .bind(to_stored(from))
    .bind(to_stored(to))
    .fetch_all(pool)
    .await?;
    Ok(events)
}

/// Delete a manual event.
pub async fn delete_manual_event(pool: &SqlitePool, id: i64) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM manual_events WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Manual event {id} not found")));
    }
    Ok(())
}

/// Retention pass: delete manual events that ended before the cutoff.
/// Returns the number of rows removed.
pub async fn delete_ended_before(pool: &SqlitePool, cutoff: DateTime<Utc>) -> AppResult<u64> {
    let result = sqlx::query("DELETE FROM manual_events WHERE \"end\" < ?")
        .bind(to_stored(cutoff))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::{Duration, TimeZone};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_add_and_list_in_range() {
        let pool = db::test_pool().await;
        add_manual_event(&pool, at(2, 9), at(2, 11), "Open day", "Atrium", None)
            .await
            .unwrap();
        add_manual_event(&pool, at(20, 9), at(20, 11), "Far away", "", None)
            .await
            .unwrap();

        let events = list_manual_events(&pool, at(1, 0), at(10, 0)).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Open day");
    }

    #[tokio::test]
    async fn test_end_before_start_rejected() {
        let pool = db::test_pool().await;
        let result = add_manual_event(&pool, at(2, 11), at(2, 9), "Backwards", "", None).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_retention_deletes_only_old_events() {
        let pool = db::test_pool().await;
        let now = Utc::now();
        let old = now - Duration::days(90);
        let recent = now - Duration::days(10);

        add_manual_event(&pool, old, old + Duration::hours(2), "Old", "", None)
            .await
            .unwrap();
        add_manual_event(&pool, recent, recent + Duration::hours(2), "Recent", "", None)
            .await
            .unwrap();

        let removed = delete_ended_before(&pool, now - Duration::days(60))
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let remaining = list_manual_events(&pool, now - Duration::days(365), now)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].title, "Recent");
    }

    #[tokio::test]
    async fn test_delete_missing_event() {
        let pool = db::test_pool().await;
        let result = delete_manual_event(&pool, 7).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
