use sqlx::SqlitePool;

use super::models::CalendarSource;
use crate::error::{AppError, AppResult};

/// Fields a CSV import (or admin create) is authoritative for. Color and
/// enabled are preserved on existing rows so a re-import never undoes
/// operator decisions.
#[derive(Debug, Clone, Default)]
pub struct SourceUpsert {
    pub url: String,
    pub ics_url: Option<String>,
    pub name: String,
    pub building: String,
    pub room: String,
    pub email: String,
}

/// Optional per-field update from the admin surface.
#[derive(Debug, Clone, Default)]
pub struct SourceUpdate {
    pub name: Option<String>,
    pub color: Option<String>,
    pub enabled: Option<bool>,
    pub ics_url: Option<Option<String>>,
    pub building: Option<String>,
    pub room: Option<String>,
    pub email: Option<String>,
}

/// List sources, optionally restricted to enabled ones.
pub async fn list_sources(pool: &SqlitePool, enabled_only: bool) -> AppResult<Vec<CalendarSource>> {
    let query = if enabled_only {
        "SELECT * FROM sources WHERE enabled = 1 ORDER BY name, id"
    } else {
        "SELECT * FROM sources ORDER BY name, id"
    };
    let sources = sqlx::query_as::<_, CalendarSource>(query)
        .fetch_all(pool)
        .await?;
    Ok(sources)
}

/// Get a source by its ID.
pub async fn get_source_by_id(pool: &SqlitePool, id: i64) -> AppResult<Option<CalendarSource>> {
    let source = sqlx::query_as::<_, CalendarSource>("SELECT * FROM sources WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(source)
}

/// Get a source by its published URL (the identity key).
pub async fn get_source_by_url(pool: &SqlitePool, url: &str) -> AppResult<Option<CalendarSource>> {
    let source = sqlx::query_as::<_, CalendarSource>("SELECT * FROM sources WHERE url = ?")
        .bind(url)
        .fetch_optional(pool)
        .await?;
    Ok(source)
}

/// Insert a source or refresh the CSV-authoritative fields of an existing
/// one. Returns the source and whether it was created.
pub async fn upsert_source_by_url(
    pool: &SqlitePool,
    fields: SourceUpsert,
) -> AppResult<(CalendarSource, bool)> {
    let existing = get_source_by_url(pool, &fields.url).await?;
    let is_new = existing.is_none();

    sqlx::query(
        "INSERT INTO sources (url, ics_url, name, building, room, email)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(url) DO UPDATE SET
             ics_url = excluded.ics_url,
             name = excluded.name,
             building = excluded.building,
             room = excluded.room,
             email = excluded.email",
    )
    .bind(&fields.url)
    .bind(&fields.ics_url)
    .bind(&fields.name)
    .bind(&fields.building)
    .bind(&fields.room)
    .bind(&fields.email)
    .execute(pool)
    .await?;

    let source = get_source_by_url(pool, &fields.url)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Source upserted but not found")))?;
    Ok((source, is_new))
}

/// Update individual fields of a source. Returns the updated row.
pub async fn update_source_fields(
    pool: &SqlitePool,
    id: i64,
    update: SourceUpdate,
) -> AppResult<CalendarSource> {
    let source = get_source_by_id(pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Source {id} not found")))?;

    let name = update.name.unwrap_or(source.name);
    let color = update.color.unwrap_or(source.color);
    let enabled = update.enabled.unwrap_or(source.enabled);
    let ics_url = update.ics_url.unwrap_or(source.ics_url);
    let building = update.building.unwrap_or(source.building);
    let room = update.room.unwrap_or(source.room);
    let email = update.email.unwrap_or(source.email);

    sqlx::query(
        "UPDATE sources SET name = ?, color = ?, enabled = ?, ics_url = ?,
         building = ?, room = ?, email = ? WHERE id = ?",
    )
    .bind(&name)
    .bind(&color)
    .bind(enabled)
    .bind(&ics_url)
    .bind(&building)
    .bind(&room)
    .bind(&email)
    .bind(id)
    .execute(pool)
    .await?;

    get_source_by_id(pool, id)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Source updated but not found")))
}

/// Delete a source from the catalog.
pub async fn delete_source(pool: &SqlitePool, id: i64) -> AppResult<()> {
    let result = sqlx::query("DELETE FROM sources WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("Source {id} not found")));
    }
    Ok(())
}

/// Stamp a source as fetched. Written after the artifact write so readers
/// can rely on it for staleness checks.
pub async fn mark_fetched(pool: &SqlitePool, id: i64) -> AppResult<()> {
    sqlx::query("UPDATE sources SET last_fetched_at = datetime('now') WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
