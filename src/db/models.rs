use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One configured room calendar. `url` is the published HTML page and acts
/// as the identity key; its 8-hex hash names the per-calendar artifact.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CalendarSource {
    pub id: i64,
    pub url: String,
    pub ics_url: Option<String>,
    pub name: String,
    pub color: String,
    pub enabled: bool,
    pub building: String,
    pub room: String,
    pub email: String,
    pub created_at: NaiveDateTime,
    pub last_fetched_at: Option<NaiveDateTime>,
}

/// An admin-entered one-off event. Timestamps are stored as UTC RFC 3339
/// text so range predicates can compare lexicographically.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ManualEvent {
    pub id: i64,
    pub start: String,
    pub end: String,
    pub title: String,
    pub location: String,
    pub raw: Option<String>,
    pub created_at: NaiveDateTime,
}
