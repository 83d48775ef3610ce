//! Bulk source import from the room-publisher CSV export.
//!
//! The CSV is authoritative for display name, building, room, e-mail and
//! ICS URL; color and enabled are operator-owned and survive re-imports.
//! Importing the same file twice leaves the catalog unchanged.

use std::io::Read;

use serde::Deserialize;
use sqlx::SqlitePool;

use super::sources::{self, SourceUpsert};
use crate::error::{AppError, AppResult};
use crate::parse;

/// One row of the publisher export. Header names are fixed by the export
/// tool; cells are trimmed on read.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(rename = "Nume_Sala")]
    room_name: String,
    #[serde(rename = "Email_Sala")]
    email: String,
    #[serde(rename = "Cladire")]
    building: String,
    #[serde(rename = "Optiune_Delegat", default)]
    _delegate_option: String,
    #[serde(rename = "PublishedCalendarUrl")]
    calendar_url: String,
    #[serde(rename = "PublishedICalUrl", default)]
    ical_url: String,
}

/// Outcome counters for one import.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ImportStats {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Import sources from CSV data, upserting by published URL.
pub async fn import_csv(pool: &SqlitePool, data: impl Read) -> AppResult<ImportStats> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(data);

    let mut stats = ImportStats::default();
    for record in reader.deserialize::<CsvRow>() {
        let row = record.map_err(|e| AppError::BadRequest(format!("CSV parse error: {e}")))?;

        let url = row.calendar_url.trim().to_string();
        if url.is_empty() {
            stats.skipped += 1;
            continue;
        }
        let ics_url = match row.ical_url.trim() {
            "" => None,
            value => Some(value.to_string()),
        };

        // Canonicalize building/room so the catalog matches what
        // extraction will produce.
        let building = parse::location::canonical_building(&row.building);
        let room = parse::parse_location(&row.room_name).room;

        let (_, is_new) = sources::upsert_source_by_url(
            pool,
            SourceUpsert {
                url,
                ics_url,
                name: row.room_name.trim().to_string(),
                building,
                room,
                email: row.email.trim().to_string(),
            },
        )
        .await?;

        if is_new {
            stats.created += 1;
        } else {
            stats.updated += 1;
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    const SAMPLE: &str = "\
Nume_Sala,Email_Sala,Cladire,Optiune_Delegat,PublishedCalendarUrl,PublishedICalUrl
Sala 479 DAIC,utcn_room_ac_daic_479@campus.utcluj.ro,daic,delegat,https://outlook.example/479/calendar.html,https://outlook.example/479/calendar.ics
Sala BT5.03,utcn_room_ac_bar_bt-503@campus.utcluj.ro,bar,delegat,https://outlook.example/bt503/calendar.html,
No URL room,none@example.com,obs,delegat,,
";

    #[tokio::test]
    async fn test_import_creates_sources() {
        let pool = db::test_pool().await;
        let stats = import_csv(&pool, SAMPLE.as_bytes()).await.unwrap();
        assert_eq!(
            stats,
            ImportStats {
                created: 2,
                updated: 0,
                skipped: 1
            }
        );

        let all = sources::list_sources(&pool, false).await.unwrap();
        assert_eq!(all.len(), 2);

        let daic = all.iter().find(|s| s.name == "Sala 479 DAIC").unwrap();
        assert_eq!(daic.building, "DAIC");
        assert_eq!(daic.room, "479");
        assert_eq!(
            daic.ics_url.as_deref(),
            Some("https://outlook.example/479/calendar.ics")
        );

        let baritiu = all.iter().find(|s| s.name == "Sala BT5.03").unwrap();
        assert_eq!(baritiu.ics_url, None);
        assert_eq!(baritiu.room, "BT5.03");
    }

    #[tokio::test]
    async fn test_reimport_is_idempotent_and_preserves_operator_fields() {
        let pool = db::test_pool().await;
        import_csv(&pool, SAMPLE.as_bytes()).await.unwrap();

        let before = sources::list_sources(&pool, false).await.unwrap();
        sources::update_source_fields(
            &pool,
            before[0].id,
            sources::SourceUpdate {
                color: Some("#00ff00".into()),
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let stats = import_csv(&pool, SAMPLE.as_bytes()).await.unwrap();
        assert_eq!(stats.created, 0);
        assert_eq!(stats.updated, 2);

        let after = sources::list_sources(&pool, false).await.unwrap();
        assert_eq!(after.len(), 2);
        let touched = after.iter().find(|s| s.id == before[0].id).unwrap();
        assert_eq!(touched.color, "#00ff00");
        assert!(!touched.enabled);
        // CSV-authoritative fields are refreshed.
        assert_eq!(touched.name, before[0].name);
    }

    #[tokio::test]
    async fn test_malformed_csv_is_rejected() {
        let pool = db::test_pool().await;
        let result = import_csv(&pool, "not,a,known,header\n1,2,3,4\n".as_bytes()).await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }
}
