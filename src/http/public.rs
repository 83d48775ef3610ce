//! Public read-only endpoints. These never fail because extraction is
//! failing: the cache serves the last good merged schedule.

use axum::extract::{Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::error::{AppError, AppResult};
use crate::extract::progress;
use crate::query::{self, EventFilters};

pub async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsParams {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub professor: Option<String>,
    pub room: Option<String>,
    pub building: Option<String>,
    pub group: Option<String>,
}

fn parse_date(value: &Option<String>, name: &str) -> AppResult<Option<NaiveDate>> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<NaiveDate>()
            .map(Some)
            .map_err(|_| AppError::BadRequest(format!("invalid {name} date: {raw}"))),
    }
}

/// Flattened events with optional window and field filters.
pub async fn events_json(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> AppResult<Json<Vec<crate::artifact::StoredEvent>>> {
    let from = parse_date(&params.from, "from")?;
    let to = parse_date(&params.to, "to")?;
    let filters = EventFilters {
        subject: params.subject,
        professor: params.professor,
        room: params.room,
        building: params.building,
        group: params.group,
    };

    let events = query::query_events(&state.pool, &state.cache, from, to, &filters).await?;
    Ok(Json(events))
}

/// The calendar map: source hash to display metadata.
pub async fn calendars_json(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let (_, map) = state.cache.ensure_schedule(&state.pool).await?;
    Ok(Json(serde_json::to_value(&*map).map_err(anyhow::Error::from)?))
}

/// Today's and tomorrow's events, grouped by date.
pub async fn departures_json(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let grouped = query::departures(&state.pool, &state.cache).await?;
    Ok(Json(serde_json::to_value(&grouped).map_err(anyhow::Error::from)?))
}

/// Single-pane pipeline diagnostic: progress counters, fingerprint,
/// artifact counts and whether a run is in flight.
pub async fn debug_pipeline(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let progress = progress::read_progress(&state.artifacts);
    let fingerprint = state.cache.current_fingerprint().ok();
    Ok(Json(json!({
        "running": state.orchestrator.is_running(),
        "progress": progress,
        "fingerprint": fingerprint,
        "artifacts": state.artifacts.artifact_count(),
        "rebuilds": state.cache.rebuild_count(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sources::{self, SourceUpsert};
    use crate::hash::source_hash;
    use crate::http::{router, test_support::test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{Duration, FixedOffset, Utc};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn seed_schedule(state: &crate::http::AppState) {
        sources::upsert_source_by_url(
            &state.pool,
            SourceUpsert {
                url: "https://a/cal.html".into(),
                name: "Room 479".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let hash = source_hash("https://a/cal.html");
        let tz = FixedOffset::east_opt(0).unwrap();
        let start = Utc::now().with_timezone(&tz) + Duration::hours(2);
        state
            .artifacts
            .write_events(
                &hash,
                &[crate::artifact::StoredEvent {
                    source: hash.clone(),
                    start,
                    end: start + Duration::hours(2),
                    title: "Functional programming - Dr. Smith".into(),
                    display_title: "Functional programming".into(),
                    subject: "Functional programming".into(),
                    professor: "Dr. Smith".into(),
                    room: "479".into(),
                    building: "DAIC".into(),
                    group_display: String::new(),
                    location: String::new(),
                    color: String::new(),
                    calendar_name: String::new(),
                }],
            )
            .unwrap();
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()).await);

        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_events_json_returns_events() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        seed_schedule(&state).await;
        let app = router(state);

        let resp = app
            .oneshot(Request::get("/events.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let events: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["room"], "479");
    }

    #[tokio::test]
    async fn test_events_json_professor_filter() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        seed_schedule(&state).await;
        let app = router(state);

        let resp = app
            .clone()
            .oneshot(
                Request::get("/events.json?professor=smith")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let events: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(events.len(), 1);

        let resp = app
            .oneshot(
                Request::get("/events.json?professor=jones")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let events: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_events_json_invalid_date_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()).await);

        let resp = app
            .oneshot(
                Request::get("/events.json?from=yesterday")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_calendars_json_resolves_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        seed_schedule(&state).await;
        let app = router(state);

        let resp = app
            .oneshot(Request::get("/calendars.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let map: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let hash = source_hash("https://a/cal.html");
        assert_eq!(map[hash.as_str()]["name"], "Room 479");
    }

    #[tokio::test]
    async fn test_debug_pipeline_shape() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()).await);

        let resp = app
            .oneshot(Request::get("/debug/pipeline").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(doc["running"], false);
        assert!(doc["fingerprint"].is_object());
        assert_eq!(doc["artifacts"], 0);
    }

    #[tokio::test]
    async fn test_departures_grouped_by_date() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path()).await;
        seed_schedule(&state).await;
        let app = router(state);

        let resp = app
            .oneshot(Request::get("/departures.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(doc.is_object());
    }
}
