//! Authenticated admin surface: catalog CRUD, manual events, CSV upload,
//! extraction trigger and the retention pass.

use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::AppState;
use crate::db::models::{CalendarSource, ManualEvent};
use crate::db::{csv_import, manual, sources};
use crate::error::{AppError, AppResult};
use crate::sched;

/// HTTP Basic auth against the configured admin password. The username is
/// fixed; there is no per-user store behind the admin surface.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic_auth)
        .map(|(user, password)| user == "admin" && password == state.config.admin_password)
        .unwrap_or(false);

    if !authorized {
        return Err(unauthorized_response());
    }
    Ok(next.run(request).await)
}

fn parse_basic_auth(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded =
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, encoded).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (user, password) = credentials.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

fn unauthorized_response() -> Response {
    let mut response = Response::new(axum::body::Body::from("Unauthorized"));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        header::HeaderValue::from_static("Basic realm=\"roomboard\""),
    );
    response
}

// --- Calendar sources ---

pub async fn list_sources(State(state): State<AppState>) -> AppResult<Json<Vec<CalendarSource>>> {
    let all = sources::list_sources(&state.pool, false).await?;
    Ok(Json(all))
}

#[derive(Debug, Deserialize)]
pub struct CreateSourceBody {
    pub url: String,
    #[serde(default)]
    pub ics_url: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub building: String,
    #[serde(default)]
    pub room: String,
    #[serde(default)]
    pub email: String,
}

pub async fn create_source(
    State(state): State<AppState>,
    Json(body): Json<CreateSourceBody>,
) -> AppResult<(StatusCode, Json<CalendarSource>)> {
    if body.url.trim().is_empty() {
        return Err(AppError::BadRequest("url is required".into()));
    }
    let (source, is_new) = sources::upsert_source_by_url(
        &state.pool,
        sources::SourceUpsert {
            url: body.url.trim().to_string(),
            ics_url: body.ics_url.filter(|u| !u.trim().is_empty()),
            name: body.name,
            building: body.building,
            room: body.room,
            email: body.email,
        },
    )
    .await?;
    let status = if is_new {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(source)))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateSourceBody {
    pub name: Option<String>,
    pub color: Option<String>,
    pub enabled: Option<bool>,
    /// Empty string clears the ICS URL.
    pub ics_url: Option<String>,
    pub building: Option<String>,
    pub room: Option<String>,
    pub email: Option<String>,
}

pub async fn update_source(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateSourceBody>,
) -> AppResult<Json<CalendarSource>> {
    let ics_url = body
        .ics_url
        .map(|u| if u.trim().is_empty() { None } else { Some(u) });
    let updated = sources::update_source_fields(
        &state.pool,
        id,
        sources::SourceUpdate {
            name: body.name,
            color: body.color,
            enabled: body.enabled,
            ics_url,
            building: body.building,
            room: body.room,
            email: body.email,
        },
    )
    .await?;
    Ok(Json(updated))
}

pub async fn delete_source(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    sources::delete_source(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Manual events ---

#[derive(Debug, Deserialize)]
pub struct ManualEventRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

pub async fn list_manual_events(
    State(state): State<AppState>,
    axum::extract::Query(range): axum::extract::Query<ManualEventRange>,
) -> AppResult<Json<Vec<ManualEvent>>> {
    use chrono::{Duration, NaiveTime, TimeZone};

    let today = Utc::now().date_naive();
    let from = range.from.unwrap_or(today - Duration::days(60));
    let to = range.to.unwrap_or(today + Duration::days(60));
    let from_ts = Utc.from_utc_datetime(&from.and_time(NaiveTime::MIN));
    // Inclusive through the end of the `to` day.
    let to_ts =
        Utc.from_utc_datetime(&(to + Duration::days(1)).and_time(NaiveTime::MIN)) - Duration::seconds(1);

    let events = manual::list_manual_events(&state.pool, from_ts, to_ts).await?;
    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
pub struct CreateManualEventBody {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub raw: Option<String>,
}

pub async fn create_manual_event(
    State(state): State<AppState>,
    Json(body): Json<CreateManualEventBody>,
) -> AppResult<(StatusCode, Json<ManualEvent>)> {
    if body.title.trim().is_empty() {
        return Err(AppError::BadRequest("title is required".into()));
    }
    let event = manual::add_manual_event(
        &state.pool,
        body.start,
        body.end,
        body.title.trim(),
        &body.location,
        body.raw.as_deref(),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn delete_manual_event(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    manual::delete_manual_event(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Pipeline operations ---

/// CSV upload: the body is the file content.
pub async fn import_csv(State(state): State<AppState>, body: String) -> AppResult<Json<Value>> {
    let stats = csv_import::import_csv(&state.pool, body.as_bytes()).await?;
    Ok(Json(json!({
        "created": stats.created,
        "updated": stats.updated,
        "skipped": stats.skipped,
    })))
}

/// Kick off a full extraction in the background. A second trigger while
/// one is running reports that without queuing.
pub async fn trigger_extraction(State(state): State<AppState>) -> Response {
    match state.orchestrator.try_begin() {
        Ok(token) => {
            let orchestrator = state.orchestrator.clone();
            tokio::spawn(async move {
                orchestrator.run(token).await;
            });
            (
                StatusCode::ACCEPTED,
                Json(json!({"started": true, "message": "Extraction started"})),
            )
                .into_response()
        }
        Err(AppError::AlreadyRunning) => (
            StatusCode::OK,
            Json(json!({"started": false, "message": "Extraction already running"})),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Run the retention pass on demand.
pub async fn run_cleanup(State(state): State<AppState>) -> AppResult<Json<sched::CleanupStats>> {
    let stats = sched::run_retention_cleanup(
        &state.pool,
        &state.artifacts,
        state.config.retention_days,
    )
    .await?;
    Ok(Json(stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{router, test_support::test_state};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn basic_auth(password: &str) -> String {
        use base64::Engine;
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("admin:{password}"));
        format!("Basic {encoded}")
    }

    fn admin_password() -> String {
        crate::config::Config::from_env().unwrap().admin_password
    }

    #[tokio::test]
    async fn test_admin_requires_auth() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()).await);

        let resp = app
            .clone()
            .oneshot(Request::get("/admin/sources").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = app
            .oneshot(
                Request::get("/admin/sources")
                    .header("Authorization", basic_auth("wrong-password"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_source_crud_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()).await);
        let auth = basic_auth(&admin_password());

        let resp = app
            .clone()
            .oneshot(
                Request::post("/admin/sources")
                    .header("Authorization", &auth)
                    .header("Content-Type", "application/json")
                    .body(Body::from(
                        r#"{"url": "https://a/cal.html", "name": "Room A"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let created: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let id = created["id"].as_i64().unwrap();

        let resp = app
            .clone()
            .oneshot(
                Request::patch(format!("/admin/sources/{id}"))
                    .header("Authorization", &auth)
                    .header("Content-Type", "application/json")
                    .body(Body::from(r##"{"enabled": false, "color": "#ff0000"}"##))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let updated: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(updated["enabled"], false);
        assert_eq!(updated["color"], "#ff0000");

        let resp = app
            .oneshot(
                Request::delete(format!("/admin/sources/{id}"))
                    .header("Authorization", &auth)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_csv_upload() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()).await);

        let csv = "\
Nume_Sala,Email_Sala,Cladire,Optiune_Delegat,PublishedCalendarUrl,PublishedICalUrl
Sala 479 DAIC,room@example.edu,daic,d,https://a/cal.html,https://a/cal.ics
";
        let resp = app
            .oneshot(
                Request::post("/admin/import_csv")
                    .header("Authorization", basic_auth(&admin_password()))
                    .body(Body::from(csv))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let stats: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats["created"], 1);
    }

    #[tokio::test]
    async fn test_manual_event_create_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()).await);
        let auth = basic_auth(&admin_password());

        let resp = app
            .clone()
            .oneshot(
                Request::post("/admin/manual_events")
                    .header("Authorization", &auth)
                    .header("Content-Type", "application/json")
                    .body(Body::from(
                        r#"{"start": "2026-03-02T09:00:00Z", "end": "2026-03-02T11:00:00Z", "title": "Open day"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let event: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let id = event["id"].as_i64().unwrap();

        let resp = app
            .oneshot(
                Request::delete(format!("/admin/manual_events/{id}"))
                    .header("Authorization", &auth)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_cleanup_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()).await);

        let resp = app
            .oneshot(
                Request::post("/admin/cleanup")
                    .header("Authorization", basic_auth(&admin_password()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let stats: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats["manual_deleted"], 0);
    }
}
