pub mod admin;
pub mod public;

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

use crate::artifact::ArtifactDir;
use crate::cache::ScheduleCache;
use crate::config::Config;
use crate::extract::Orchestrator;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub cache: Arc<ScheduleCache>,
    pub orchestrator: Arc<Orchestrator>,
    pub artifacts: ArtifactDir,
}

/// Build the full router: the public read-only surface plus the
/// Basic-auth admin surface, on one listener.
pub fn router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/admin/sources",
            get(admin::list_sources).post(admin::create_source),
        )
        .route(
            "/admin/sources/{id}",
            patch(admin::update_source).delete(admin::delete_source),
        )
        .route(
            "/admin/manual_events",
            get(admin::list_manual_events).post(admin::create_manual_event),
        )
        .route("/admin/manual_events/{id}", delete(admin::delete_manual_event))
        .route("/admin/import_csv", post(admin::import_csv))
        .route("/admin/extract", post(admin::trigger_extraction))
        .route("/admin/cleanup", post(admin::run_cleanup))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin::require_admin,
        ));

    Router::new()
        .route("/health", get(public::health))
        .route("/events.json", get(public::events_json))
        .route("/calendars.json", get(public::calendars_json))
        .route("/departures.json", get(public::departures_json))
        .route("/debug/pipeline", get(public::debug_pipeline))
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::db;
    use crate::extract::SourceExtractor;
    use crate::ics::IcsFetcher;
    use crate::render::RendererPool;
    use tokio_util::sync::CancellationToken;

    /// State over an in-memory store and a temp artifact directory.
    pub async fn test_state(dir: &std::path::Path) -> AppState {
        let pool = db::test_pool().await;
        let config = Arc::new(Config::from_env().unwrap());
        let artifacts = ArtifactDir::new(dir);
        let cache = ScheduleCache::new(artifacts.clone());
        let extractor = SourceExtractor::new(
            pool.clone(),
            IcsFetcher::new(config.fetch_timeout, config.local_utc_offset).unwrap(),
            RendererPool::new(1, config.render_watchdog, config.local_utc_offset),
            artifacts.clone(),
            crate::extract::source::WINDOW_DAYS,
        );
        let orchestrator = Orchestrator::new(
            pool.clone(),
            extractor,
            artifacts.clone(),
            cache.clone(),
            CancellationToken::new(),
            config.ics_concurrency,
            config.render_concurrency,
        );
        AppState {
            pool,
            config,
            cache,
            orchestrator,
            artifacts,
        }
    }
}
