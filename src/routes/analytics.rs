use crate::{AppState, handlers::analytics};
use axum::{
    Router,
    routing::{get, post},
};

pub fn analytics_routes() -> Router<AppState> {
    Router::new()
        // POST /api/analytics/pageview
        // Public beacon, always 200.
        .route("/api/analytics/pageview", post(analytics::record_page_view))
        // Admin dashboard data and retention cleanup.
        .route("/api/analytics/summary", get(analytics::get_summary))
        .route("/api/analytics/purge", post(analytics::purge_page_views))
}
