use crate::{AppState, handlers::session};
use axum::{Router, routing::post};

pub fn session_routes() -> Router<AppState> {
    Router::new()
        // POST /api/session issues the `sid` cookie, DELETE clears it (idempotent).
        .route(
            "/api/session",
            post(session::create_session).delete(session::destroy_session),
        )
}
