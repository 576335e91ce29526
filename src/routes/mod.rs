/// Router Module Index
///
/// One router per resource. None of them gate access at the layer level: the session
/// middleware attaches an `AuthContext` to every request and each handler applies its own
/// role policy, because several resources mix public and restricted reads on the same path.

/// `/api/session`: sign in, sign out.
pub mod session;

/// `/api/user`: registration, profiles, role management.
pub mod users;

/// `/api/posts`
pub mod posts;

/// `/api/media`: uploads carry their own body limit.
pub mod media;

/// `/api/analytics`
pub mod analytics;

use crate::AppState;
use axum::{Router, routing::get};

/// All API routes plus the health check.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Unauthenticated liveness check for load balancers.
        .route("/health", get(|| async { "ok" }))
        .merge(session::session_routes())
        .merge(users::user_routes())
        .merge(posts::post_routes())
        .merge(media::media_routes())
        .merge(analytics::analytics_routes())
}
