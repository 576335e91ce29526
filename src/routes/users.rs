use crate::{AppState, handlers::users};
use axum::{
    Router,
    routing::{get, post},
};

/// User Router
///
/// Registration is open; everything else needs a session. `/api/user/list` is registered
/// as its own static route so it never reaches the `{id}` matcher.
pub fn user_routes() -> Router<AppState> {
    Router::new()
        // POST /api/user registers, GET /api/user returns the caller (403 when anonymous).
        .route(
            "/api/user",
            post(users::create_user).get(users::get_current_user),
        )
        // GET /api/user/list
        // Admin-only listing for the user management table.
        .route("/api/user/list", get(users::list_users))
        // GET/PUT/DELETE /api/user/{id}
        // Admin or self for reads and profile edits; delete is admin-only.
        .route(
            "/api/user/{id}",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        // POST /api/user/{id}/access
        // Admin decision on a pending access request.
        .route("/api/user/{id}/access", post(users::decide_access))
}
