use crate::{AppState, handlers::posts};
use axum::{Router, routing::get};

pub fn post_routes() -> Router<AppState> {
    Router::new()
        // Listing filters restricted posts for unqualified callers; creation is admin-only.
        .route("/api/posts", get(posts::list_posts).post(posts::create_post))
        .route(
            "/api/posts/{id}",
            get(posts::get_post)
                .put(posts::update_post)
                .delete(posts::delete_post),
        )
}
