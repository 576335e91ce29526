use crate::{
    AppState,
    handlers::media::{self, MAX_UPLOAD_SIZE},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Media Router
///
/// The upload route raises axum's default 2 MiB body limit to the per-request maximum;
/// per-file limits are enforced in the handler.
pub fn media_routes() -> Router<AppState> {
    Router::new()
        // POST /api/media
        // Multipart upload (admin). The body limit sits on this route only.
        .route(
            "/api/media",
            post(media::upload_media).layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE)),
        )
        // GET /api/media/{id} lists a post's media (id is the post id);
        // DELETE /api/media/{id} removes a single media item (id is the media id).
        .route(
            "/api/media/{id}",
            get(media::get_media_for_post).delete(media::delete_media),
        )
}
