use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    AppState,
    auth::AuthContext,
    error::{AppError, AppResult},
    handlers::required,
    models::{CreatedPostResponse, Post, PostRequest, Role},
    notifications::notify_subscribers,
};

/// Number of posts returned by the listing.
const RECENT_POSTS: i64 = 10;

fn validated(payload: PostRequest) -> AppResult<PostRequest> {
    Ok(PostRequest {
        title: required("title", &payload.title)?,
        content: required("content", &payload.content)?,
        restricted: payload.restricted,
    })
}

/// list_posts
///
/// [Public] Most recent posts. Restricted posts are included only for callers allowed to
/// read them; everyone else gets the public subset instead of an error.
#[utoipa::path(
    get,
    path = "/api/posts",
    responses((status = 200, description = "Recent posts", body = [Post])),
    tag = "posts"
)]
pub async fn list_posts(
    auth: AuthContext,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Post>>> {
    let posts = state
        .repo
        .list_posts(auth.can_read_restricted(), RECENT_POSTS)
        .await?;
    Ok(Json(posts))
}

/// get_post
///
/// [Public / restricted] One post. Restricted posts are 403 for anyone outside
/// the restricted-reader roles, anonymous callers included.
#[utoipa::path(
    get,
    path = "/api/posts/{id}",
    params(("id" = i32, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post", body = Post),
        (status = 403, description = "Restricted post"),
        (status = 404, description = "No such post")
    ),
    tag = "posts"
)]
pub async fn get_post(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<Post>> {
    let post = state
        .repo
        .get_post(id)
        .await?
        .ok_or_else(|| AppError::NotFound("post not found".to_string()))?;

    if post.restricted && !auth.can_read_restricted() {
        return Err(AppError::Forbidden("insufficient privileges".to_string()));
    }
    Ok(Json(post))
}

/// create_post
///
/// [Admin] Publishes a post and emails subscribers in the background.
#[utoipa::path(
    post,
    path = "/api/posts",
    request_body = PostRequest,
    responses(
        (status = 200, description = "Created", body = CreatedPostResponse),
        (status = 400, description = "Missing title or content"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Not an admin")
    ),
    tag = "posts"
)]
pub async fn create_post(
    auth: AuthContext,
    State(state): State<AppState>,
    Json(payload): Json<PostRequest>,
) -> AppResult<Json<CreatedPostResponse>> {
    let author = auth.require_role(Role::CONTENT_MANAGERS)?;
    let post = state.repo.create_post(author, validated(payload)?).await?;
    tracing::info!(post_id = post.post_id, restricted = post.restricted, "post created");

    let post_id = post.post_id;
    match state.repo.list_notification_subscribers().await {
        Ok(subscribers) => notify_subscribers(state.notifier.clone(), subscribers, post),
        Err(e) => tracing::warn!(post_id, "skipping new post notifications: {}", e),
    }

    Ok(Json(CreatedPostResponse { post_id }))
}

/// update_post
///
/// [Admin] Replaces title, content and restriction.
#[utoipa::path(
    put,
    path = "/api/posts/{id}",
    params(("id" = i32, Path, description = "Post id")),
    request_body = PostRequest,
    responses(
        (status = 200, description = "Updated", body = Post),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "No such post")
    ),
    tag = "posts"
)]
pub async fn update_post(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<PostRequest>,
) -> AppResult<Json<Post>> {
    auth.require_role(Role::CONTENT_MANAGERS)?;
    state
        .repo
        .update_post(id, validated(payload)?)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("post not found".to_string()))
}

/// delete_post
///
/// [Admin] Deletes a post with its media. Rows go first; blobs are removed afterwards on a
/// best-effort basis, so a storage hiccup leaves an orphan blob rather than a dangling row.
#[utoipa::path(
    delete,
    path = "/api/posts/{id}",
    params(("id" = i32, Path, description = "Post id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "No such post")
    ),
    tag = "posts"
)]
pub async fn delete_post(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    auth.require_role(Role::CONTENT_MANAGERS)?;

    let media = state.repo.list_media_for_post(id).await?;
    if !state.repo.delete_post(id).await? {
        return Err(AppError::NotFound("post not found".to_string()));
    }

    for item in media {
        if let Err(e) = state.storage.delete_blob(&item.blob_name).await {
            tracing::warn!(blob = %item.blob_name, "orphaned blob after post delete: {}", e);
        }
    }

    tracing::info!(post_id = id, "post deleted");
    Ok(StatusCode::NO_CONTENT)
}
