use axum::{
    Json,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::StatusCode,
};
use std::time::Duration;

use crate::{
    AppState,
    auth::AuthContext,
    error::{AppError, AppResult},
    models::{Media, MediaResponse, NewMedia, Role, UploadMediaResponse},
    storage::{display_name, media_blob_name},
};

pub const MAX_FILE_SIZE: usize = 10 << 20;
pub const MAX_UPLOAD_SIZE: usize = 50 << 20;
pub const MAX_FILES_PER_REQUEST: usize = 5;

/// Multipart field carrying the files.
const FILES_FIELD: &str = "photos";

/// sniff_content_type
///
/// Detects the media type from the leading bytes. Only the accepted upload types are
/// recognised; everything else is `None`. The client's declared type is never trusted.
pub fn sniff_content_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if is_mp4(bytes) {
        return Some("video/mp4");
    }
    None
}

/// ISO base media file whose major or compatible brands name an MP4 flavour.
fn is_mp4(bytes: &[u8]) -> bool {
    if bytes.len() < 12 || &bytes[4..8] != b"ftyp" {
        return false;
    }
    let box_size = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if box_size < 12 || box_size % 4 != 0 {
        return false;
    }
    let end = box_size.min(bytes.len());
    // Major brand at 8..12, minor version at 12..16, compatible brands after that.
    std::iter::once(&bytes[8..12])
        .chain(bytes.get(16..end).unwrap_or(&[]).chunks_exact(4))
        .any(|brand| brand.starts_with(b"mp4") || brand == b"isom" || brand == b"iso2")
}

fn multipart_error(e: MultipartError) -> AppError {
    tracing::debug!("multipart rejected: {}", e);
    AppError::Validation(format!(
        "could not read upload (max {} MiB per request): {}",
        MAX_UPLOAD_SIZE >> 20,
        e.body_text()
    ))
}

struct IncomingFile {
    filename: String,
    bytes: Vec<u8>,
}

/// upload_media
///
/// [Admin] Attaches up to five files to a post. Fields: `postId`, optional `restricted`
/// (defaults to the post's flag) and the files under `photos`. Files with an unsupported
/// type or over 10 MiB are skipped and counted as failed; if a row cannot be written its
/// blob is removed again. Answers 200 when everything landed, 206 when only some files did,
/// 400 when none did.
#[utoipa::path(
    post,
    path = "/api/media",
    request_body(content_type = "multipart/form-data", description = "postId, restricted, photos[]"),
    responses(
        (status = 200, description = "All files uploaded", body = UploadMediaResponse),
        (status = 206, description = "Some files uploaded", body = UploadMediaResponse),
        (status = 400, description = "Invalid upload, or every file failed"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "No such post")
    ),
    tag = "media"
)]
pub async fn upload_media(
    auth: AuthContext,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadMediaResponse>)> {
    // Nothing is read from the body before this check.
    auth.require_role(Role::CONTENT_MANAGERS)?;

    let mut post_id: Option<String> = None;
    let mut restricted: Option<String> = None;
    let mut files: Vec<IncomingFile> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "postId" => post_id = Some(field.text().await.map_err(multipart_error)?),
            "restricted" => restricted = Some(field.text().await.map_err(multipart_error)?),
            n if n == FILES_FIELD || n == "photos[]" => {
                if files.len() == MAX_FILES_PER_REQUEST {
                    return Err(AppError::Validation(format!(
                        "at most {} files per upload",
                        MAX_FILES_PER_REQUEST
                    )));
                }
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                files.push(IncomingFile {
                    filename,
                    bytes: bytes.to_vec(),
                });
            }
            other => tracing::debug!(field = other, "ignoring unknown multipart field"),
        }
    }

    let post_id: i32 = post_id
        .as_deref()
        .map(str::trim)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| AppError::Validation("postId must be an integer".to_string()))?;
    let restricted = match restricted.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(v) => Some(v.parse::<bool>().map_err(|_| {
            AppError::Validation("restricted must be true or false".to_string())
        })?),
    };
    if files.is_empty() {
        return Err(AppError::Validation("no files found".to_string()));
    }

    let post = state
        .repo
        .get_post(post_id)
        .await?
        .ok_or_else(|| AppError::NotFound("post not found".to_string()))?;
    let restricted = restricted.unwrap_or(post.restricted);

    let mut uploaded: Vec<Media> = Vec::new();
    let mut failed = 0usize;

    for file in files {
        if file.bytes.len() > MAX_FILE_SIZE {
            tracing::warn!(file = %file.filename, size = file.bytes.len(), "file too large");
            failed += 1;
            continue;
        }
        let Some(content_type) = sniff_content_type(&file.bytes) else {
            tracing::warn!(file = %file.filename, "unsupported file type");
            failed += 1;
            continue;
        };

        let blob_name = media_blob_name(post_id, &file.filename);
        if let Err(e) = state
            .storage
            .upload_blob(&blob_name, content_type, file.bytes)
            .await
        {
            tracing::error!(blob = %blob_name, "upload failed: {}", e);
            failed += 1;
            continue;
        }

        match state
            .repo
            .create_media(NewMedia {
                post_id,
                blob_name: blob_name.clone(),
                content_type: content_type.to_string(),
                restricted,
            })
            .await
        {
            Ok(media) => uploaded.push(media),
            Err(e) => {
                tracing::error!(blob = %blob_name, "media row insert failed: {}", e);
                if let Err(e) = state.storage.delete_blob(&blob_name).await {
                    tracing::warn!(blob = %blob_name, "orphaned blob: {}", e);
                }
                failed += 1;
            }
        }
    }

    if uploaded.is_empty() {
        return Err(AppError::Validation("all uploads failed".to_string()));
    }

    tracing::info!(post_id, uploaded = uploaded.len(), failed, "media uploaded");
    let (status, message) = if failed == 0 {
        (StatusCode::OK, "all files uploaded successfully")
    } else {
        (
            StatusCode::PARTIAL_CONTENT,
            "some files were uploaded successfully",
        )
    };

    Ok((
        status,
        Json(UploadMediaResponse {
            message: message.to_string(),
            uploaded,
            failed,
        }),
    ))
}

/// get_media_for_post
///
/// [Public / restricted] Media of a post, each with a short-lived read URL. A single
/// restricted item the caller may not read fails the whole request, and no URL is signed
/// before that check.
#[utoipa::path(
    get,
    path = "/api/media/{postId}",
    params(("postId" = i32, Path, description = "Post id")),
    responses(
        (status = 200, description = "Media with read URLs", body = [MediaResponse]),
        (status = 403, description = "Restricted media")
    ),
    tag = "media"
)]
pub async fn get_media_for_post(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(post_id): Path<i32>,
) -> AppResult<Json<Vec<MediaResponse>>> {
    let media = state.repo.list_media_for_post(post_id).await?;

    if media.iter().any(|m| m.restricted) && !auth.can_read_restricted() {
        return Err(AppError::Forbidden("insufficient privileges".to_string()));
    }

    let ttl = Duration::from_secs(state.config.media_url_ttl_secs);
    let mut response = Vec::with_capacity(media.len());
    for item in media {
        let url = state.storage.get_read_url(&item.blob_name, ttl).await?;
        response.push(MediaResponse {
            id: item.id,
            url,
            content_type: item.content_type,
            name: display_name(&item.blob_name),
            post_id: item.post_id,
            restricted: item.restricted,
        });
    }
    Ok(Json(response))
}

/// delete_media
///
/// [Admin] Removes one media item. The row goes first, then the blob (best effort).
#[utoipa::path(
    delete,
    path = "/api/media/{id}",
    params(("id" = i32, Path, description = "Media id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "No such media")
    ),
    tag = "media"
)]
pub async fn delete_media(
    auth: AuthContext,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    auth.require_role(Role::CONTENT_MANAGERS)?;

    let media = state
        .repo
        .get_media(id)
        .await?
        .ok_or_else(|| AppError::NotFound("media not found".to_string()))?;

    if !state.repo.delete_media(id).await? {
        return Err(AppError::NotFound("media not found".to_string()));
    }
    if let Err(e) = state.storage.delete_blob(&media.blob_name).await {
        tracing::warn!(blob = %media.blob_name, "orphaned blob after media delete: {}", e);
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_accepted_types_from_magic_bytes() {
        assert_eq!(sniff_content_type(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]), Some("image/jpeg"));
        assert_eq!(
            sniff_content_type(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0]),
            Some("image/png")
        );
        assert_eq!(sniff_content_type(b"GIF89a...."), Some("image/gif"));

        let mut mp4 = vec![0, 0, 0, 0x18];
        mp4.extend_from_slice(b"ftypisom");
        mp4.extend_from_slice(&[0, 0, 2, 0]);
        mp4.extend_from_slice(b"isommp41");
        assert_eq!(sniff_content_type(&mp4), Some("video/mp4"));
    }

    #[test]
    fn rejects_everything_else() {
        assert_eq!(sniff_content_type(b"%PDF-1.7"), None);
        assert_eq!(sniff_content_type(b"<html></html>"), None);
        assert_eq!(sniff_content_type(&[]), None);
        // QuickTime container, not MP4.
        let mut mov = vec![0, 0, 0, 0x14];
        mov.extend_from_slice(b"ftypqt  ");
        mov.extend_from_slice(&[0, 0, 2, 0]);
        mov.extend_from_slice(b"qt  ");
        assert_eq!(sniff_content_type(&mov), None);
    }
}
