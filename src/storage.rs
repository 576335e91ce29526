use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::presigning::PresigningConfig;
use s3::primitives::ByteStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Prefix under which every media blob is stored.
pub const MEDIA_PREFIX: &str = "blog-media";

const MAX_FILENAME_LEN: usize = 100;

/// StorageService
///
/// Contract for the blob store holding post media. Handlers only talk to this trait, so tests
/// run against `MockStorageService` instead of a live bucket.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Creates the configured bucket if missing. Only called for local MinIO setups.
    async fn ensure_bucket_exists(&self);

    async fn upload_blob(&self, name: &str, content_type: &str, bytes: Vec<u8>) -> AppResult<()>;

    async fn delete_blob(&self, name: &str) -> AppResult<()>;

    /// Time-limited signed URL that lets a browser read the blob directly.
    async fn get_read_url(&self, name: &str, ttl: Duration) -> AppResult<String>;
}

/// S3StorageClient
///
/// `StorageService` over any S3-compatible endpoint (MinIO locally, the provider's S3 API in
/// production). Path-style addressing is forced for MinIO compatibility.
#[derive(Clone)]
pub struct S3StorageClient {
    client: s3::Client,
    bucket_name: String,
}

impl S3StorageClient {
    pub async fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            bucket_name: bucket.to_string(),
        }
    }
}

#[async_trait]
impl StorageService for S3StorageClient {
    async fn ensure_bucket_exists(&self) {
        // CreateBucket on an existing bucket fails harmlessly.
        if let Err(e) = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            tracing::debug!("create_bucket {}: {}", self.bucket_name, e);
        }
    }

    async fn upload_blob(&self, name: &str, content_type: &str, bytes: Vec<u8>) -> AppResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(name)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| {
                tracing::error!("upload of {} failed: {:?}", name, e);
                AppError::Storage(format!("upload of {} failed", name))
            })?;
        Ok(())
    }

    async fn delete_blob(&self, name: &str) -> AppResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(name)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("delete of {} failed: {:?}", name, e);
                AppError::Storage(format!("delete of {} failed", name))
            })?;
        Ok(())
    }

    async fn get_read_url(&self, name: &str, ttl: Duration) -> AppResult<String> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| AppError::Storage(format!("invalid presign ttl: {}", e)))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(name)
            .presigned(presigning)
            .await
            .map_err(|e| {
                tracing::error!("presigning {} failed: {:?}", name, e);
                AppError::Storage(format!("presigning {} failed", name))
            })?;

        Ok(presigned.uri().to_string())
    }
}

/// sanitize_filename
///
/// Reduces a client-supplied filename to a single safe path segment: directory components
/// are dropped and anything outside `[A-Za-z0-9._-]` becomes `_`.
pub fn sanitize_filename(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .unwrap_or("");

    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        return "file".to_string();
    }
    if trimmed.len() <= MAX_FILENAME_LEN {
        return trimmed.to_string();
    }

    // Keep the extension when cutting long names. Everything is ASCII here.
    let ext = trimmed
        .rfind('.')
        .map(|i| &trimmed[i..])
        .filter(|ext| ext.len() < 16)
        .unwrap_or("");
    format!("{}{}", &trimmed[..MAX_FILENAME_LEN - ext.len()], ext)
}

/// media_blob_name
///
/// Blob key for a file attached to `post_id`: `blog-media/{post}_{upload id}_{name}`. The upload
/// id is a fresh v4 UUID, so two files with the same name never share (or overwrite) a blob.
pub fn media_blob_name(post_id: i32, filename: &str) -> String {
    format!(
        "{}/{}_{}_{}",
        MEDIA_PREFIX,
        post_id,
        Uuid::new_v4().simple(),
        sanitize_filename(filename)
    )
}

/// Display name of a blob: the key without prefix, post id and upload id.
pub fn display_name(blob_name: &str) -> String {
    let base = blob_name.rsplit('/').next().unwrap_or(blob_name);
    let rest = match base.split_once('_') {
        Some((post, rest)) if post.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => return base.to_string(),
    };
    match rest.split_once('_') {
        Some((upload, name)) if Uuid::try_parse(upload).is_ok() => name.to_string(),
        _ => rest.to_string(),
    }
}

/// MockStorageService
///
/// In-memory `StorageService` for tests. Records every uploaded and deleted key so tests
/// can assert that a rejected request never reached the store. Clones share the records.
#[derive(Clone, Default)]
pub struct MockStorageService {
    /// When true, every upload and delete fails.
    pub should_fail: bool,
    uploaded: Arc<Mutex<Vec<String>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn uploaded(&self) -> Vec<String> {
        self.uploaded.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_bucket_exists(&self) {}

    async fn upload_blob(&self, name: &str, _content_type: &str, _bytes: Vec<u8>) -> AppResult<()> {
        if self.should_fail {
            return Err(AppError::Storage("mock storage failure".to_string()));
        }
        if let Ok(mut uploaded) = self.uploaded.lock() {
            uploaded.push(name.to_string());
        }
        Ok(())
    }

    async fn delete_blob(&self, name: &str) -> AppResult<()> {
        if self.should_fail {
            return Err(AppError::Storage("mock storage failure".to_string()));
        }
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.push(name.to_string());
        }
        Ok(())
    }

    async fn get_read_url(&self, name: &str, ttl: Duration) -> AppResult<String> {
        Ok(format!(
            "http://localhost:9000/mock-bucket/{}?expires={}&signature=fake",
            name,
            ttl.as_secs()
        ))
    }
}

/// StorageState
///
/// Shared handle to the blob store stored in `AppState`.
pub type StorageState = Arc<dyn StorageService>;
