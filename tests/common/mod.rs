#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use blog_backend::{
    AppConfig, AppError, AppResult, AppState, create_router,
    auth::TokenIssuer,
    models::{
        Media, NewMedia, NewPageView, NewUser, Post, PostRequest, Role, User, UserChanges,
        UserCredentials,
    },
    notifications::{Notifier, NotifierState},
    repository::{Repository, RepositoryState},
    session::{InMemorySessionStore, SessionState},
    storage::{MockStorageService, StorageState},
};
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

// --- In-memory repository ---

#[derive(Default)]
struct Tables {
    users: Vec<(User, String)>,
    posts: Vec<Post>,
    media: Vec<Media>,
    page_views: Vec<(NewPageView, DateTime<Utc>)>,
    next_user_id: i32,
    next_post_id: i32,
    next_media_id: i32,
}

/// MemoryRepository
///
/// `Repository` over plain vectors, with the same constraints the schema enforces
/// (unique email, media cascade on post delete).
#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
    /// Makes every `create_media` call fail, to exercise blob cleanup.
    pub fail_media_insert: Mutex<bool>,
}

impl MemoryRepository {
    pub fn user_count(&self) -> usize {
        self.tables.lock().unwrap().users.len()
    }

    pub fn post_count(&self) -> usize {
        self.tables.lock().unwrap().posts.len()
    }

    pub fn media_rows(&self) -> Vec<Media> {
        self.tables.lock().unwrap().media.clone()
    }

    pub fn page_views(&self) -> Vec<NewPageView> {
        self.tables
            .lock()
            .unwrap()
            .page_views
            .iter()
            .map(|(v, _)| v.clone())
            .collect()
    }

    pub fn seed_page_view(&self, visitor: &str, path: &str, at: DateTime<Utc>) {
        self.tables.lock().unwrap().page_views.push((
            NewPageView {
                path: path.to_string(),
                referrer: String::new(),
                user_agent: "test".to_string(),
                visitor_id: visitor.to_string(),
            },
            at,
        ));
    }

    pub fn seed_post(&self, author: i32, title: &str, restricted: bool) -> Post {
        let mut t = self.tables.lock().unwrap();
        t.next_post_id += 1;
        // Spread creation times so ordering is deterministic.
        let created = Utc::now() - Duration::minutes(1000 - t.next_post_id as i64);
        let post = Post {
            post_id: t.next_post_id,
            title: title.to_string(),
            content: format!("{} body", title),
            user_id: author,
            restricted,
            created_at: created,
            updated_at: created,
        };
        t.posts.push(post.clone());
        post
    }

    pub fn seed_media(&self, post_id: i32, name: &str, restricted: bool) -> Media {
        let mut t = self.tables.lock().unwrap();
        t.next_media_id += 1;
        let media = Media {
            id: t.next_media_id,
            post_id,
            blob_name: format!("blog-media/{}_{}", post_id, name),
            content_type: "image/png".to_string(),
            restricted,
            created_at: Utc::now(),
        };
        t.media.push(media.clone());
        media
    }

    pub fn role_of(&self, id: i32) -> Option<Role> {
        self.tables
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|(u, _)| u.id == id)
            .map(|(u, _)| u.role)
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let mut t = self.tables.lock().unwrap();
        if t.users.iter().any(|(u, _)| u.email == user.email) {
            return Err(AppError::Conflict("email already registered".to_string()));
        }
        t.next_user_id += 1;
        let created = User {
            id: t.next_user_id,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            role: user.role,
            email_notification: user.email_notification,
            created_at: Utc::now(),
        };
        t.users.push((created.clone(), user.password_hash));
        Ok(created)
    }

    async fn get_user(&self, id: i32) -> AppResult<Option<User>> {
        let t = self.tables.lock().unwrap();
        Ok(t.users.iter().find(|(u, _)| u.id == id).map(|(u, _)| u.clone()))
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let t = self.tables.lock().unwrap();
        Ok(t.users
            .iter()
            .find(|(u, _)| u.email == email)
            .map(|(u, _)| u.clone()))
    }

    async fn get_credentials(&self, email: &str) -> AppResult<Option<UserCredentials>> {
        let t = self.tables.lock().unwrap();
        Ok(t.users
            .iter()
            .find(|(u, _)| u.email == email)
            .map(|(u, hash)| UserCredentials {
                id: u.id,
                password_hash: hash.clone(),
            }))
    }

    async fn list_users(&self) -> AppResult<Vec<User>> {
        let t = self.tables.lock().unwrap();
        Ok(t.users.iter().map(|(u, _)| u.clone()).collect())
    }

    async fn update_user(&self, id: i32, changes: UserChanges) -> AppResult<Option<User>> {
        let mut t = self.tables.lock().unwrap();
        if t
            .users
            .iter()
            .any(|(u, _)| u.email == changes.email && u.id != id)
        {
            return Err(AppError::Conflict("email already registered".to_string()));
        }
        Ok(t.users.iter_mut().find(|(u, _)| u.id == id).map(|(u, _)| {
            u.first_name = changes.first_name;
            u.last_name = changes.last_name;
            u.email = changes.email;
            u.role = changes.role;
            u.email_notification = changes.email_notification;
            u.clone()
        }))
    }

    async fn set_user_role(&self, id: i32, role: Role) -> AppResult<Option<User>> {
        let mut t = self.tables.lock().unwrap();
        Ok(t.users.iter_mut().find(|(u, _)| u.id == id).map(|(u, _)| {
            u.role = role;
            u.clone()
        }))
    }

    async fn delete_user(&self, id: i32) -> AppResult<bool> {
        let mut t = self.tables.lock().unwrap();
        if t.posts.iter().any(|p| p.user_id == id) {
            return Err(AppError::Conflict("record is still referenced".to_string()));
        }
        let before = t.users.len();
        t.users.retain(|(u, _)| u.id != id);
        Ok(t.users.len() < before)
    }

    async fn list_notification_subscribers(&self) -> AppResult<Vec<User>> {
        let t = self.tables.lock().unwrap();
        Ok(t.users
            .iter()
            .filter(|(u, _)| u.email_notification)
            .map(|(u, _)| u.clone())
            .collect())
    }

    async fn create_post(&self, user_id: i32, post: PostRequest) -> AppResult<Post> {
        let mut t = self.tables.lock().unwrap();
        t.next_post_id += 1;
        let now = Utc::now();
        let created = Post {
            post_id: t.next_post_id,
            title: post.title,
            content: post.content,
            user_id,
            restricted: post.restricted,
            created_at: now,
            updated_at: now,
        };
        t.posts.push(created.clone());
        Ok(created)
    }

    async fn list_posts(&self, include_restricted: bool, limit: i64) -> AppResult<Vec<Post>> {
        let t = self.tables.lock().unwrap();
        let mut posts: Vec<Post> = t
            .posts
            .iter()
            .filter(|p| include_restricted || !p.restricted)
            .cloned()
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.post_id.cmp(&a.post_id)));
        posts.truncate(limit as usize);
        Ok(posts)
    }

    async fn get_post(&self, id: i32) -> AppResult<Option<Post>> {
        let t = self.tables.lock().unwrap();
        Ok(t.posts.iter().find(|p| p.post_id == id).cloned())
    }

    async fn update_post(&self, id: i32, post: PostRequest) -> AppResult<Option<Post>> {
        let mut t = self.tables.lock().unwrap();
        Ok(t.posts.iter_mut().find(|p| p.post_id == id).map(|p| {
            p.title = post.title;
            p.content = post.content;
            p.restricted = post.restricted;
            p.updated_at = Utc::now();
            p.clone()
        }))
    }

    async fn delete_post(&self, id: i32) -> AppResult<bool> {
        let mut t = self.tables.lock().unwrap();
        let before = t.posts.len();
        t.posts.retain(|p| p.post_id != id);
        let deleted = t.posts.len() < before;
        if deleted {
            t.media.retain(|m| m.post_id != id);
        }
        Ok(deleted)
    }

    async fn create_media(&self, media: NewMedia) -> AppResult<Media> {
        if *self.fail_media_insert.lock().unwrap() {
            return Err(AppError::Internal("simulated insert failure".to_string()));
        }
        let mut t = self.tables.lock().unwrap();
        t.next_media_id += 1;
        let created = Media {
            id: t.next_media_id,
            post_id: media.post_id,
            blob_name: media.blob_name,
            content_type: media.content_type,
            restricted: media.restricted,
            created_at: Utc::now(),
        };
        t.media.push(created.clone());
        Ok(created)
    }

    async fn list_media_for_post(&self, post_id: i32) -> AppResult<Vec<Media>> {
        let t = self.tables.lock().unwrap();
        Ok(t.media.iter().filter(|m| m.post_id == post_id).cloned().collect())
    }

    async fn get_media(&self, id: i32) -> AppResult<Option<Media>> {
        let t = self.tables.lock().unwrap();
        Ok(t.media.iter().find(|m| m.id == id).cloned())
    }

    async fn delete_media(&self, id: i32) -> AppResult<bool> {
        let mut t = self.tables.lock().unwrap();
        let before = t.media.len();
        t.media.retain(|m| m.id != id);
        Ok(t.media.len() < before)
    }

    async fn record_page_view(&self, view: NewPageView) -> AppResult<()> {
        self.tables
            .lock()
            .unwrap()
            .page_views
            .push((view, Utc::now()));
        Ok(())
    }

    async fn total_views(&self, since: DateTime<Utc>) -> AppResult<i64> {
        let t = self.tables.lock().unwrap();
        Ok(t.page_views.iter().filter(|(_, at)| *at >= since).count() as i64)
    }

    async fn unique_visitors(&self, since: DateTime<Utc>) -> AppResult<i64> {
        let t = self.tables.lock().unwrap();
        let mut visitors: Vec<&str> = t
            .page_views
            .iter()
            .filter(|(_, at)| *at >= since)
            .map(|(v, _)| v.visitor_id.as_str())
            .collect();
        visitors.sort();
        visitors.dedup();
        Ok(visitors.len() as i64)
    }

    async fn views_by_path(&self, since: DateTime<Utc>) -> AppResult<BTreeMap<String, i64>> {
        let t = self.tables.lock().unwrap();
        let mut counts = BTreeMap::new();
        for (view, _) in t.page_views.iter().filter(|(_, at)| *at >= since) {
            *counts.entry(view.path.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn average_visit_secs(&self, since: DateTime<Utc>) -> AppResult<Option<f64>> {
        let t = self.tables.lock().unwrap();
        let mut by_visitor: HashMap<&str, Vec<DateTime<Utc>>> = HashMap::new();
        for (view, at) in t.page_views.iter().filter(|(_, at)| *at >= since) {
            by_visitor.entry(view.visitor_id.as_str()).or_default().push(*at);
        }

        let mut durations = Vec::new();
        for times in by_visitor.values_mut() {
            times.sort();
            let mut start = times[0];
            let mut last = times[0];
            let mut views = 1;
            for &at in &times[1..] {
                if at - last > Duration::minutes(30) {
                    if views > 1 {
                        durations.push((last - start).num_seconds() as f64);
                    }
                    start = at;
                    views = 0;
                }
                last = at;
                views += 1;
            }
            if views > 1 {
                durations.push((last - start).num_seconds() as f64);
            }
        }

        if durations.is_empty() {
            Ok(None)
        } else {
            Ok(Some(durations.iter().sum::<f64>() / durations.len() as f64))
        }
    }

    async fn purge_page_views_before(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let mut t = self.tables.lock().unwrap();
        let count = t.page_views.len();
        t.page_views.retain(|(_, at)| *at >= before);
        Ok((count - t.page_views.len()) as u64)
    }
}

// --- Recording notifier ---

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    NewPost { to: String, post_id: i32 },
    NewMember { email: String },
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Sent>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn new_post(&self, recipient: &User, post: &Post) -> AppResult<()> {
        self.sent.lock().unwrap().push(Sent::NewPost {
            to: recipient.email.clone(),
            post_id: post.post_id,
        });
        Ok(())
    }

    async fn new_member(&self, member: &User) -> AppResult<()> {
        self.sent.lock().unwrap().push(Sent::NewMember {
            email: member.email.clone(),
        });
        Ok(())
    }
}

// --- Test application ---

pub const PASSWORD: &str = "correct-horse-battery";

pub struct TestApp {
    pub router: Router,
    pub repo: Arc<MemoryRepository>,
    pub storage: MockStorageService,
    pub sessions: Arc<InMemorySessionStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub tokens: TokenIssuer,
    pub config: AppConfig,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_storage(MockStorageService::new())
    }

    pub fn with_storage(storage: MockStorageService) -> Self {
        let config = AppConfig::default();
        let repo = Arc::new(MemoryRepository::default());
        let sessions = Arc::new(InMemorySessionStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let tokens = TokenIssuer::new(&config);

        let state = AppState {
            repo: repo.clone() as RepositoryState,
            storage: Arc::new(storage.clone()) as StorageState,
            sessions: sessions.clone() as SessionState,
            notifier: notifier.clone() as NotifierState,
            tokens: tokens.clone(),
            config: config.clone(),
        };

        Self {
            router: create_router(state),
            repo,
            storage,
            sessions,
            notifier,
            tokens,
            config,
        }
    }

    /// Inserts a user directly, with a cheap bcrypt cost.
    pub async fn seed_user(&self, email: &str, role: Role) -> User {
        let hash = bcrypt::hash(PASSWORD, 4).unwrap();
        self.repo
            .create_user(NewUser {
                first_name: "Test".to_string(),
                last_name: "User".to_string(),
                email: email.to_string(),
                password_hash: hash,
                role,
                email_notification: false,
            })
            .await
            .unwrap()
    }

    pub async fn seed_subscriber(&self, email: &str, role: Role) -> User {
        let user = self.seed_user(email, role).await;
        self.repo
            .update_user(
                user.id,
                UserChanges {
                    first_name: user.first_name.clone(),
                    last_name: user.last_name.clone(),
                    email: user.email.clone(),
                    role,
                    email_notification: true,
                },
            )
            .await
            .unwrap()
            .unwrap()
    }

    /// Signs in through the API and returns the `Cookie` header value for the session.
    pub async fn sign_in(&self, email: &str) -> String {
        let res = self
            .send(
                Method::POST,
                "/api/session",
                None,
                Some(serde_json::json!({ "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK, "sign-in failed: {}", res.body);
        session_cookie(&res.headers).expect("sign-in did not set the session cookie")
    }

    /// Seeds a user with `role` and returns their id and session cookie.
    pub async fn signed_in(&self, email: &str, role: Role) -> (User, String) {
        let user = self.seed_user(email, role).await;
        let cookie = self.sign_in(email).await;
        (user, cookie)
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        cookie: Option<&str>,
        json: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        let body = match json {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.dispatch(builder.body(body).unwrap()).await
    }

    pub async fn dispatch(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Polls until the spawned notification tasks have delivered `count` messages.
    pub async fn wait_for_notifications(&self, count: usize) -> Vec<Sent> {
        for _ in 0..100 {
            let sent = self.notifier.sent();
            if sent.len() >= count {
                return sent;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.notifier.sent()
    }
}

/// Extracts `sid=<id>` from the response's `Set-Cookie` headers.
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("sid="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

/// Raw `Set-Cookie` header for the session cookie, attributes included.
pub fn raw_session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("sid="))
        .map(str::to_string)
}

// --- Multipart ---

pub const BOUNDARY: &str = "----blogtestboundary";

pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, filename, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name, filename
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
                body.extend_from_slice(bytes);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_request(uri: &str, cookie: Option<&str>, parts: &[Part<'_>]) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(multipart_body(parts))).unwrap()
}

pub const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0, 16, b'J', b'F', b'I', b'F'];
pub const PDF: &[u8] = b"%PDF-1.7 not an image";
