use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};

// --- Roles ---

/// Role
///
/// Closed set of account roles. The integer values are the storage and wire representation;
/// they carry no ordering, so every permission check is a membership test against an
/// explicit role set (see the associated constants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[serde(try_from = "i32", into = "i32")]
#[repr(i32)]
pub enum Role {
    /// Asked for privileged access, waiting on an admin decision.
    Requested = -1,
    #[default]
    NonPrivileged = 0,
    Admin = 1,
    Privileged = 2,
}

impl Role {
    /// Roles allowed to create, edit and delete posts and media, and to manage users.
    pub const CONTENT_MANAGERS: &'static [Role] = &[Role::Admin];
    /// Roles allowed to read restricted posts and media.
    pub const RESTRICTED_READERS: &'static [Role] = &[Role::Admin, Role::Privileged];

    pub fn is_one_of(self, allowed: &[Role]) -> bool {
        allowed.contains(&self)
    }

    pub fn can_read_restricted(self) -> bool {
        self.is_one_of(Self::RESTRICTED_READERS)
    }
}

impl TryFrom<i32> for Role {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Role::Requested),
            0 => Ok(Role::NonPrivileged),
            1 => Ok(Role::Admin),
            2 => Ok(Role::Privileged),
            other => Err(format!("unknown role value {}", other)),
        }
    }
}

impl From<Role> for i32 {
    fn from(role: Role) -> i32 {
        role as i32
    }
}

// --- Users ---

/// User
///
/// Public view of an account row in the `users` table. The password hash is never part of it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct User {
    pub id: i32,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[ts(type = "number")]
    #[schema(value_type = i32)]
    pub role: Role,
    pub email_notification: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// UserCredentials
///
/// Internal projection used only by sign-in: id plus stored bcrypt hash.
#[derive(Debug, Clone, FromRow)]
pub struct UserCredentials {
    pub id: i32,
    pub password_hash: String,
}

/// NewUser
///
/// Validated registration data with the password already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub email_notification: bool,
}

/// UserChanges
///
/// Full replacement of the mutable profile columns (last write wins).
#[derive(Debug, Clone)]
pub struct UserChanges {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: Role,
    pub email_notification: bool,
}

/// CreateUserRequest
///
/// Registration payload (POST /api/user). `restricted` is the requested access level:
/// `-1` asks an admin for privileged access, `0` registers a regular reader.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreateUserRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub restricted: i32,
    #[serde(default)]
    pub email_notification: bool,
}

/// UpdateUserRequest
///
/// Profile update payload (PUT /api/user/{id}). `role` and `emailNotification` are optional and
/// keep their stored values when absent; a `role` that differs from the stored one goes through
/// the role-change policy.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateUserRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Left unchanged when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_notification: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "number | null")]
    #[schema(value_type = Option<i32>)]
    pub role: Option<Role>,
}

/// AccessDecision
///
/// Admin answer to a pending access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum AccessDecision {
    Approve,
    Deny,
}

impl AccessDecision {
    /// The role a `Requested` account ends up in.
    pub fn resulting_role(self) -> Role {
        match self {
            AccessDecision::Approve => Role::Privileged,
            AccessDecision::Deny => Role::NonPrivileged,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AccessDecisionRequest {
    pub decision: AccessDecision,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreatedUserResponse {
    pub id: i32,
}

// --- Sessions ---

/// LoginRequest
///
/// Sign-in payload (POST /api/session).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct SessionResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// --- Posts ---

/// Post
///
/// A row of the `posts` table. `content` is markdown.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Post {
    pub post_id: i32,
    pub title: String,
    pub content: String,
    pub user_id: i32,
    pub restricted: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

/// PostRequest
///
/// Create/update payload for posts (POST /api/posts, PUT /api/posts/{id}).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct PostRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub restricted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CreatedPostResponse {
    pub post_id: i32,
}

// --- Media ---

/// Media
///
/// A row of the `media` table: one blob attached to a post.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Media {
    pub id: i32,
    pub post_id: i32,
    pub blob_name: String,
    pub content_type: String,
    pub restricted: bool,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMedia {
    pub post_id: i32,
    pub blob_name: String,
    pub content_type: String,
    pub restricted: bool,
}

/// MediaResponse
///
/// A media item as served to readers, with a time-limited read URL.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct MediaResponse {
    pub id: i32,
    pub url: String,
    pub content_type: String,
    pub name: String,
    pub post_id: i32,
    pub restricted: bool,
}

/// UploadMediaResponse
///
/// Outcome of a multipart upload: the records created and how many files were rejected.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UploadMediaResponse {
    pub message: String,
    pub uploaded: Vec<Media>,
    pub failed: usize,
}

// --- Analytics ---

/// PageViewRequest
///
/// Beacon sent by the client on every route change (POST /api/analytics/pageview).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct PageViewRequest {
    pub path: String,
    #[serde(default)]
    pub referrer: String,
}

#[derive(Debug, Clone)]
pub struct NewPageView {
    pub path: String,
    pub referrer: String,
    pub user_agent: String,
    pub visitor_id: String,
}

/// AnalyticsSummary
///
/// Aggregated page-view figures for the admin dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AnalyticsSummary {
    pub total_views: i64,
    pub unique_visitors: i64,
    pub path_counts: BTreeMap<String, i64>,
    /// Average session length formatted as `MM:SS`.
    pub avg_time_on_site: String,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct SummaryQuery {
    /// One of `1d`, `7d`, `30d`, `all`. Anything else means `7d`.
    pub range: Option<String>,
}

/// SummaryRange
///
/// Time window of an analytics summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryRange {
    Day,
    Week,
    Month,
    All,
}

impl SummaryRange {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("1d") => SummaryRange::Day,
            Some("30d") => SummaryRange::Month,
            Some("all") => SummaryRange::All,
            _ => SummaryRange::Week,
        }
    }

    /// Inclusive lower bound of the window relative to `now`.
    pub fn since(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            SummaryRange::Day => now - Duration::days(1),
            SummaryRange::Week => now - Duration::days(7),
            SummaryRange::Month => now - Duration::days(30),
            SummaryRange::All => DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct PurgeResponse {
    pub purged: u64,
}
