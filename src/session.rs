use async_trait::async_trait;
use axum_extra::extract::cookie::{Cookie, SameSite};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::Role,
};

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "sid";

/// SessionRecord
///
/// Server-side half of a session. The cookie only carries `id`; the signed token stays here
/// and is re-verified on every request.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub id: Uuid,
    pub token: String,
    pub user_id: i32,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// SessionStore
///
/// Keyed store of live sessions. Each call is atomic for its key; nothing here spans
/// more than one session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, record: SessionRecord) -> AppResult<()>;
    async fn get(&self, id: Uuid) -> AppResult<Option<SessionRecord>>;
    /// Removing an unknown id is not an error.
    async fn remove(&self, id: Uuid) -> AppResult<()>;
    /// Drops every record whose expiry has passed and returns how many went.
    async fn purge_expired(&self) -> AppResult<u64>;
}

pub type SessionState = Arc<dyn SessionStore>;

/// InMemorySessionStore
///
/// Process-local store for single-instance deployments and tests.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<Uuid, SessionRecord>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, record: SessionRecord) -> AppResult<()> {
        self.sessions.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<SessionRecord>> {
        Ok(self.sessions.get(&id).map(|entry| entry.value().clone()))
    }

    async fn remove(&self, id: Uuid) -> AppResult<()> {
        self.sessions.remove(&id);
        Ok(())
    }

    async fn purge_expired(&self) -> AppResult<u64> {
        let now = Utc::now();
        let expired: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| *entry.key())
            .collect();

        let mut purged = 0;
        for id in expired {
            // Re-check under the shard lock; the session may have been replaced meanwhile.
            if self
                .sessions
                .remove_if(&id, |_, record| record.is_expired(now))
                .is_some()
            {
                purged += 1;
            }
        }
        Ok(purged)
    }
}

/// PostgresSessionStore
///
/// Shared store backed by the `sessions` table, for running several instances behind a
/// load balancer.
pub struct PostgresSessionStore {
    pool: PgPool,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn session_error(op: &str, e: sqlx::Error) -> AppError {
    tracing::error!("session {} error: {:?}", op, e);
    AppError::Session(format!("{} failed", op))
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn insert(&self, record: SessionRecord) -> AppResult<()> {
        sqlx::query(
            r#"INSERT INTO sessions (id, token, user_id, role, expires_at)
               VALUES ($1, $2, $3, $4, $5)"#,
        )
        .bind(record.id)
        .bind(&record.token)
        .bind(record.user_id)
        .bind(record.role)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| session_error("insert", e))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<SessionRecord>> {
        sqlx::query_as::<_, SessionRecord>(
            "SELECT id, token, user_id, role, expires_at FROM sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| session_error("get", e))
    }

    async fn remove(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| session_error("remove", e))?;
        Ok(())
    }

    async fn purge_expired(&self) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(|e| session_error("purge", e))?;
        Ok(result.rows_affected())
    }
}

/// session_cookie
///
/// Builds the `sid` cookie handed out on sign-in.
pub fn session_cookie(id: Uuid, ttl_secs: u64, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id.to_string()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::seconds(ttl_secs as i64))
        .build()
}

/// Removal cookie for sign-out. Path must match the one set on sign-in.
pub fn cleared_session_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}
