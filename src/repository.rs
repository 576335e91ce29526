use crate::{
    error::{AppError, AppResult},
    models::{
        Media, NewMedia, NewPageView, NewUser, Post, PostRequest, Role, User, UserChanges,
        UserCredentials,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Repository Trait
///
/// Contract for every persistence operation the handlers need. Handlers only see
/// `Arc<dyn Repository>`, so tests swap in an in-memory implementation.
///
/// Authorization never happens here; callers have already checked the `AuthContext`.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    /// Fails with `Conflict` when the email is already registered.
    async fn create_user(&self, user: NewUser) -> AppResult<User>;
    async fn get_user(&self, id: i32) -> AppResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>>;
    /// Id and stored hash for sign-in.
    async fn get_credentials(&self, email: &str) -> AppResult<Option<UserCredentials>>;
    async fn list_users(&self) -> AppResult<Vec<User>>;
    async fn update_user(&self, id: i32, changes: UserChanges) -> AppResult<Option<User>>;
    async fn set_user_role(&self, id: i32, role: Role) -> AppResult<Option<User>>;
    async fn delete_user(&self, id: i32) -> AppResult<bool>;
    /// Users who opted into new-post emails.
    async fn list_notification_subscribers(&self) -> AppResult<Vec<User>>;

    // --- Posts ---
    async fn create_post(&self, user_id: i32, post: PostRequest) -> AppResult<Post>;
    /// Most recent first. Restricted posts are only included when asked for.
    async fn list_posts(&self, include_restricted: bool, limit: i64) -> AppResult<Vec<Post>>;
    async fn get_post(&self, id: i32) -> AppResult<Option<Post>>;
    async fn update_post(&self, id: i32, post: PostRequest) -> AppResult<Option<Post>>;
    /// Media rows go with the post (ON DELETE CASCADE).
    async fn delete_post(&self, id: i32) -> AppResult<bool>;

    // --- Media ---
    async fn create_media(&self, media: NewMedia) -> AppResult<Media>;
    async fn list_media_for_post(&self, post_id: i32) -> AppResult<Vec<Media>>;
    async fn get_media(&self, id: i32) -> AppResult<Option<Media>>;
    async fn delete_media(&self, id: i32) -> AppResult<bool>;

    // --- Analytics ---
    async fn record_page_view(&self, view: NewPageView) -> AppResult<()>;
    async fn total_views(&self, since: DateTime<Utc>) -> AppResult<i64>;
    async fn unique_visitors(&self, since: DateTime<Utc>) -> AppResult<i64>;
    async fn views_by_path(&self, since: DateTime<Utc>) -> AppResult<BTreeMap<String, i64>>;
    /// Mean visit length in seconds. A visit is a run of views from one visitor with gaps
    /// under 30 minutes; single-view visits are ignored. `None` when there are none.
    async fn average_visit_secs(&self, since: DateTime<Utc>) -> AppResult<Option<f64>>;
    async fn purge_page_views_before(&self, before: DateTime<Utc>) -> AppResult<u64>;
}

/// RepositoryState
///
/// Shared handle to the persistence layer stored in `AppState`.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// `Repository` backed by PostgreSQL through a sqlx pool.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str = "id, first_name, last_name, email, role, email_notification, created_at";
const POST_COLUMNS: &str = "post_id, title, content, user_id, restricted, created_at, updated_at";
const MEDIA_COLUMNS: &str = "id, post_id, blob_name, content_type, restricted, created_at";

/// Logs the failure and maps constraint violations onto client errors.
fn db_error(op: &str, e: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            let message = match db.constraint() {
                Some("users_email_key") => "email already registered",
                Some("media_blob_name_key") => "blob already attached to another media item",
                _ => "record already exists",
            };
            return AppError::Conflict(message.to_string());
        }
        if db.is_foreign_key_violation() {
            return AppError::Conflict("record is still referenced".to_string());
        }
    }
    tracing::error!("{} error: {:?}", op, e);
    AppError::Database(e)
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let sql = format!(
            r#"INSERT INTO users (first_name, last_name, email, password, role, email_notification)
               VALUES ($1, $2, $3, $4, $5, $6)
               RETURNING {USER_COLUMNS}"#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role)
            .bind(user.email_notification)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("create_user", e))
    }

    async fn get_user(&self, id: i32) -> AppResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get_user", e))
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get_user_by_email", e))
    }

    async fn get_credentials(&self, email: &str) -> AppResult<Option<UserCredentials>> {
        sqlx::query_as::<_, UserCredentials>(
            "SELECT id, password AS password_hash FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get_credentials", e))
    }

    async fn list_users(&self) -> AppResult<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");
        sqlx::query_as::<_, User>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list_users", e))
    }

    /// update_user
    ///
    /// Full replacement of the profile columns; concurrent updates resolve last-write-wins.
    async fn update_user(&self, id: i32, changes: UserChanges) -> AppResult<Option<User>> {
        let sql = format!(
            r#"UPDATE users
               SET first_name = $1, last_name = $2, email = $3, role = $4,
                   email_notification = $5, updated_at = now()
               WHERE id = $6
               RETURNING {USER_COLUMNS}"#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&changes.first_name)
            .bind(&changes.last_name)
            .bind(&changes.email)
            .bind(changes.role)
            .bind(changes.email_notification)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("update_user", e))
    }

    async fn set_user_role(&self, id: i32, role: Role) -> AppResult<Option<User>> {
        let sql = format!(
            "UPDATE users SET role = $1, updated_at = now() WHERE id = $2 RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(role)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("set_user_role", e))
    }

    async fn delete_user(&self, id: i32) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete_user", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_notification_subscribers(&self) -> AppResult<Vec<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email_notification = true");
        sqlx::query_as::<_, User>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list_notification_subscribers", e))
    }

    async fn create_post(&self, user_id: i32, post: PostRequest) -> AppResult<Post> {
        let sql = format!(
            r#"INSERT INTO posts (title, content, user_id, restricted)
               VALUES ($1, $2, $3, $4)
               RETURNING {POST_COLUMNS}"#
        );
        sqlx::query_as::<_, Post>(&sql)
            .bind(&post.title)
            .bind(&post.content)
            .bind(user_id)
            .bind(post.restricted)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("create_post", e))
    }

    async fn list_posts(&self, include_restricted: bool, limit: i64) -> AppResult<Vec<Post>> {
        let mut builder: sqlx::QueryBuilder<sqlx::Postgres> =
            sqlx::QueryBuilder::new(format!("SELECT {POST_COLUMNS} FROM posts"));
        if !include_restricted {
            builder.push(" WHERE restricted = false");
        }
        builder.push(" ORDER BY created_at DESC, post_id DESC LIMIT ");
        builder.push_bind(limit);

        builder
            .build_query_as::<Post>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list_posts", e))
    }

    async fn get_post(&self, id: i32) -> AppResult<Option<Post>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE post_id = $1");
        sqlx::query_as::<_, Post>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get_post", e))
    }

    async fn update_post(&self, id: i32, post: PostRequest) -> AppResult<Option<Post>> {
        let sql = format!(
            r#"UPDATE posts
               SET title = $1, content = $2, restricted = $3, updated_at = now()
               WHERE post_id = $4
               RETURNING {POST_COLUMNS}"#
        );
        sqlx::query_as::<_, Post>(&sql)
            .bind(&post.title)
            .bind(&post.content)
            .bind(post.restricted)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("update_post", e))
    }

    async fn delete_post(&self, id: i32) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE post_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete_post", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_media(&self, media: NewMedia) -> AppResult<Media> {
        let sql = format!(
            r#"INSERT INTO media (post_id, blob_name, content_type, restricted)
               VALUES ($1, $2, $3, $4)
               RETURNING {MEDIA_COLUMNS}"#
        );
        sqlx::query_as::<_, Media>(&sql)
            .bind(media.post_id)
            .bind(&media.blob_name)
            .bind(&media.content_type)
            .bind(media.restricted)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("create_media", e))
    }

    async fn list_media_for_post(&self, post_id: i32) -> AppResult<Vec<Media>> {
        let sql = format!("SELECT {MEDIA_COLUMNS} FROM media WHERE post_id = $1 ORDER BY id");
        sqlx::query_as::<_, Media>(&sql)
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| db_error("list_media_for_post", e))
    }

    async fn get_media(&self, id: i32) -> AppResult<Option<Media>> {
        let sql = format!("SELECT {MEDIA_COLUMNS} FROM media WHERE id = $1");
        sqlx::query_as::<_, Media>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error("get_media", e))
    }

    async fn delete_media(&self, id: i32) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM media WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("delete_media", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_page_view(&self, view: NewPageView) -> AppResult<()> {
        sqlx::query(
            r#"INSERT INTO page_views (path, referrer, user_agent, visitor_id, timestamp)
               VALUES ($1, $2, $3, $4, now())"#,
        )
        .bind(&view.path)
        .bind(&view.referrer)
        .bind(&view.user_agent)
        .bind(&view.visitor_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("record_page_view", e))?;
        Ok(())
    }

    async fn total_views(&self, since: DateTime<Utc>) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM page_views WHERE timestamp >= $1")
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("total_views", e))
    }

    async fn unique_visitors(&self, since: DateTime<Utc>) -> AppResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT visitor_id) FROM page_views WHERE timestamp >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("unique_visitors", e))
    }

    async fn views_by_path(&self, since: DateTime<Utc>) -> AppResult<BTreeMap<String, i64>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"SELECT path, COUNT(*) FROM page_views
               WHERE timestamp >= $1
               GROUP BY path"#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("views_by_path", e))?;
        Ok(rows.into_iter().collect())
    }

    /// average_visit_secs
    ///
    /// Window functions split each visitor's views into visits at 30-minute gaps, then average
    /// the span of every visit with at least two views.
    async fn average_visit_secs(&self, since: DateTime<Utc>) -> AppResult<Option<f64>> {
        sqlx::query_scalar::<_, Option<f64>>(
            r#"
            WITH marked AS (
                SELECT visitor_id, timestamp,
                    CASE WHEN LAG(timestamp) OVER w IS NULL
                           OR timestamp - LAG(timestamp) OVER w > INTERVAL '30 minutes'
                         THEN 1 ELSE 0 END AS new_visit
                FROM page_views
                WHERE timestamp >= $1
                WINDOW w AS (PARTITION BY visitor_id ORDER BY timestamp)
            ),
            grouped AS (
                SELECT visitor_id, timestamp,
                    SUM(new_visit) OVER (PARTITION BY visitor_id ORDER BY timestamp) AS visit
                FROM marked
            ),
            visits AS (
                SELECT MAX(timestamp) - MIN(timestamp) AS duration
                FROM grouped
                GROUP BY visitor_id, visit
                HAVING COUNT(*) > 1
            )
            SELECT EXTRACT(EPOCH FROM AVG(duration))::float8 FROM visits
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("average_visit_secs", e))
    }

    async fn purge_page_views_before(&self, before: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM page_views WHERE timestamp < $1")
            .bind(before)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("purge_page_views_before", e))?;
        Ok(result.rows_affected())
    }
}
