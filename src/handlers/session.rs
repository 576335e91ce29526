use axum::{Json, extract::State};
use axum_extra::extract::cookie::CookieJar;
use uuid::Uuid;

use crate::{
    AppState,
    auth::verify_password,
    error::{AppError, AppResult},
    models::{LoginRequest, MessageResponse, SessionResponse},
    session::{SESSION_COOKIE, SessionRecord, cleared_session_cookie, session_cookie},
};

/// create_session
///
/// Signs a user in. On success a session record is stored under a fresh id and the `sid`
/// cookie is set; the token in the body is informational only. Unknown email and wrong
/// password are indistinguishable to the caller.
#[utoipa::path(
    post,
    path = "/api/session",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in, session cookie set", body = SessionResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ErrorBody)
    ),
    tag = "session"
)]
pub async fn create_session(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<SessionResponse>)> {
    let email = payload.email.trim().to_lowercase();

    let credentials = state
        .repo
        .get_credentials(&email)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    if !verify_password(payload.password, credentials.password_hash).await? {
        tracing::info!(user_id = credentials.id, "sign-in rejected: password mismatch");
        return Err(AppError::InvalidCredentials);
    }

    let user = state
        .repo
        .get_user(credentials.id)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    let (token, expires_at) = state.tokens.issue(user.id, user.role)?;
    let session_id = Uuid::new_v4();
    state
        .sessions
        .insert(SessionRecord {
            id: session_id,
            token: token.clone(),
            user_id: user.id,
            role: user.role,
            expires_at,
        })
        .await?;

    tracing::info!(user_id = user.id, "session created");

    let cookie = session_cookie(
        session_id,
        state.tokens.ttl_secs(),
        state.config.cookie_secure,
    );
    Ok((jar.add(cookie), Json(SessionResponse { token })))
}

/// destroy_session
///
/// Signs out. Idempotent: without a session (or with an unknown one) it still succeeds and
/// clears the cookie.
#[utoipa::path(
    delete,
    path = "/api/session",
    responses(
        (status = 200, description = "Signed out", body = MessageResponse),
        (status = 500, description = "Session store unavailable", body = crate::error::ErrorBody)
    ),
    tag = "session"
)]
pub async fn destroy_session(
    State(state): State<AppState>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<MessageResponse>)> {
    if let Some(session_id) = jar
        .get(SESSION_COOKIE)
        .and_then(|c| Uuid::parse_str(c.value()).ok())
    {
        state.sessions.remove(session_id).await?;
        tracing::info!(session = %session_id, "session destroyed");
    }

    let jar = jar.add(cleared_session_cookie(state.config.cookie_secure));
    Ok((jar, Json(MessageResponse::new("signed out"))))
}
