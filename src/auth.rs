use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use uuid::Uuid;

use crate::{
    AppState,
    config::{AppConfig, MAX_SESSION_TTL_SECS},
    error::{AppError, AppResult},
    models::Role,
    session::SESSION_COOKIE,
};

/// Claims
///
/// Payload of the session token. Signed with HS256 and re-verified against the session
/// store on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer (iss): must equal the configured issuer.
    pub iss: String,
    /// Audience (aud): must equal the configured audience.
    pub aud: String,
    /// Subject (sub): the user's id, as a string.
    pub sub: String,
    /// Role snapshot at sign-in. The middleware uses the stored role, not this one.
    pub role: Role,
    pub iat: usize,
    pub exp: usize,
}

/// TokenIssuer
///
/// Mints and verifies session tokens. Built once from `AppConfig` and shared through `AppState`.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    ttl_secs: u64,
}

impl TokenIssuer {
    pub fn new(config: &AppConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.jwt_issuer.as_str()]);
        validation.set_audience(&[config.jwt_audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.validate_exp = true;
        // A token is dead the second it expires; the session record shares the same instant.
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            // `load` already rejects larger values; hand-built configs are clamped.
            ttl_secs: config.session_ttl_secs.min(MAX_SESSION_TTL_SECS),
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    /// issue
    ///
    /// Signs a token for `user_id` valid for the configured TTL. Returns the token together
    /// with its expiry so the session record can carry the same instant.
    pub fn issue(&self, user_id: i32, role: Role) -> AppResult<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.ttl_secs as i64);
        let claims = Claims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            sub: user_id.to_string(),
            role,
            iat: now.timestamp() as usize,
            exp: expires_at.timestamp() as usize,
        };

        // A signing failure is a server fault, never the caller's.
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::Internal(format!("token signing failed: {}", e)))?;
        Ok((token, expires_at))
    }

    /// Checks signature, issuer, audience and expiry.
    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation)?;
        Ok(data.claims)
    }
}

// --- Passwords ---

/// Hashes a password with bcrypt on the blocking pool.
pub async fn hash_password(password: String) -> AppResult<String> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| AppError::Internal(format!("hash task failed: {}", e)))?
        .map_err(|e| AppError::Internal(format!("password hashing failed: {}", e)))
}

/// verify_password
///
/// Constant-time bcrypt comparison, on the blocking pool. A malformed stored hash counts
/// as a mismatch.
pub async fn verify_password(password: String, hash: String) -> AppResult<bool> {
    let outcome = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| AppError::Internal(format!("verify task failed: {}", e)))?;

    match outcome {
        Ok(matches) => Ok(matches),
        Err(e) => {
            tracing::warn!("stored password hash could not be checked: {}", e);
            Ok(false)
        }
    }
}

// --- Request identity ---

/// AuthContext
///
/// Identity attached to every request by `resolve_session`. Anonymous requests get the
/// default value (`authenticated == false`); handlers decide locally what that means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthContext {
    pub authenticated: bool,
    pub user_id: i32,
    pub role: Role,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: i32, role: Role) -> Self {
        Self {
            authenticated: true,
            user_id,
            role,
        }
    }

    /// Returns the caller's id, or `Unauthorized` for anonymous requests.
    pub fn require_authenticated(&self) -> AppResult<i32> {
        if self.authenticated {
            Ok(self.user_id)
        } else {
            Err(AppError::Unauthorized("authentication required".to_string()))
        }
    }

    /// require_role
    ///
    /// `Unauthorized` when anonymous, `Forbidden` when the caller's role is outside `allowed`.
    pub fn require_role(&self, allowed: &[Role]) -> AppResult<i32> {
        let user_id = self.require_authenticated()?;
        if self.role.is_one_of(allowed) {
            Ok(user_id)
        } else {
            Err(AppError::Forbidden("insufficient role".to_string()))
        }
    }

    /// True for an authenticated caller whose role is in `allowed`.
    pub fn has_role(&self, allowed: &[Role]) -> bool {
        self.authenticated && self.role.is_one_of(allowed)
    }

    pub fn can_read_restricted(&self) -> bool {
        self.has_role(Role::RESTRICTED_READERS)
    }

    pub fn is_user(&self, user_id: i32) -> bool {
        self.authenticated && self.user_id == user_id
    }
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<AuthContext>()
            .copied()
            .unwrap_or_default())
    }
}

/// resolve_session
///
/// Middleware run in front of every route. Resolves the `sid` cookie into an `AuthContext`
/// and stores it in the request extensions. Never rejects and never touches the response:
/// missing, invalid and expired sessions all continue as anonymous.
pub async fn resolve_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(request.headers());
    let context = match jar
        .get(SESSION_COOKIE)
        .and_then(|c| Uuid::parse_str(c.value()).ok())
    {
        Some(session_id) => authenticate(&state, session_id).await,
        None => AuthContext::anonymous(),
    };

    request.extensions_mut().insert(context);
    next.run(request).await
}

/// authenticate
///
/// Session id → session record → verified token → current user. Every failure degrades to
/// an anonymous context.
pub async fn authenticate(state: &AppState, session_id: Uuid) -> AuthContext {
    let record = match state.sessions.get(session_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return AuthContext::anonymous(),
        Err(e) => {
            tracing::warn!("session lookup failed: {}", e);
            return AuthContext::anonymous();
        }
    };

    if record.is_expired(Utc::now()) {
        tracing::debug!(session = %session_id, "session expired");
        return AuthContext::anonymous();
    }

    let claims = match state.tokens.verify(&record.token) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!(session = %session_id, "session token rejected: {}", e);
            return AuthContext::anonymous();
        }
    };

    if claims.sub.parse::<i32>().ok() != Some(record.user_id) {
        tracing::warn!(session = %session_id, "token subject does not match session owner");
        return AuthContext::anonymous();
    }

    // The stored role wins over the token snapshot, and deleted users lose access at once.
    match state.repo.get_user(record.user_id).await {
        Ok(Some(user)) => AuthContext::user(user.id, user.role),
        Ok(None) => AuthContext::anonymous(),
        Err(e) => {
            tracing::warn!("user lookup for session failed: {}", e);
            AuthContext::anonymous()
        }
    }
}
