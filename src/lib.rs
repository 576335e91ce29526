use axum::{
    Router,
    extract::FromRef,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
};
use std::time::Duration;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod notifications;
pub mod repository;
pub mod session;
pub mod storage;

pub mod routes;

// --- Public Re-exports ---

pub use auth::{AuthContext, TokenIssuer};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use notifications::{EmailNotifier, NotifierState};
pub use repository::{PostgresRepository, RepositoryState};
pub use session::{InMemorySessionStore, PostgresSessionStore, SessionState};
pub use storage::{MockStorageService, S3StorageClient, StorageState};

/// ApiDoc
///
/// OpenAPI document for every handler annotated with `#[utoipa::path]`, served as JSON at
/// `/api-docs/openapi.json` and browsable under `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::session::create_session, handlers::session::destroy_session,
        handlers::users::create_user, handlers::users::get_current_user,
        handlers::users::list_users, handlers::users::get_user, handlers::users::update_user,
        handlers::users::decide_access, handlers::users::delete_user,
        handlers::posts::list_posts, handlers::posts::get_post, handlers::posts::create_post,
        handlers::posts::update_post, handlers::posts::delete_post,
        handlers::media::upload_media, handlers::media::get_media_for_post,
        handlers::media::delete_media,
        handlers::analytics::record_page_view, handlers::analytics::get_summary,
        handlers::analytics::purge_page_views,
    ),
    components(
        schemas(
            models::User, models::CreateUserRequest, models::UpdateUserRequest,
            models::AccessDecision, models::AccessDecisionRequest, models::CreatedUserResponse,
            models::LoginRequest, models::SessionResponse, models::MessageResponse,
            models::Post, models::PostRequest, models::CreatedPostResponse,
            models::Media, models::MediaResponse, models::UploadMediaResponse,
            models::PageViewRequest, models::AnalyticsSummary, models::PurgeResponse,
            error::ErrorBody,
        )
    ),
    tags(
        (name = "session", description = "Sign in and sign out"),
        (name = "users", description = "Accounts and roles"),
        (name = "posts", description = "Blog posts"),
        (name = "media", description = "Post attachments"),
        (name = "analytics", description = "Page-view analytics")
    )
)]
struct ApiDoc;

/// AppState
///
/// Single shared container for every service a handler may need. Cheap to clone: each
/// service sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Persistence (users, posts, media, page views).
    pub repo: RepositoryState,
    /// Blob storage for media.
    pub storage: StorageState,
    /// Server-side session records.
    pub sessions: SessionState,
    /// Outbound email notifications.
    pub notifier: NotifierState,
    /// Session token signing and verification.
    pub tokens: TokenIssuer,
    pub config: AppConfig,
}

// --- Axum FromRef Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for StorageState {
    fn from_ref(app_state: &AppState) -> StorageState {
        app_state.storage.clone()
    }
}

impl FromRef<AppState> for SessionState {
    fn from_ref(app_state: &AppState) -> SessionState {
        app_state.sessions.clone()
    }
}

impl FromRef<AppState> for NotifierState {
    fn from_ref(app_state: &AppState) -> NotifierState {
        app_state.notifier.clone()
    }
}

impl FromRef<AppState> for TokenIssuer {
    fn from_ref(app_state: &AppState) -> TokenIssuer {
        app_state.tokens.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles routes, the session middleware, security headers, request correlation and CORS.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    let csp = content_security_policy(&state.config);
    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(routes::api_routes())
        // Every request gets an AuthContext; handlers decide what it must contain.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::resolve_session,
        ))
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(
                    x_request_id.clone(),
                    MakeRequestUuid,
                ))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetResponseHeaderLayer::overriding(
                    header::CONTENT_SECURITY_POLICY,
                    csp,
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::STRICT_TRANSPORT_SECURITY,
                    HeaderValue::from_static("max-age=31536000; includeSubDomains"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::REFERRER_POLICY,
                    HeaderValue::from_static("strict-origin-when-cross-origin"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    HeaderName::from_static("permissions-policy"),
                    HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
                )),
        )
        .layer(cors)
}

/// Credentialed CORS for the configured origins only. Unparseable origins are skipped.
fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(3600))
}

/// Content-Security-Policy allowing media from the configured blob endpoint, so presigned
/// URLs load in the browser.
fn content_security_policy(config: &AppConfig) -> HeaderValue {
    let csp = format!(
        "default-src 'self'; img-src 'self' {endpoint}; media-src 'self' {endpoint};",
        endpoint = config.s3_endpoint
    );
    HeaderValue::from_str(&csp).unwrap_or_else(|_| HeaderValue::from_static("default-src 'self';"))
}

/// trace_span_logger
///
/// Span for `TraceLayer`, tagged with the request id so every log line of a request
/// correlates.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
