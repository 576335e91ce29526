use axum::{
    Json,
    extract::{ConnectInfo, FromRequestParts, Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header, request::Parts},
};
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::{convert::Infallible, net::SocketAddr};

use crate::{
    AppState,
    auth::AuthContext,
    error::AppResult,
    models::{
        AnalyticsSummary, NewPageView, PageViewRequest, PurgeResponse, Role, SummaryQuery,
        SummaryRange,
    },
};

/// Page views older than this are removed by the purge endpoint.
const RETENTION_DAYS: i64 = 90;

/// ClientIp
///
/// Best guess at the client address: first hop of `X-Forwarded-For`, then `X-Real-IP`,
/// then the socket peer. Falls back to `"unknown"` so analytics never fails a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header_value = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        let forwarded = header_value("x-forwarded-for").and_then(|v| {
            v.split(',')
                .next()
                .map(|hop| hop.trim().to_string())
                .filter(|hop| !hop.is_empty())
        });

        let ip = forwarded
            .or_else(|| header_value("x-real-ip"))
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());

        Ok(ClientIp(ip))
    }
}

/// Salted SHA-256 of the client address, hex encoded. Raw addresses are never stored.
pub fn visitor_id(ip: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ip.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Formats a visit length as `MM:SS`; no data reads `0:00`.
pub fn format_visit_length(secs: Option<f64>) -> String {
    match secs {
        Some(secs) if secs.is_finite() && secs > 0.0 => {
            let total = secs.round() as u64;
            format!("{:02}:{:02}", total / 60, total % 60)
        }
        _ => "0:00".to_string(),
    }
}

/// record_page_view
///
/// [Public] Page-view beacon. Always answers 200, even for a malformed body or a storage
/// failure, so tracking never disturbs the page.
#[utoipa::path(
    post,
    path = "/api/analytics/pageview",
    request_body = PageViewRequest,
    responses((status = 200, description = "Accepted")),
    tag = "analytics"
)]
pub async fn record_page_view(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    payload: Result<Json<PageViewRequest>, JsonRejection>,
) -> StatusCode {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!("ignoring malformed page view: {}", e);
            return StatusCode::OK;
        }
    };

    let path = payload.path.trim();
    if path.is_empty() {
        return StatusCode::OK;
    }

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let view = NewPageView {
        path: path.to_string(),
        referrer: payload.referrer,
        user_agent,
        visitor_id: visitor_id(&ip, &state.config.ip_hash_salt),
    };

    if let Err(e) = state.repo.record_page_view(view).await {
        tracing::warn!("page view not recorded: {}", e);
    }
    StatusCode::OK
}

/// get_summary
///
/// [Admin] Views, unique visitors, per-path counts and average visit length for the
/// requested range (`1d`, `7d`, `30d`, `all`; default `7d`).
#[utoipa::path(
    get,
    path = "/api/analytics/summary",
    params(SummaryQuery),
    responses(
        (status = 200, description = "Summary", body = AnalyticsSummary),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Not an admin")
    ),
    tag = "analytics"
)]
pub async fn get_summary(
    auth: AuthContext,
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> AppResult<Json<AnalyticsSummary>> {
    auth.require_role(Role::CONTENT_MANAGERS)?;

    let since = SummaryRange::parse(query.range.as_deref()).since(Utc::now());

    let total_views = state.repo.total_views(since).await?;
    let unique_visitors = state.repo.unique_visitors(since).await?;
    let path_counts = state.repo.views_by_path(since).await?;
    // The average is a nice-to-have; the rest of the summary still goes out without it.
    let avg_time_on_site = match state.repo.average_visit_secs(since).await {
        Ok(secs) => format_visit_length(secs),
        Err(e) => {
            tracing::warn!("average visit length unavailable: {}", e);
            format_visit_length(None)
        }
    };

    Ok(Json(AnalyticsSummary {
        total_views,
        unique_visitors,
        path_counts,
        avg_time_on_site,
    }))
}

/// purge_page_views
///
/// [Admin] Deletes page views older than the retention window.
#[utoipa::path(
    post,
    path = "/api/analytics/purge",
    responses(
        (status = 200, description = "Purged", body = PurgeResponse),
        (status = 403, description = "Not an admin")
    ),
    tag = "analytics"
)]
pub async fn purge_page_views(
    auth: AuthContext,
    State(state): State<AppState>,
) -> AppResult<Json<PurgeResponse>> {
    auth.require_role(Role::CONTENT_MANAGERS)?;

    let before = Utc::now() - Duration::days(RETENTION_DAYS);
    let purged = state.repo.purge_page_views_before(before).await?;
    tracing::info!(purged, "old page views purged");
    Ok(Json(PurgeResponse { purged }))
}
