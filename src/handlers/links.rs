use crate::{
    auth::{AuthUser, MaybeUser},
    error::AppError,
    models::{AnalyticsSummary, Link, OwnerSummary},
    services::analytics::summarize_for_owner,
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

// ── Request / response types ───────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateLinkRequest {
    url: String,
    custom_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreatedLink {
    pub id: i64,
    pub short_code: String,
    pub short_url: String,
}

#[derive(Serialize)]
pub struct OwnerLinks {
    pub links: Vec<Link>,
    pub summary: OwnerSummary,
}

#[derive(Deserialize)]
pub struct StatsQuery {
    /// Viewer offset in minutes east of UTC.
    tz_offset: Option<i32>,
}

// ── Handlers ───────────────────────────────────────────────────────────────

/// GET /
/// Send visitors to the configured home page, or describe the service when
/// there is none.
pub async fn index(State(state): State<Arc<AppState>>) -> Response {
    match &state.config.home_url {
        Some(home) => Redirect::to(home).into_response(),
        None => Json(json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        }))
        .into_response(),
    }
}

/// POST /api/links
pub async fn create_link(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Json(req): Json<CreateLinkRequest>,
) -> Result<(StatusCode, Json<CreatedLink>), AppError> {
    let url = req.url.trim();
    let custom_code = req.custom_code.as_deref().and_then(sanitize_code);
    let owner_id = user.as_ref().map(|u| u.id.as_str());

    let link = state
        .allocator
        .allocate(url, owner_id, custom_code.as_deref())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreatedLink {
            id: link.id,
            short_url: state.config.short_url(&link.short_code),
            short_code: link.short_code,
        }),
    ))
}

/// GET /api/links
/// The signed-in user's links, newest first, with dashboard totals.
pub async fn list_links(
    AuthUser(user): AuthUser,
    State(state): State<Arc<AppState>>,
) -> Result<Json<OwnerLinks>, AppError> {
    let links = state.links.links_for_owner(&user.id).await?;
    let summary = summarize_for_owner(&links);
    Ok(Json(OwnerLinks { links, summary }))
}

/// GET /api/links/:code
pub async fn get_link(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<Link>, AppError> {
    state
        .links
        .find_by_code(&code)
        .await?
        .map(Json)
        .ok_or(AppError::LinkNotFound(code))
}

/// GET /api/links/:code/stats
/// Unknown links are a 404; analytics failures come back as an empty summary.
pub async fn link_stats(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<AnalyticsSummary>, AppError> {
    if state.links.find_by_code(&code).await?.is_none() {
        return Err(AppError::LinkNotFound(code));
    }

    let minutes = query
        .tz_offset
        .unwrap_or(state.config.analytics_utc_offset_minutes);
    let offset = minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| AppError::InvalidInput(format!("tz_offset out of range: {minutes}")))?;

    Ok(Json(state.analytics.summarize(&code, offset).await))
}

// ── Private helpers ────────────────────────────────────────────────────────

/// Drop every character outside `[A-Za-z0-9_-]`. Nothing left means no
/// custom code was given.
fn sanitize_code(raw: &str) -> Option<String> {
    let code: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    (!code.is_empty()).then_some(code)
}
