use crate::{error::AppError, services::redirect::Visit, AppState};
use axum::{
    extract::{Path, State},
    http::{header::LOCATION, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// GET /r/:code
///
/// 1. Resolve the short code (cache first, then the store).
/// 2. Record the click and bump the counter, bounded by the record timeout.
///    Failures there are logged and do not affect the response.
/// 3. 307 to the original URL. Unknown codes, lookup failures and stored URLs
///    that cannot be sent as a `Location` header send the visitor home instead.
pub async fn redirect(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Response {
    let visit = Visit {
        request_id: header_value(&headers, "x-request-id"),
        referrer: header_value(&headers, "referer"),
        user_agent: header_value(&headers, "user-agent"),
    };

    match state.redirects.resolve_and_record(&code, visit).await {
        Ok(original_url) => match location(StatusCode::TEMPORARY_REDIRECT, &original_url) {
            Some(resp) => resp,
            None => {
                tracing::error!(short_code = %code, "stored URL is not a valid Location header");
                home(&state)
            }
        },
        Err(AppError::LinkNotFound(_)) => {
            tracing::info!(short_code = %code, "unknown short code, sending visitor home");
            home(&state)
        }
        Err(e) => {
            tracing::error!("redirect for '{}' failed: {}", code, e);
            home(&state)
        }
    }
}

/// Redirect response for `target`, or `None` if it is not a legal header value.
fn location(status: StatusCode, target: &str) -> Option<Response> {
    let value = HeaderValue::try_from(target).ok()?;
    Some((status, [(LOCATION, value)]).into_response())
}

fn home(state: &AppState) -> Response {
    location(StatusCode::SEE_OTHER, state.config.home()).unwrap_or_else(|| {
        (StatusCode::SEE_OTHER, [(LOCATION, HeaderValue::from_static("/"))]).into_response()
    })
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}
