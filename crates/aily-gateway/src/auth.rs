use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::app::AppState;

pub type ApiError = Response;

/// Enforce bearer auth and the per-IP rate limit for an API handler.
/// `DASHBOARD_TOKEN` unset disables auth (loopback deployments).
pub fn guard(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    addr: &ConnectInfo<SocketAddr>,
) -> Result<(), ApiError> {
    rate_limit(state, addr)?;

    let Some(expected) = state.config.dashboard_token.as_deref() else {
        return Ok(());
    };
    match bearer_token(headers) {
        Some(token) if token == expected => Ok(()),
        _ => Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "missing or invalid bearer token" })),
        )
            .into_response()),
    }
}

/// Rate limit only (for the unauthenticated endpoints). 429 responses carry
/// `Retry-After`.
pub fn rate_limit(
    state: &Arc<AppState>,
    addr: &ConnectInfo<SocketAddr>,
) -> Result<(), ApiError> {
    if let Err(retry_after) = state.rate_limiter.check(addr.0.ip()) {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            [("retry-after", retry_after.to_string())],
            Json(json!({ "error": "rate limited", "retry_after_secs": retry_after })),
        )
            .into_response());
    }
    Ok(())
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// The hook-webhook endpoint is authenticated by inbound source restriction:
/// loopback callers only.
pub fn require_loopback(addr: &ConnectInfo<SocketAddr>) -> Result<(), ApiError> {
    if addr.0.ip().is_loopback() {
        Ok(())
    } else {
        Err((
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "hook events accepted from loopback only" })),
        )
            .into_response())
    }
}

/// Shape an internal error for the API: kinds map onto HTTP statuses.
pub fn api_error(e: aily_core::AilyError) -> ApiError {
    use aily_core::AilyError;
    let status = match &e {
        AilyError::NotFound(_) => StatusCode::NOT_FOUND,
        AilyError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        AilyError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        AilyError::Unreachable { .. } => StatusCode::BAD_GATEWAY,
        AilyError::Cancelled { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({ "error": e.to_string(), "code": e.code() })),
    )
        .into_response()
}
