use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use aily_core::types::SessionName;

use crate::app::AppState;
use crate::auth::{api_error, guard, ApiError};

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 500;

/// GET /api/sessions/{name}/messages: newest-first page with total.
/// `offset` for classical pagination, `before` (message id) for cursors.
pub async fn page(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    addr: ConnectInfo<SocketAddr>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    guard(&state, &headers, &addr)?;

    let name = SessionName::parse(&name).map_err(api_error)?;
    let limit = params
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(DEFAULT_PAGE)
        .clamp(1, MAX_PAGE);
    let offset = params.get("offset").and_then(|o| o.parse().ok()).unwrap_or(0);
    let before = params.get("before").and_then(|b| b.parse().ok());

    let page = state
        .store
        .page(&name, limit, offset, before)
        .map_err(|e| api_error(e.into()))?;
    Ok(Json(json!({ "messages": page.messages, "total": page.total })))
}

#[derive(Debug, Deserialize)]
pub struct SendBody {
    pub text: String,
}

/// POST /api/sessions/{name}/send: inject text into the session.
pub async fn send(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    addr: ConnectInfo<SocketAddr>,
    Path(name): Path<String>,
    Json(body): Json<SendBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    guard(&state, &headers, &addr)?;

    let name = SessionName::parse(&name).map_err(api_error)?;
    if body.text.is_empty() {
        return Err(api_error(aily_core::AilyError::InvalidArgument(
            "text must not be empty".into(),
        )));
    }
    state
        .router
        .send_from_dashboard(&name, &body.text)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "ok": true }))))
}

/// POST /api/sessions/{name}/sync: force a transcript rescrape now.
pub async fn sync(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    addr: ConnectInfo<SocketAddr>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    guard(&state, &headers, &addr)?;

    let name = SessionName::parse(&name).map_err(api_error)?;
    let new_messages = state
        .scraper
        .scrape_session(&name)
        .await
        .map_err(api_error)?;
    Ok(Json(json!({ "ok": true, "new_messages": new_messages })))
}

/// GET /api/sessions/{name}/capture?lines=…: tail of the live pane's
/// scrollback. `lines=0` is an empty capture, not an error.
pub async fn capture(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    addr: ConnectInfo<SocketAddr>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    guard(&state, &headers, &addr)?;

    let name = SessionName::parse(&name).map_err(api_error)?;
    let lines: u32 = params
        .get("lines")
        .and_then(|l| l.parse().ok())
        .unwrap_or(100)
        .min(2000);
    let session = state
        .registry
        .get(&name)
        .ok_or_else(|| api_error(aily_core::AilyError::NotFound(name.to_string())))?;
    let host = session.host.ok_or_else(|| {
        api_error(aily_core::AilyError::NotFound(format!("{name} has no host")))
    })?;

    let text = state
        .executor
        .capture(&host, &name, lines)
        .await
        .map_err(|e| api_error(e.into()))?;
    Ok(Json(json!({ "lines": lines, "text": text })))
}

/// GET /api/search?q=…&session=…: full-text search with snippets.
pub async fn search(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    addr: ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    guard(&state, &headers, &addr)?;

    let Some(q) = params.get("q").filter(|q| !q.trim().is_empty()) else {
        return Err(api_error(aily_core::AilyError::InvalidArgument(
            "q is required".into(),
        )));
    };
    let session = match params.get("session") {
        Some(raw) => Some(SessionName::parse(raw).map_err(api_error)?),
        None => None,
    };
    let limit = params
        .get("limit")
        .and_then(|l| l.parse().ok())
        .unwrap_or(DEFAULT_PAGE)
        .clamp(1, MAX_PAGE);

    let hits = state
        .store
        .search(session.as_ref(), q, limit)
        .map_err(|e| api_error(e.into()))?;
    let results: Vec<Value> = hits
        .into_iter()
        .map(|hit| json!({ "message": hit.message, "snippet": hit.snippet }))
        .collect();
    Ok(Json(json!({ "results": results })))
}
