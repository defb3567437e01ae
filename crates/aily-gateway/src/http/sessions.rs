use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use aily_core::status::SessionStatus;
use aily_core::types::{AgentKind, HostId, SessionName};
use aily_registry::{ListFilter, SortOrder};

use crate::app::AppState;
use crate::auth::{api_error, guard, ApiError};

/// GET /api/sessions: list with `limit`, `sort`, `status`, `host` filters.
pub async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    addr: ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    guard(&state, &headers, &addr)?;

    let filter = ListFilter {
        status: params
            .get("status")
            .and_then(|s| s.parse::<SessionStatus>().ok()),
        host: params.get("host").map(|h| HostId::from(h.as_str())),
        sort: params
            .get("sort")
            .map(|s| SortOrder::parse(s))
            .unwrap_or_default(),
        limit: params.get("limit").and_then(|l| l.parse().ok()),
    };
    let sessions = state.registry.list(&filter);
    let count = sessions.len();
    Ok(Json(json!({ "sessions": sessions, "count": count })))
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    pub name: String,
    pub host: Option<String>,
    pub agent_type: Option<String>,
}

/// POST /api/sessions: create a multiplexer session and its threads.
pub async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    addr: ConnectInfo<SocketAddr>,
    Json(body): Json<CreateBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    guard(&state, &headers, &addr)?;

    let name = SessionName::parse(&body.name).map_err(api_error)?;
    let host = body.host.map(|h| HostId::from(h.as_str()));
    let agent = body
        .agent_type
        .as_deref()
        .map(|a| a.parse::<AgentKind>().unwrap_or_default());

    state
        .router
        .create_session(&name, host, agent)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(json!({ "name": name }))))
}

/// GET /api/sessions/{name}: detail with sync state and thread bindings.
pub async fn detail(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    addr: ConnectInfo<SocketAddr>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    guard(&state, &headers, &addr)?;

    let name = SessionName::parse(&name).map_err(api_error)?;
    let session = state
        .registry
        .get(&name)
        .ok_or_else(|| api_error(aily_core::AilyError::NotFound(name.to_string())))?;

    let bindings: Vec<Value> = state
        .bindings
        .for_session(&name)
        .unwrap_or_default()
        .into_iter()
        .map(|(platform, thread)| json!({ "platform": platform, "thread_ref": thread }))
        .collect();
    let reachable = session
        .host
        .as_ref()
        .and_then(|h| state.executor.is_reachable(h));

    Ok(Json(json!({
        "session": session,
        "bindings": bindings,
        "host_reachable": reachable,
    })))
}

/// DELETE /api/sessions/{name}: kill the session, close its threads.
pub async fn kill(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    addr: ConnectInfo<SocketAddr>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    guard(&state, &headers, &addr)?;

    let name = SessionName::parse(&name).map_err(api_error)?;
    if state.registry.get(&name).is_none() {
        return Err(api_error(aily_core::AilyError::NotFound(name.to_string())));
    }
    state.router.close_session(&name, true).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteBody {
    pub names: Vec<String>,
}

/// POST /api/sessions/bulk-delete: kill several sessions, reporting each.
pub async fn bulk_delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    addr: ConnectInfo<SocketAddr>,
    Json(body): Json<BulkDeleteBody>,
) -> Result<Json<Value>, ApiError> {
    guard(&state, &headers, &addr)?;

    let mut results = Vec::with_capacity(body.names.len());
    for raw in body.names {
        match SessionName::parse(&raw) {
            Ok(name) if state.registry.get(&name).is_some() => {
                state.router.close_session(&name, true).await;
                results.push(json!({ "name": raw, "ok": true }));
            }
            Ok(_) => results.push(json!({ "name": raw, "ok": false, "error": "not found" })),
            Err(e) => results.push(json!({ "name": raw, "ok": false, "error": e.to_string() })),
        }
    }
    Ok(Json(json!({ "results": results })))
}
