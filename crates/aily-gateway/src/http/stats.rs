use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use aily_platform::types::AdapterStatus;

use crate::app::AppState;
use crate::auth::{guard, ApiError};

/// GET /api/stats: aggregates for the home dashboard.
pub async fn stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    addr: ConnectInfo<SocketAddr>,
) -> Result<Json<Value>, ApiError> {
    guard(&state, &headers, &addr)?;

    let by_status: Value = state
        .registry
        .status_counts()
        .into_iter()
        .map(|(status, count)| (status.to_string(), json!(count)))
        .collect::<serde_json::Map<_, _>>()
        .into();

    let hosts: Vec<Value> = state
        .executor
        .hosts()
        .into_iter()
        .map(|h| {
            let reachable = state.executor.is_reachable(&h);
            json!({ "host": h, "reachable": reachable })
        })
        .collect();

    let platforms: Vec<Value> = state
        .adapters
        .statuses()
        .into_iter()
        .map(|(platform, status)| {
            json!({
                "platform": platform,
                "connected": status == AdapterStatus::Connected,
            })
        })
        .collect();

    let total_messages = state.store.count_all().unwrap_or(0);
    let uptime_secs = (chrono::Utc::now() - state.started_at).num_seconds();

    Ok(Json(json!({
        "sessions_by_status": by_status,
        "total_messages": total_messages,
        "hosts": hosts,
        "platforms": platforms,
        "stream_clients": state.stream_clients.load(Ordering::Acquire),
        "bus_subscribers": state.bus.subscriber_count(),
        "uptime_secs": uptime_secs,
    })))
}
