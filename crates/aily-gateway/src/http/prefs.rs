use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::auth::{api_error, guard, ApiError};

/// GET /api/preferences: all persisted UI preferences as one object.
pub async fn get_prefs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    addr: ConnectInfo<SocketAddr>,
) -> Result<Json<Value>, ApiError> {
    guard(&state, &headers, &addr)?;
    let map = state
        .prefs
        .get_all()
        .map_err(|e| api_error(e.into()))?;
    Ok(Json(Value::Object(map)))
}

/// PUT /api/preferences: merge the posted object into stored preferences.
pub async fn put_prefs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    addr: ConnectInfo<SocketAddr>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    guard(&state, &headers, &addr)?;

    let Value::Object(map) = body else {
        return Err(api_error(aily_core::AilyError::InvalidArgument(
            "preferences body must be a JSON object".into(),
        )));
    };
    for (key, value) in &map {
        state
            .prefs
            .put(key, value)
            .map_err(|e| api_error(e.into()))?;
    }
    Ok(Json(json!({ "ok": true, "updated": map.len() })))
}
