use axum::Json;
use serde_json::{json, Value};

/// Liveness probe. No auth, no rate limit.
pub async fn healthz() -> Json<Value> {
    Json(json!({ "ok": true }))
}
