use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use aily_core::types::{AgentKind, MessageRole, MessageSource, SessionName};
use aily_router::AgentEvent;

use crate::app::AppState;
use crate::auth::{api_error, rate_limit, require_loopback, ApiError};

/// Hook webhook body, as the per-agent hook scripts post it.
#[derive(Debug, Deserialize)]
pub struct HookEventBody {
    pub session_name: String,
    pub agent: String,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// POST /api/hooks/event: webhook entry for local hook scripts. No bearer
/// token; authenticated by loopback-only source restriction. 202 on accept.
pub async fn hook_event(
    State(state): State<Arc<AppState>>,
    addr: ConnectInfo<SocketAddr>,
    Json(body): Json<HookEventBody>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_loopback(&addr)?;
    rate_limit(&state, &addr)?;

    let session = SessionName::parse(&body.session_name).map_err(api_error)?;
    let role = match body.role.as_str() {
        "assistant" => MessageRole::Assistant,
        "system" => MessageRole::System,
        other => {
            return Err(api_error(aily_core::AilyError::InvalidArgument(format!(
                "role must be assistant or system, got {other}"
            ))))
        }
    };
    let agent = body.agent.parse::<AgentKind>().unwrap_or_default();
    let timestamp = body
        .timestamp
        .as_deref()
        .and_then(|t| t.parse::<chrono::DateTime<chrono::Utc>>().ok());

    debug!(%session, %agent, "hook event accepted");

    // accept fast; routing (dedup, fan-out, retries) continues in background
    let router = Arc::clone(&state.router);
    let event = AgentEvent {
        session,
        agent,
        role,
        content: body.content,
        external_id: body.external_id,
        timestamp,
        source: MessageSource::Hook,
    };
    tokio::spawn(async move {
        router.handle_agent_event(event).await;
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": true }))))
}
