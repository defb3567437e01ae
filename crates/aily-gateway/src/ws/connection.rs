use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use aily_core::config::{HEARTBEAT_INTERVAL_SECS, MAX_STREAM_CLIENTS};
use aily_core::types::SessionName;

use crate::app::AppState;
use crate::auth::bearer_token;

/// Client → server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
    Subscribe {
        #[serde(default)]
        sessions: Vec<String>,
    },
    Ping,
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// GET /ws: streaming events. Auth via bearer header or `?token=`;
/// capacity-limited with 503 for the overflow.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    if let Some(expected) = state.config.dashboard_token.as_deref() {
        let presented = bearer_token(&headers).or(query.token.as_deref());
        if presented != Some(expected) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let live = state.stream_clients.load(Ordering::Acquire);
    if live >= MAX_STREAM_CLIENTS {
        warn!(live, "streaming client limit reached");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    debug!(%addr, "streaming client connecting");
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    state.stream_clients.fetch_add(1, Ordering::AcqRel);
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "streaming client connected");

    let (mut tx, mut rx) = socket.split();
    // no filter until the client subscribes; empty set also means all
    let mut subscription = state.bus.subscribe(None);

    let mut heartbeat = tokio::time::interval(std::time::Duration::from_secs(
        HEARTBEAT_INTERVAL_SECS,
    ));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            // bus event matching the filter → push to the client
            event = subscription.recv() => {
                let Some(event) = event else { break };
                let seq = state.event_seq.fetch_add(1, Ordering::Relaxed);
                let frame = json!({
                    "type": "event",
                    "event": event.name(),
                    "payload": event,
                    "seq": seq,
                });
                let text = serde_json::to_string(&frame).unwrap_or_default();
                if tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            // client frames: subscribe / ping
            msg = rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Subscribe { sessions }) => {
                                let filter = parse_filter(&sessions);
                                debug!(conn_id = %conn_id, sessions = sessions.len(), "subscription updated");
                                subscription.set_filter(filter);
                            }
                            Ok(ClientFrame::Ping) => {
                                let pong = json!({ "type": "pong" }).to_string();
                                if tx.send(Message::Text(pong.into())).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => debug!(conn_id = %conn_id, error = %e, "malformed client frame"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }

            // periodic heartbeat
            _ = heartbeat.tick() => {
                let beat = json!({
                    "type": "heartbeat",
                    "ts": chrono::Utc::now().timestamp_millis(),
                }).to_string();
                if tx.send(Message::Text(beat.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.stream_clients.fetch_sub(1, Ordering::AcqRel);
    info!(conn_id = %conn_id, "streaming client disconnected");
}

/// An empty session list means "all sessions".
fn parse_filter(sessions: &[String]) -> Option<HashSet<SessionName>> {
    let set: HashSet<SessionName> = sessions
        .iter()
        .filter_map(|s| SessionName::parse(s).ok())
        .collect();
    if set.is_empty() {
        None
    } else {
        Some(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_parse() {
        let sub: ClientFrame =
            serde_json::from_str(r#"{"type":"subscribe","sessions":["s1","s2"]}"#).unwrap();
        assert!(matches!(sub, ClientFrame::Subscribe { sessions } if sessions.len() == 2));

        let ping: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(ping, ClientFrame::Ping));
    }

    #[test]
    fn empty_subscribe_means_all() {
        assert!(parse_filter(&[]).is_none());
        assert!(parse_filter(&["bad name".to_string()]).is_none());
        assert!(parse_filter(&["ok".to_string()]).is_some());
    }
}
