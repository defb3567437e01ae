//! Socket Mode loop: one WebSocket per connection, envelopes acked promptly,
//! liveness tracked by pings.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aily_core::types::{Platform, ThreadRef};
use aily_platform::types::InboundMessage;

use crate::adapter::{STATUS_CONNECTED, STATUS_CONNECTING, STATUS_DISCONNECTED};
use crate::api::SlackApi;

/// Client keepalive: ping every 25 s; dead after three unacknowledged.
const PING_INTERVAL: Duration = Duration::from_secs(25);
const MAX_UNACKED_PINGS: u32 = 3;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    envelope_id: Option<String>,
    payload: Option<EventsPayload>,
}

#[derive(Debug, Deserialize)]
struct EventsPayload {
    event: Option<SlackEvent>,
}

#[derive(Debug, Deserialize)]
struct SlackEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
}

/// Supervised Socket Mode connection. Runs until `shutdown` fires,
/// reconnecting with jittered backoff on every drop.
pub async fn run(
    api: SlackApi,
    app_token: String,
    channel: String,
    inbound_tx: mpsc::Sender<InboundMessage>,
    status: Arc<AtomicU8>,
    shutdown: CancellationToken,
) {
    let mut attempt: u32 = 0;
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        status.store(STATUS_CONNECTING, Ordering::Release);

        match connect_once(&api, &app_token, &channel, &inbound_tx, &status, &shutdown).await {
            Ok(()) => {
                // clean shutdown requested from inside the session
                break;
            }
            Err(reason) => {
                let delay = aily_platform::backoff::delay_for_attempt(attempt);
                attempt = attempt.saturating_add(1);
                warn!(
                    %reason,
                    retry_in_ms = delay.as_millis() as u64,
                    "slack socket dropped, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
    status.store(STATUS_DISCONNECTED, Ordering::Release);
    info!("slack socket stopped");
}

/// One connection lifetime. `Ok(())` means shutdown was requested;
/// `Err(reason)` means the caller should reconnect.
async fn connect_once(
    api: &SlackApi,
    app_token: &str,
    channel: &str,
    inbound_tx: &mpsc::Sender<InboundMessage>,
    status: &Arc<AtomicU8>,
    shutdown: &CancellationToken,
) -> Result<(), String> {
    let url = api
        .connections_open(app_token)
        .await
        .map_err(|e| e.to_string())?;

    let (stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .map_err(|e| format!("ws connect: {e}"))?;
    let (mut tx, mut rx) = stream.split();

    status.store(STATUS_CONNECTED, Ordering::Release);
    info!("slack socket connected");

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping_interval.tick().await; // immediate first tick
    let mut unacked_pings: u32 = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = tx.send(WsMessage::Close(None)).await;
                return Ok(());
            }

            _ = ping_interval.tick() => {
                if unacked_pings >= MAX_UNACKED_PINGS {
                    return Err(format!("{unacked_pings} pings unacknowledged"));
                }
                unacked_pings += 1;
                if tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    return Err("ping send failed".into());
                }
            }

            frame = rx.next() => {
                let frame = match frame {
                    Some(Ok(f)) => f,
                    Some(Err(e)) => return Err(format!("ws recv: {e}")),
                    None => return Err("ws closed".into()),
                };
                match frame {
                    WsMessage::Pong(_) => unacked_pings = 0,
                    WsMessage::Ping(data) => {
                        let _ = tx.send(WsMessage::Pong(data)).await;
                    }
                    WsMessage::Close(_) => return Err("server closed".into()),
                    WsMessage::Text(text) => {
                        if let Some(disconnect) =
                            handle_text(&text, channel, inbound_tx, &mut tx).await
                        {
                            return Err(disconnect);
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    WsMessage,
>;

/// Process one text frame. Returns `Some(reason)` when the server asked for
/// a reconnect.
async fn handle_text(
    text: &str,
    channel: &str,
    inbound_tx: &mpsc::Sender<InboundMessage>,
    tx: &mut WsSink,
) -> Option<String> {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(e) => e,
        Err(e) => {
            debug!(error = %e, "malformed socket frame, ignoring");
            return None;
        }
    };

    // acknowledge before processing so Slack never re-delivers
    if let Some(envelope_id) = &envelope.envelope_id {
        let ack = json!({ "envelope_id": envelope_id }).to_string();
        let _ = tx.send(WsMessage::Text(ack.into())).await;
    }

    match envelope.kind.as_str() {
        "hello" => None,
        "disconnect" => Some("server requested disconnect".into()),
        "events_api" => {
            let event = envelope.payload.and_then(|p| p.event)?;
            forward_event(event, channel, inbound_tx);
            None
        }
        _ => None,
    }
}

fn forward_event(event: SlackEvent, channel: &str, inbound_tx: &mpsc::Sender<InboundMessage>) {
    if event.kind != "message" || event.channel != channel {
        return;
    }
    // ignore our own posts and any other bot traffic
    if event.bot_id.is_some() {
        return;
    }
    // only thread replies reach the router; top-level chatter is not bound
    // to a session
    let Some(thread_ts) = event.thread_ts else {
        return;
    };
    let (Some(user), Some(text), Some(ts)) = (event.user, event.text, event.ts) else {
        return;
    };

    let inbound = InboundMessage {
        platform: Platform::Slack,
        thread: ThreadRef(thread_ts),
        thread_title: None,
        author_id: user,
        text,
        external_id: ts,
    };
    if inbound_tx.try_send(inbound).is_err() {
        warn!("inbound queue full, dropping slack message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_events_api() {
        let raw = r#"{
            "type": "events_api",
            "envelope_id": "env-1",
            "payload": { "event": {
                "type": "message",
                "channel": "C123",
                "user": "U7",
                "text": "restart",
                "ts": "1710.0002",
                "thread_ts": "1710.0001"
            }}
        }"#;
        let envelope: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.kind, "events_api");
        let event = envelope.payload.unwrap().event.unwrap();
        assert_eq!(event.thread_ts.as_deref(), Some("1710.0001"));
        assert_eq!(event.text.as_deref(), Some("restart"));
    }

    #[tokio::test]
    async fn top_level_and_bot_messages_are_ignored() {
        let (tx, mut rx) = mpsc::channel(4);

        // bot message in a thread
        forward_event(
            SlackEvent {
                kind: "message".into(),
                channel: "C1".into(),
                user: Some("U1".into()),
                text: Some("x".into()),
                ts: Some("2.0".into()),
                thread_ts: Some("1.0".into()),
                bot_id: Some("B9".into()),
            },
            "C1",
            &tx,
        );
        // top-level user message
        forward_event(
            SlackEvent {
                kind: "message".into(),
                channel: "C1".into(),
                user: Some("U1".into()),
                text: Some("x".into()),
                ts: Some("2.0".into()),
                thread_ts: None,
                bot_id: None,
            },
            "C1",
            &tx,
        );
        // thread reply in the right channel
        forward_event(
            SlackEvent {
                kind: "message".into(),
                channel: "C1".into(),
                user: Some("U1".into()),
                text: Some("restart".into()),
                ts: Some("2.0".into()),
                thread_ts: Some("1.0".into()),
                bot_id: None,
            },
            "C1",
            &tx,
        );

        let got = rx.try_recv().unwrap();
        assert_eq!(got.text, "restart");
        assert!(rx.try_recv().is_err());
    }
}
