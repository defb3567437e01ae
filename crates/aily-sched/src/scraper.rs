use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aily_bus::{Event, EventBus};
use aily_core::status::SessionStatus;
use aily_core::types::{AgentKind, MessageRole, MessageSource, SessionName};
use aily_host::HostExecutor;
use aily_registry::{Observation, Session, SessionRegistry};
use aily_router::{AgentEvent, Router};

use crate::health::ComponentHealth;

/// Per-glob transcript locations, newest file wins. Discovery runs once per
/// session; afterwards the recorded path is tailed by byte offset.
const TRANSCRIPT_GLOBS: &[(AgentKind, &str)] = &[
    (AgentKind::Claude, "~/.claude/projects/*/*.jsonl"),
    (AgentKind::Codex, "~/.codex/sessions/*.jsonl"),
    (AgentKind::Opencode, "~/.local/share/opencode/storage/session/*/*.json"),
    (AgentKind::Gemini, "~/.gemini/tmp/*/chats/*.json"),
];

/// Tails agent transcripts for assistant messages the hooks may have missed
/// and feeds them to the Router as hook-equivalent events. Dedup rides on
/// the transcript's own record identifier.
pub struct TranscriptScraper {
    executor: Arc<HostExecutor>,
    registry: Arc<SessionRegistry>,
    router: Arc<Router>,
    bus: Arc<EventBus>,
    health: ComponentHealth,
    interval: Duration,
}

impl TranscriptScraper {
    pub fn new(
        executor: Arc<HostExecutor>,
        registry: Arc<SessionRegistry>,
        router: Arc<Router>,
        bus: Arc<EventBus>,
        interval_ms: u64,
    ) -> Self {
        let health = ComponentHealth::new("transcript_scraper", Arc::clone(&bus));
        Self {
            executor,
            registry,
            router,
            bus,
            health,
            interval: Duration::from_millis(interval_ms),
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "transcript scraper started");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => self.scrape_pass().await,
                _ = shutdown.cancelled() => break,
            }
        }
        info!("transcript scraper stopped");
    }

    async fn scrape_pass(&self) {
        let candidates: Vec<Session> = self
            .registry
            .list(&Default::default())
            .into_iter()
            .filter(|s| s.agent.has_transcript())
            .filter(|s| {
                matches!(
                    s.status,
                    SessionStatus::Active | SessionStatus::Waiting | SessionStatus::Idle
                )
            })
            .collect();

        let mut any_failed = false;
        for session in candidates {
            if let Err(e) = self.scrape_session(&session.name).await {
                debug!(session = %session.name, error = %e, "scrape failed");
                any_failed = true;
            }
        }
        if any_failed {
            self.health.failed();
        } else {
            self.health.ok();
        }
    }

    /// Scrape one session now (also the `sync` endpoint entry). Returns how
    /// many new messages were ingested.
    pub async fn scrape_session(&self, name: &SessionName) -> aily_core::Result<usize> {
        let Some(session) = self.registry.get(name) else {
            return Err(aily_core::AilyError::NotFound(name.to_string()));
        };
        let Some(host) = session.host.clone() else {
            return Ok(0);
        };

        let log_path = match &session.log_path {
            Some(path) => path.clone(),
            None => {
                let Some(path) = self.discover_log(&host, session.agent).await? else {
                    return Ok(0);
                };
                let _ = self.registry.upsert(
                    name,
                    Observation {
                        log_path: Some(path.clone()),
                        ..Default::default()
                    },
                );
                path
            }
        };

        // tail from the recorded byte offset; `tail -c +N` is 1-based
        let out = self
            .executor
            .raw(
                &host,
                vec![
                    "sh".into(),
                    "-c".into(),
                    format!(
                        "tail -c +{} {} 2>/dev/null || true",
                        session.scrape_offset + 1,
                        log_path
                    ),
                ],
            )
            .await
            .map_err(aily_core::AilyError::from)?;

        if out.stdout.is_empty() {
            return Ok(0);
        }

        // only consume whole lines; a partial trailing record waits for the
        // next pass
        let consumed = out
            .stdout
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(0);
        if consumed == 0 {
            return Ok(0);
        }
        let whole = &out.stdout[..consumed];

        let found = parse_transcript(whole);
        let count = found.len();
        for (external_id, text) in found {
            self.router
                .handle_agent_event(AgentEvent {
                    session: name.clone(),
                    agent: session.agent,
                    role: MessageRole::Assistant,
                    content: text,
                    external_id: Some(external_id),
                    timestamp: None,
                    source: MessageSource::Jsonl,
                })
                .await;
        }

        let new_offset = session.scrape_offset + consumed as i64;
        if let Err(e) = self.registry.set_scrape_offset(name, new_offset) {
            warn!(session = %name, error = %e, "scrape offset persist failed");
        }
        self.bus.publish(Event::SyncComplete {
            session: name.clone(),
            new_messages: count,
        });
        Ok(count)
    }

    async fn discover_log(
        &self,
        host: &aily_core::types::HostId,
        agent: AgentKind,
    ) -> aily_core::Result<Option<String>> {
        let Some((_, glob)) = TRANSCRIPT_GLOBS.iter().find(|(a, _)| *a == agent) else {
            return Ok(None);
        };
        let out = self
            .executor
            .raw(
                host,
                vec![
                    "sh".into(),
                    "-c".into(),
                    format!("ls -t {glob} 2>/dev/null | head -1"),
                ],
            )
            .await
            .map_err(aily_core::AilyError::from)?;
        let path = out.stdout.trim();
        if path.is_empty() {
            Ok(None)
        } else {
            Ok(Some(path.to_string()))
        }
    }
}

/// Extract `(record id, text)` pairs from transcript JSONL. Lines that do
/// not parse, or are not assistant text records, are skipped.
pub fn parse_transcript(raw: &str) -> Vec<(String, String)> {
    raw.lines()
        .filter_map(|line| {
            let value: Value = serde_json::from_str(line.trim()).ok()?;
            let kind = value.get("type").and_then(Value::as_str)?;
            if kind != "assistant" {
                return None;
            }
            let id = value
                .get("uuid")
                .or_else(|| value.get("id"))
                .and_then(Value::as_str)?
                .to_string();
            let text = extract_text(&value)?;
            if text.trim().is_empty() {
                return None;
            }
            Some((id, text))
        })
        .collect()
}

/// Assistant text lives either in `message.content[]` text blocks or in a
/// flat `text`/`content` string, depending on the agent.
fn extract_text(value: &Value) -> Option<String> {
    if let Some(blocks) = value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
    {
        let joined: Vec<&str> = blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect();
        if joined.is_empty() {
            return None;
        }
        return Some(joined.join("\n"));
    }
    value
        .get("text")
        .or_else(|| value.get("content"))
        .and_then(Value::as_str)
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_claude_style_records() {
        let raw = concat!(
            r#"{"type":"user","uuid":"u1","message":{"content":[{"type":"text","text":"hi"}]}}"#,
            "\n",
            r#"{"type":"assistant","uuid":"a1","message":{"content":[{"type":"text","text":"done"}]}}"#,
            "\n",
            r#"{"type":"assistant","uuid":"a2","message":{"content":[{"type":"tool_use","name":"bash"}]}}"#,
            "\n",
            "not json\n",
        );
        let found = parse_transcript(raw);
        assert_eq!(found, vec![("a1".to_string(), "done".to_string())]);
    }

    #[test]
    fn parses_flat_text_records() {
        let raw = r#"{"type":"assistant","id":"x9","text":"all finished"}"#;
        let found = parse_transcript(raw);
        assert_eq!(found, vec![("x9".to_string(), "all finished".to_string())]);
    }

    #[test]
    fn multiple_text_blocks_join() {
        let raw = r#"{"type":"assistant","uuid":"a3","message":{"content":[{"type":"text","text":"part one"},{"type":"text","text":"part two"}]}}"#;
        let found = parse_transcript(raw);
        assert_eq!(found[0].1, "part one\npart two");
    }
}
