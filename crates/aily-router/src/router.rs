use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use aily_bus::{Event, EventBus};
use aily_core::config::ThreadCleanup;
use aily_core::status::{SessionStatus, StatusEvent};
use aily_core::types::{
    parse_thread_title, AgentKind, HostId, MessageRole, MessageSource, Platform, SessionName,
    ThreadRef,
};
use aily_host::{CreateOutcome, HostExecutor, KillOutcome};
use aily_platform::format::task_complete;
use aily_platform::manager::AdapterManager;
use aily_platform::outbox::Outbox;
use aily_platform::queue::OutboundItem;
use aily_platform::types::InboundMessage;
use aily_registry::{Observation, SessionRegistry};
use aily_store::bindings::ThreadBindings;
use aily_store::{AppendOutcome, MessageStore, NewMessage};

use crate::commands::{self, Command};
use crate::notify;

/// An agent-side event: a hook webhook post or a transcript-scraper find,
/// normalised at the boundary.
#[derive(Debug, Clone)]
pub struct AgentEvent {
    pub session: SessionName,
    pub agent: AgentKind,
    pub role: MessageRole,
    pub content: String,
    pub external_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub source: MessageSource,
}

#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub hosts: Vec<HostId>,
    pub notify_max_retries: u32,
    pub thread_cleanup: ThreadCleanup,
    /// `TMUX_THREAD_SYNC`: when false, session lifecycle no longer drives
    /// thread create/close on the platforms. Message relay is unaffected.
    pub thread_sync: bool,
}

/// Decision centre between the registry, store, executor, and adapters.
/// Built once with handles to everything it drives; never talks to a
/// platform wire directly.
pub struct Router {
    registry: Arc<SessionRegistry>,
    store: Arc<MessageStore>,
    bindings: Arc<ThreadBindings>,
    bus: Arc<EventBus>,
    executor: Arc<HostExecutor>,
    adapters: Arc<AdapterManager>,
    /// Per-platform spools for non-critical chatter; bounded, shedding.
    outboxes: std::collections::HashMap<Platform, Arc<Outbox>>,
    settings: RouterSettings,
}

impl Router {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<MessageStore>,
        bindings: Arc<ThreadBindings>,
        bus: Arc<EventBus>,
        executor: Arc<HostExecutor>,
        adapters: Arc<AdapterManager>,
        settings: RouterSettings,
    ) -> Self {
        let outboxes = adapters
            .platforms()
            .into_iter()
            .map(|p| (p, Outbox::new(p)))
            .collect();
        Self {
            registry,
            store,
            bindings,
            bus,
            executor,
            adapters,
            outboxes,
            settings,
        }
    }

    /// Spawn the per-platform outbox drain workers.
    pub fn start_outboxes(&self, shutdown: tokio_util::sync::CancellationToken) {
        for outbox in self.outboxes.values() {
            tokio::spawn(
                Arc::clone(outbox).run(Arc::clone(&self.adapters), shutdown.clone()),
            );
        }
    }

    /// Pump platform-inbound messages. One consumer: per-session ordering is
    /// the arrival order on this channel.
    pub async fn run_inbound(self: Arc<Self>, mut rx: mpsc::Receiver<InboundMessage>) {
        info!("router inbound pump started");
        while let Some(msg) = rx.recv().await {
            self.handle_platform_inbound(msg).await;
        }
        info!("router inbound pump stopped");
    }

    /// One user-authored message out of a platform thread.
    #[instrument(skip(self, msg), fields(platform = %msg.platform, thread = %msg.thread))]
    pub async fn handle_platform_inbound(&self, msg: InboundMessage) {
        let Some(session) = self.resolve_session(&msg) else {
            debug!("message in unbound thread, ignoring");
            return;
        };

        if let Some(command) = commands::parse(&msg.text) {
            self.run_command(&session, msg.platform, &msg.thread, command)
                .await;
            return;
        }

        self.inject_text(&session, msg.platform, &msg.thread, &msg.text, Some(msg.external_id))
            .await;
    }

    /// One agent-side event (hook webhook or transcript scrape).
    #[instrument(skip(self, ev), fields(session = %ev.session, source = %ev.source))]
    pub async fn handle_agent_event(&self, ev: AgentEvent) {
        // system events may carry a lifecycle alias instead of content
        if ev.role == MessageRole::System {
            if let Some(status_event) = aily_core::status::event_from_alias(ev.content.trim()) {
                if status_event == StatusEvent::LifecycleClose {
                    self.close_session(&ev.session, false).await;
                    return;
                }
                self.registry.transition(&ev.session, status_event);
            }
        }

        self.registry
            .upsert(
                &ev.session,
                Observation {
                    agent: Some(ev.agent),
                    preview: Some(aily_registry::types::preview_of(&ev.content)),
                    ..Default::default()
                },
            )
            .ok();

        let timestamp = ev.timestamp.unwrap_or_else(Utc::now);
        let outcome = self
            .store
            .append(NewMessage {
                session: ev.session.clone(),
                role: ev.role,
                source: ev.source,
                content: ev.content.clone(),
                timestamp,
                external_id: ev.external_id.clone(),
            })
            .await;

        match outcome {
            Ok(AppendOutcome::Appended(id)) => {
                self.bus.publish(Event::MessageNew {
                    session: ev.session.clone(),
                    message_id: id,
                });
            }
            Ok(AppendOutcome::Duplicate) => {
                debug!("duplicate agent event absorbed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "agent event append failed");
                return;
            }
        }

        let status_event = if ev.role == MessageRole::Assistant && asks_question(&ev.content) {
            StatusEvent::AskQuestion
        } else {
            StatusEvent::MsgInbound
        };
        self.registry.transition(&ev.session, status_event);

        if ev.role == MessageRole::Assistant {
            self.notify_all(&ev.session, &ev.content, false).await;
        }
    }

    /// Inject text typed on the dashboard (REST `send`).
    pub async fn send_from_dashboard(
        &self,
        session: &SessionName,
        text: &str,
    ) -> aily_core::Result<()> {
        let record = self
            .registry
            .get(session)
            .ok_or_else(|| aily_core::AilyError::NotFound(session.to_string()))?;
        let host = record
            .host
            .ok_or_else(|| aily_core::AilyError::NotFound(format!("{session} has no host")))?;

        self.bus.publish(Event::TypingStart {
            session: session.clone(),
        });
        let result = self.executor.inject(&host, session, text, true).await;
        self.bus.publish(Event::TypingStop {
            session: session.clone(),
        });
        result.map_err(aily_core::AilyError::from)?;

        self.append_user_message(session, MessageSource::Tmux, text, None)
            .await;
        self.registry.transition(session, StatusEvent::MsgInbound);
        Ok(())
    }

    /// Kill the multiplexer session (if asked) and close every bound thread
    /// per the cleanup policy. Idempotent: closing an archived session does
    /// nothing.
    pub async fn close_session(&self, session: &SessionName, kill_multiplexer: bool) {
        let record = self.registry.get(session);
        if record
            .as_ref()
            .is_some_and(|r| r.status == SessionStatus::Archived)
        {
            debug!(%session, "already archived, no platform writes");
            return;
        }

        if kill_multiplexer {
            if let Some(host) = record.as_ref().and_then(|r| r.host.clone()) {
                match self.executor.kill_session(&host, session).await {
                    Ok(KillOutcome::Ok) => info!(%session, %host, "multiplexer session killed"),
                    Ok(KillOutcome::NotFound) => debug!(%session, "session already gone"),
                    Err(e) => warn!(%session, error = %e, "kill failed"),
                }
            }
        }

        if self.settings.thread_sync {
            let threads = self.bindings.for_session(session).unwrap_or_default();
            for (platform, thread) in threads {
                let Some(adapter) = self.adapters.get(platform) else {
                    continue;
                };
                // final notice precedes archival
                if let Err(e) = adapter.post(&thread, "Session closed", true).await {
                    warn!(%platform, %session, error = %e, "closing notice failed");
                }
                let result = match self.settings.thread_cleanup {
                    ThreadCleanup::Archive => adapter.archive_thread(&thread).await,
                    ThreadCleanup::Delete => {
                        let deleted = adapter.delete_thread(&thread).await;
                        if deleted.is_ok() {
                            let _ = self.bindings.clear(platform, session);
                        }
                        deleted
                    }
                };
                if let Err(e) = result {
                    warn!(%platform, %session, error = %e, "thread cleanup failed");
                }
            }
        } else {
            debug!(%session, "thread sync disabled, leaving platform threads alone");
        }

        self.registry.transition(session, StatusEvent::LifecycleClose);
    }

    /// Create a session on a host and ensure its threads everywhere.
    /// Re-issuing for a live session reuses the binding (no new thread).
    pub async fn create_session(
        &self,
        session: &SessionName,
        host: Option<HostId>,
        agent: Option<AgentKind>,
    ) -> aily_core::Result<()> {
        let host = host
            .or_else(|| self.settings.hosts.first().cloned())
            .ok_or_else(|| aily_core::AilyError::InvalidArgument("no hosts configured".into()))?;

        match self.executor.create_session(&host, session).await {
            Ok(CreateOutcome::Ok) => info!(%session, %host, "session created"),
            Ok(CreateOutcome::NameTaken) => debug!(%session, %host, "session already live"),
            Err(e) => return Err(e.into()),
        }

        let mut observation = Observation::live_on(host);
        observation.agent = agent;
        self.registry.upsert(session, observation)?;

        if self.settings.thread_sync {
            self.notify_all(session, &format!("Session `{session}` is ready."), true)
                .await;
        }
        Ok(())
    }

    // --- internals ---------------------------------------------------------

    fn resolve_session(&self, msg: &InboundMessage) -> Option<SessionName> {
        if let Ok(Some(session)) = self.bindings.resolve(msg.platform, &msg.thread) {
            return Some(session);
        }
        // probe by thread title and bind on a canonical match
        let title = msg.thread_title.as_deref()?;
        let session = parse_thread_title(title)?;
        info!(%session, thread = %msg.thread, "bound thread by title probe");
        let _ = self.bindings.bind(msg.platform, &session, &msg.thread);
        let _ = self
            .registry
            .upsert(&session, Observation::from_platform());
        Some(session)
    }

    async fn run_command(
        &self,
        session: &SessionName,
        platform: Platform,
        thread: &ThreadRef,
        command: Command,
    ) {
        match command {
            Command::New { name, host } => {
                let reply = match self.create_session(&name, host, None).await {
                    Ok(()) => format!("Session `{name}` is ready."),
                    Err(e) => format!("Could not create `{name}`: {e}"),
                };
                self.reply(platform, thread, &reply).await;
            }
            Command::Kill { name } => {
                self.close_session(&name, true).await;
                if &name != session {
                    self.reply(platform, thread, &format!("Session `{name}` closed."))
                        .await;
                }
            }
            Command::Sessions => {
                let listing = self.render_sessions();
                self.reply(platform, thread, &listing).await;
            }
            Command::Key(key) => {
                let Some(host) = self.registry.get(session).and_then(|r| r.host) else {
                    self.reply(
                        platform,
                        thread,
                        &format!("Could not deliver keystroke to {session}: no host bound"),
                    )
                    .await;
                    return;
                };
                if let Err(e) = self.executor.control_key(&host, session, key).await {
                    self.post_delivery_failure(session, &host, platform, thread, &e)
                        .await;
                } else {
                    self.registry.transition(session, StatusEvent::MsgInbound);
                }
            }
            Command::Invalid(reason) => {
                self.reply(platform, thread, &reason).await;
            }
        }
    }

    async fn inject_text(
        &self,
        session: &SessionName,
        platform: Platform,
        thread: &ThreadRef,
        text: &str,
        external_id: Option<String>,
    ) {
        let Some(host) = self.registry.get(session).and_then(|r| r.host) else {
            self.reply(
                platform,
                thread,
                &format!("Could not deliver message to {session}: no host bound"),
            )
            .await;
            return;
        };

        self.bus.publish(Event::TypingStart {
            session: session.clone(),
        });
        let result = self.executor.inject(&host, session, text, true).await;
        self.bus.publish(Event::TypingStop {
            session: session.clone(),
        });

        match result {
            Ok(()) => {
                self.append_user_message(session, platform.into(), text, external_id)
                    .await;
                self.registry.transition(session, StatusEvent::MsgInbound);
            }
            Err(e) => {
                // inject failed: no append, no message.new
                self.post_delivery_failure(session, &host, platform, thread, &e)
                    .await;
            }
        }
    }

    async fn append_user_message(
        &self,
        session: &SessionName,
        source: MessageSource,
        text: &str,
        external_id: Option<String>,
    ) {
        let outcome = self
            .store
            .append(NewMessage {
                session: session.clone(),
                role: MessageRole::User,
                source,
                content: text.to_string(),
                timestamp: Utc::now(),
                external_id,
            })
            .await;
        match outcome {
            Ok(AppendOutcome::Appended(id)) => self.bus.publish(Event::MessageNew {
                session: session.clone(),
                message_id: id,
            }),
            Ok(AppendOutcome::Duplicate) => debug!("user message echo absorbed"),
            Err(e) => warn!(error = %e, "user message append failed"),
        }
        let _ = self.registry.upsert(
            session,
            Observation {
                preview: Some(aily_registry::types::preview_of(text)),
                ..Default::default()
            },
        );
    }

    async fn post_delivery_failure(
        &self,
        session: &SessionName,
        host: &HostId,
        platform: Platform,
        thread: &ThreadRef,
        error: &aily_host::HostError,
    ) {
        let notice = format!("Could not deliver message to {session} on {host}: {error}");
        self.reply(platform, thread, &notice).await;

        match error {
            aily_host::HostError::Unreachable { .. } => {
                self.registry.transition(session, StatusEvent::HostDown);
            }
            aily_host::HostError::SessionNotFound { .. } => {
                self.registry.transition(session, StatusEvent::SshMissing);
            }
            _ => self.registry.set_error(session),
        }
    }

    /// Queue a non-critical in-thread reply (listings, notices,
    /// confirmations) onto the platform's bounded outbox. Falls back to a
    /// direct post when no outbox worker is running.
    async fn reply(&self, platform: Platform, thread: &ThreadRef, text: &str) {
        if let Some(outbox) = self.outboxes.get(&platform) {
            outbox.enqueue(OutboundItem {
                thread: thread.clone(),
                text: text.to_string(),
                raw: true,
                critical: false,
            });
            return;
        }
        let Some(adapter) = self.adapters.get(platform) else {
            return;
        };
        if let Err(e) = adapter.post(thread, text, true).await {
            warn!(%platform, error = %e, "in-thread reply failed");
        }
    }

    /// Fan a notification out to every enabled platform in parallel.
    async fn notify_all(&self, session: &SessionName, body: &str, raw: bool) {
        let starter = format!("Relay thread for `{session}`");
        let text = if raw {
            body.to_string()
        } else {
            task_complete(session.as_str(), body)
        };

        let posts = self.adapters.platforms().into_iter().filter_map(|p| {
            self.adapters.get(p).map(|adapter| {
                notify::post_to_platform(
                    adapter,
                    &self.bindings,
                    &self.bus,
                    session,
                    &starter,
                    &text,
                    raw,
                    self.settings.notify_max_retries,
                )
            })
        });
        join_all(posts).await;
    }

    fn render_sessions(&self) -> String {
        let sessions = self.registry.list(&Default::default());
        if sessions.is_empty() {
            return "No known sessions.".to_string();
        }
        let mut out = String::from("Known sessions:\n");
        for s in sessions {
            let host = s
                .host
                .as_ref()
                .map(|h| h.to_string())
                .unwrap_or_else(|| "unknown".into());
            out.push_str(&format!("• `{}` [{}] on {}\n", s.name, s.status, host));
        }
        out
    }
}

/// An assistant message whose last non-empty line ends in `?` is treated as
/// the agent asking the user a question.
fn asks_question(content: &str) -> bool {
    content
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .is_some_and(|l| l.trim_end().ends_with('?'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_detection_looks_at_last_line() {
        assert!(asks_question("Should I continue?"));
        assert!(asks_question("done\n\nProceed with deploy?\n"));
        assert!(!asks_question("Deployed? yes.\nAll good."));
        assert!(!asks_question(""));
    }
}
