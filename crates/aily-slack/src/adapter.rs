use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use aily_core::types::{thread_title, Platform, SessionName, ThreadRef};
use aily_platform::adapter::PlatformAdapter;
use aily_platform::error::{PlatformError, Result};
use aily_platform::format::split_chunks;
use aily_platform::locks::NameLocks;
use aily_platform::types::{AdapterStatus, InboundMessage};

use crate::api::SlackApi;
use crate::socket;

pub(crate) const STATUS_DISCONNECTED: u8 = 0;
pub(crate) const STATUS_CONNECTING: u8 = 1;
pub(crate) const STATUS_CONNECTED: u8 = 2;

/// Slack's limit is ~4000 characters; stay under it.
const CHUNK_MAX: usize = 3900;
/// Channel-history window probed when looking for an existing parent.
const HISTORY_PROBE_LIMIT: u32 = 100;
/// Reaction marking a closed thread (Slack has no native archive).
const CLOSED_MARKER: &str = "file_cabinet";

const WELCOME: &str = "Relay attached. Reply in this thread to type into the session. \
Commands: `!sessions` list, `!kill <name>` stop, `!c` interrupt, `!enter` submit, `!esc` escape.";

#[derive(Debug, Clone)]
pub struct SlackSettings {
    pub bot_token: String,
    pub app_token: String,
    pub channel_id: String,
}

/// Slack adapter. "Threads" are reply chains under a parent message whose
/// first line is the canonical `[agent] <session>` title; the thread ref is
/// the parent's ts.
pub struct SlackAdapter {
    settings: SlackSettings,
    api: SlackApi,
    inbound_tx: mpsc::Sender<InboundMessage>,
    locks: NameLocks,
    status: Arc<AtomicU8>,
    shutdown: CancellationToken,
}

impl SlackAdapter {
    pub fn new(settings: SlackSettings, inbound_tx: mpsc::Sender<InboundMessage>) -> Self {
        let api = SlackApi::new(&settings.bot_token);
        Self {
            settings,
            api,
            inbound_tx,
            locks: NameLocks::new(),
            status: Arc::new(AtomicU8::new(STATUS_DISCONNECTED)),
            shutdown: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl PlatformAdapter for SlackAdapter {
    fn platform(&self) -> Platform {
        Platform::Slack
    }

    async fn connect(&mut self) -> Result<()> {
        // fail fast on a bad token; socket supervision handles the rest
        self.api.auth_test().await?;

        tokio::spawn(socket::run(
            self.api.clone(),
            self.settings.app_token.clone(),
            self.settings.channel_id.clone(),
            self.inbound_tx.clone(),
            Arc::clone(&self.status),
            self.shutdown.clone(),
        ));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.shutdown.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.status.store(STATUS_DISCONNECTED, Ordering::Release);
        Ok(())
    }

    async fn ensure_thread(&self, session: &SessionName, starter_text: &str) -> Result<ThreadRef> {
        let _guard = self.locks.acquire(session.as_str()).await;
        let title = thread_title(session);

        // find: recent parent messages titled for this session
        let history = self
            .api
            .history(&self.settings.channel_id, HISTORY_PROBE_LIMIT)
            .await?;
        if let Some(parent) = history
            .iter()
            .find(|m| m.text.lines().next() == Some(title.as_str()))
        {
            debug!(%session, ts = %parent.ts, "found existing slack parent");
            return Ok(ThreadRef(parent.ts.clone()));
        }

        // create: a titled parent message, then the welcome reply
        let body = format!("{title}\n{starter_text}");
        let ts = self
            .api
            .post_message(&self.settings.channel_id, None, &body)
            .await?;
        self.api
            .post_message(&self.settings.channel_id, Some(&ts), WELCOME)
            .await?;
        info!(%session, %ts, "slack thread created");
        Ok(ThreadRef(ts))
    }

    async fn post(&self, thread: &ThreadRef, text: &str, _raw: bool) -> Result<()> {
        for chunk in split_chunks(text, CHUNK_MAX) {
            let mut attempt = 0u32;
            loop {
                match self
                    .api
                    .post_message(&self.settings.channel_id, Some(thread.as_str()), &chunk)
                    .await
                {
                    Ok(_) => break,
                    Err(PlatformError::RateLimited { retry_after_secs }) if attempt < 2 => {
                        attempt += 1;
                        tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        Ok(())
    }

    /// No native archive: post a closing notice and mark the parent.
    async fn archive_thread(&self, thread: &ThreadRef) -> Result<()> {
        self.api
            .post_message(
                &self.settings.channel_id,
                Some(thread.as_str()),
                "Thread closed.",
            )
            .await?;
        self.api
            .add_reaction(&self.settings.channel_id, thread.as_str(), CLOSED_MARKER)
            .await
    }

    async fn delete_thread(&self, thread: &ThreadRef) -> Result<()> {
        // deleting the parent collapses the reply chain for bot-owned threads
        self.api
            .delete_message(&self.settings.channel_id, thread.as_str())
            .await
    }

    fn status(&self) -> AdapterStatus {
        match self.status.load(Ordering::Acquire) {
            STATUS_CONNECTED => AdapterStatus::Connected,
            STATUS_CONNECTING => AdapterStatus::Connecting,
            _ => AdapterStatus::Disconnected,
        }
    }
}
