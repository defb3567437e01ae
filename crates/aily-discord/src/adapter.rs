use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serenity::builder::EditThread;
use serenity::http::Http;
use serenity::model::gateway::GatewayIntents;
use serenity::model::id::ChannelId;
use serenity::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use aily_core::types::{Platform, SessionName, ThreadRef};
use aily_platform::adapter::PlatformAdapter;
use aily_platform::error::{PlatformError, Result};
use aily_platform::locks::NameLocks;
use aily_platform::types::{AdapterStatus, InboundMessage};

use crate::handler::DiscordHandler;
use crate::send::{map_error, send_chunked, DiscordRest};
use crate::threads;

const STATUS_DISCONNECTED: u8 = 0;
const STATUS_CONNECTING: u8 = 1;
const STATUS_CONNECTED: u8 = 2;

#[derive(Debug, Clone)]
pub struct DiscordSettings {
    pub bot_token: String,
    /// Root channel threads hang off.
    pub channel_id: u64,
}

/// Discord adapter. REST calls go through a shared `Http`; the gateway runs
/// on its own supervised task and reconnects whenever it drops.
pub struct DiscordAdapter {
    settings: DiscordSettings,
    http: Arc<Http>,
    /// Posting goes over REST directly so 429 responses expose their real
    /// `Retry-After`; serenity keeps the gateway and thread management.
    rest: DiscordRest,
    root: ChannelId,
    inbound_tx: mpsc::Sender<InboundMessage>,
    locks: NameLocks,
    status: Arc<AtomicU8>,
    shutdown: CancellationToken,
}

impl DiscordAdapter {
    pub fn new(settings: DiscordSettings, inbound_tx: mpsc::Sender<InboundMessage>) -> Self {
        let http = Arc::new(Http::new(&settings.bot_token));
        let rest = DiscordRest::new(&settings.bot_token);
        let root = ChannelId::new(settings.channel_id);
        Self {
            settings,
            http,
            rest,
            root,
            inbound_tx,
            locks: NameLocks::new(),
            status: Arc::new(AtomicU8::new(STATUS_DISCONNECTED)),
            shutdown: CancellationToken::new(),
        }
    }

    fn parse_thread(&self, thread: &ThreadRef) -> Result<ChannelId> {
        thread
            .as_str()
            .parse::<u64>()
            .map(ChannelId::new)
            .map_err(|_| PlatformError::Protocol(format!("bad thread ref: {thread}")))
    }
}

#[async_trait]
impl PlatformAdapter for DiscordAdapter {
    fn platform(&self) -> Platform {
        Platform::Discord
    }

    async fn connect(&mut self) -> Result<()> {
        self.status.store(STATUS_CONNECTING, Ordering::Release);

        // Validate credentials up front so a bad token fails fast with the
        // auth error kind instead of looping in the gateway supervisor.
        self.http
            .get_current_user()
            .await
            .map_err(|e| match map_error(e) {
                PlatformError::Protocol(m) => PlatformError::Auth(m),
                other => other,
            })?;

        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let token = self.settings.bot_token.clone();
        let root = self.root;
        let inbound_tx = self.inbound_tx.clone();
        let status = Arc::clone(&self.status);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                let handler = DiscordHandler {
                    root,
                    inbound_tx: inbound_tx.clone(),
                    bot_id: OnceLock::new(),
                };
                let client = Client::builder(&token, intents).event_handler(handler).await;

                match client {
                    Ok(mut client) => {
                        status.store(STATUS_CONNECTED, Ordering::Release);
                        attempt = 0;
                        info!("discord gateway starting");
                        tokio::select! {
                            result = client.start() => {
                                if let Err(e) = result {
                                    warn!(error = %e, "discord gateway dropped");
                                }
                            }
                            _ = shutdown.cancelled() => {
                                info!("discord gateway shutting down");
                                client.shard_manager.shutdown_all().await;
                                break;
                            }
                        }
                    }
                    Err(e) => error!(error = %e, "discord client build failed"),
                }

                if shutdown.is_cancelled() {
                    break;
                }
                status.store(STATUS_CONNECTING, Ordering::Release);
                let delay = aily_platform::backoff::delay_for_attempt(attempt);
                attempt = attempt.saturating_add(1);
                warn!(retry_in_ms = delay.as_millis() as u64, "discord reconnecting");
                tokio::time::sleep(delay).await;
            }
            status.store(STATUS_DISCONNECTED, Ordering::Release);
        });

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.shutdown.cancel();
        // give the gateway task a moment to close the shard cleanly
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.status.store(STATUS_DISCONNECTED, Ordering::Release);
        Ok(())
    }

    async fn ensure_thread(&self, session: &SessionName, starter_text: &str) -> Result<ThreadRef> {
        let _guard = self.locks.acquire(session.as_str()).await;
        threads::ensure_thread(&self.http, self.root, session, starter_text).await
    }

    async fn post(&self, thread: &ThreadRef, text: &str, _raw: bool) -> Result<()> {
        let channel = self.parse_thread(thread)?;
        send_chunked(&self.rest, channel, text).await
    }

    async fn archive_thread(&self, thread: &ThreadRef) -> Result<()> {
        let channel = self.parse_thread(thread)?;
        channel
            .edit_thread(&self.http, EditThread::new().archived(true))
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn delete_thread(&self, thread: &ThreadRef) -> Result<()> {
        let channel = self.parse_thread(thread)?;
        channel.delete(&self.http).await.map_err(map_error)?;
        Ok(())
    }

    fn status(&self) -> AdapterStatus {
        match self.status.load(Ordering::Acquire) {
            STATUS_CONNECTED => AdapterStatus::Connected,
            STATUS_CONNECTING => AdapterStatus::Connecting,
            _ => AdapterStatus::Disconnected,
        }
    }
}
