use std::sync::OnceLock;

use serenity::async_trait;
use serenity::model::channel::{Channel, ChannelType, Message};
use serenity::model::gateway::Ready;
use serenity::model::id::{ChannelId, UserId};
use serenity::prelude::{Context, EventHandler};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use aily_core::types::{Platform, ThreadRef};
use aily_platform::types::InboundMessage;

/// Serenity event handler: forwards user-authored messages in tracked
/// threads (children of the configured root channel) to the Router.
pub struct DiscordHandler {
    pub root: ChannelId,
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub bot_id: OnceLock<UserId>,
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        self.bot_id.set(ready.user.id).ok();
        info!(name = %ready.user.name, "discord gateway connected");
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        if let Some(bot_id) = self.bot_id.get() {
            if msg.author.id == *bot_id {
                return;
            }
        }

        // Only messages inside threads hanging off our root channel count.
        let Some((title, parent)) = thread_info(&ctx, msg.channel_id).await else {
            return;
        };
        if parent != self.root {
            return;
        }

        debug!(thread = %msg.channel_id, author = %msg.author.id, "inbound thread message");
        let inbound = InboundMessage {
            platform: Platform::Discord,
            thread: ThreadRef(msg.channel_id.to_string()),
            thread_title: Some(title),
            author_id: msg.author.id.to_string(),
            text: msg.content.clone(),
            external_id: msg.id.to_string(),
        };
        if self.inbound_tx.try_send(inbound).is_err() {
            warn!(thread = %msg.channel_id, "inbound queue full, dropping message");
        }
    }
}

/// Resolve `(thread title, parent channel)` when the channel is a thread.
/// Cache first, REST fallback for threads created before this connection.
async fn thread_info(ctx: &Context, channel_id: ChannelId) -> Option<(String, ChannelId)> {
    if let Some(guild_channel) = ctx.cache.channel(channel_id).map(|c| c.clone()) {
        if is_thread(guild_channel.kind) {
            return guild_channel.parent_id.map(|p| (guild_channel.name, p));
        }
        return None;
    }

    match ctx.http.get_channel(channel_id).await {
        Ok(Channel::Guild(gc)) if is_thread(gc.kind) => gc.parent_id.map(|p| (gc.name, p)),
        Ok(_) => None,
        Err(e) => {
            debug!(channel = %channel_id, error = %e, "channel lookup failed");
            None
        }
    }
}

fn is_thread(kind: ChannelType) -> bool {
    matches!(
        kind,
        ChannelType::PublicThread | ChannelType::PrivateThread | ChannelType::NewsThread
    )
}
