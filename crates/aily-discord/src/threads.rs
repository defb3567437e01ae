//! Thread find-or-create against the configured root channel.
//!
//! Find order: active threads under the channel, then archived threads
//! (reopened on match), then recent channel messages carrying a thread.

use serenity::builder::{CreateThread, EditThread, GetMessages};
use serenity::http::Http;
use serenity::model::channel::{Channel, ChannelType, GuildChannel};
use serenity::model::id::ChannelId;
use tracing::{debug, info};

use aily_core::types::{thread_title, SessionName, ThreadRef};
use aily_platform::error::{PlatformError, Result};

use crate::send::map_error;

/// Recent root-channel messages probed for thread-link metadata.
const MESSAGE_PROBE_LIMIT: u8 = 50;

/// Posted right after a thread is created.
pub const WELCOME: &str = "Relay attached. Reply here to type into the session. \
Commands: `!sessions` list, `!kill <name>` stop, `!c` interrupt, `!enter` submit, `!esc` escape.";

pub async fn ensure_thread(
    http: &Http,
    root: ChannelId,
    session: &SessionName,
    starter_text: &str,
) -> Result<ThreadRef> {
    let title = thread_title(session);

    // 1. active threads under the root channel
    if let Some(found) = find_active(http, root, &title).await? {
        debug!(%session, thread = %found.id, "found active thread");
        return Ok(ThreadRef(found.id.to_string()));
    }

    // 2. archived threads; reopen on match
    if let Some(found) = find_archived(http, root, &title).await? {
        info!(%session, thread = %found.id, "reopening archived thread");
        found
            .id
            .edit_thread(http, EditThread::new().archived(false))
            .await
            .map_err(map_error)?;
        return Ok(ThreadRef(found.id.to_string()));
    }

    // 3. recent channel messages with thread-link metadata
    if let Some(thread_id) = find_via_messages(http, root, &title).await? {
        debug!(%session, thread = %thread_id, "found thread via channel messages");
        return Ok(ThreadRef(thread_id.to_string()));
    }

    // 4. create: starter message, thread attached to it, welcome with hints
    let starter = root.say(http, starter_text).await.map_err(map_error)?;
    let thread = root
        .create_thread_from_message(
            http,
            starter.id,
            CreateThread::new(title).kind(ChannelType::PublicThread),
        )
        .await
        .map_err(map_error)?;
    thread.id.say(http, WELCOME).await.map_err(map_error)?;
    info!(%session, thread = %thread.id, "thread created");
    Ok(ThreadRef(thread.id.to_string()))
}

async fn find_active(
    http: &Http,
    root: ChannelId,
    title: &str,
) -> Result<Option<GuildChannel>> {
    let guild_id = match http.get_channel(root).await.map_err(map_error)? {
        Channel::Guild(gc) => gc.guild_id,
        _ => {
            return Err(PlatformError::Protocol(
                "configured root channel is not a guild channel".into(),
            ))
        }
    };

    let active = http
        .get_guild_active_threads(guild_id)
        .await
        .map_err(map_error)?;
    Ok(active
        .threads
        .into_iter()
        .find(|t| t.parent_id == Some(root) && t.name == title))
}

async fn find_archived(
    http: &Http,
    root: ChannelId,
    title: &str,
) -> Result<Option<GuildChannel>> {
    let archived = http
        .get_channel_archived_public_threads(root, None, Some(100))
        .await
        .map_err(map_error)?;
    Ok(archived.threads.into_iter().find(|t| t.name == title))
}

async fn find_via_messages(
    http: &Http,
    root: ChannelId,
    title: &str,
) -> Result<Option<ChannelId>> {
    let messages = root
        .messages(http, GetMessages::new().limit(MESSAGE_PROBE_LIMIT))
        .await
        .map_err(map_error)?;
    Ok(messages
        .into_iter()
        .filter_map(|m| m.thread)
        .find(|t| t.name == title)
        .map(|t| t.id))
}
