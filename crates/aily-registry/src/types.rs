use chrono::{DateTime, Utc};
use serde::Serialize;

use aily_core::status::SessionStatus;
use aily_core::types::{AgentKind, HostId, SessionName};

/// Length cap on the stored last-message preview.
pub const PREVIEW_MAX_CHARS: usize = 120;

/// A known session. The registry is the only writer of these records.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub name: SessionName,
    /// `None` when the session has only been observed via a platform event.
    pub host: Option<HostId>,
    pub agent: AgentKind,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub last_message_preview: Option<String>,
    /// Remote path of the agent's transcript, once discovered.
    pub log_path: Option<String>,
    /// Byte offset the transcript scraper has consumed up to.
    pub scrape_offset: i64,
}

/// One observation of a session from any source. Fields left `None` keep
/// their current value (last-writer-wins per field); `status` never merges
/// this way; it only moves through the state machine.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub host: Option<HostId>,
    pub agent: Option<AgentKind>,
    pub preview: Option<String>,
    pub log_path: Option<String>,
    /// Whether the source saw a live multiplexer session. Decides the
    /// initial status (`active` vs `orphaned`) for first observations.
    pub seen_live: bool,
}

impl Observation {
    pub fn live_on(host: HostId) -> Self {
        Self {
            host: Some(host),
            seen_live: true,
            ..Default::default()
        }
    }

    pub fn from_platform() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    RecentActivity,
    Name,
    CreatedAt,
}

impl SortOrder {
    pub fn parse(s: &str) -> Self {
        match s {
            "name" => SortOrder::Name,
            "created" | "created_at" => SortOrder::CreatedAt,
            _ => SortOrder::RecentActivity,
        }
    }
}

/// Filters for listing sessions.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<SessionStatus>,
    pub host: Option<HostId>,
    pub sort: SortOrder,
    pub limit: Option<usize>,
}

/// Truncate a message body into a preview suitable for sidebars.
pub fn preview_of(content: &str) -> String {
    let line = content.lines().next().unwrap_or("");
    let mut out: String = line.chars().take(PREVIEW_MAX_CHARS).collect();
    if line.chars().count() > PREVIEW_MAX_CHARS {
        out.push('…');
    }
    out
}
