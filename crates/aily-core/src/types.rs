use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AilyError;

/// A multiplexer session name: `^[A-Za-z0-9_-]{1,64}$`, unique per host and
/// globally unique by convention.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionName(String);

impl SessionName {
    pub fn parse(s: &str) -> Result<Self, AilyError> {
        if s.is_empty() || s.len() > 64 {
            return Err(AilyError::InvalidArgument(format!(
                "session name must be 1-64 characters, got {}",
                s.len()
            )));
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(AilyError::InvalidArgument(format!(
                "session name '{s}' contains characters outside [A-Za-z0-9_-]"
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Alias for a configured SSH host. The opaque target string (anything the
/// local ssh client resolves) lives in host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(pub String);

impl HostId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for HostId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which AI agent runs inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Codex,
    Gemini,
    Opencode,
    Shell,
    #[default]
    Unknown,
}

impl AgentKind {
    /// Agents whose local transcript can be scraped for missed messages.
    pub fn has_transcript(&self) -> bool {
        matches!(
            self,
            AgentKind::Claude | AgentKind::Codex | AgentKind::Gemini | AgentKind::Opencode
        )
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentKind::Claude => "claude",
            AgentKind::Codex => "codex",
            AgentKind::Gemini => "gemini",
            AgentKind::Opencode => "opencode",
            AgentKind::Shell => "shell",
            AgentKind::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for AgentKind {
    type Err = ();

    /// Boundary normalisation: inbound payloads use a handful of aliases,
    /// internals only ever see canonical values.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "claude" | "claude-code" | "claudecode" => AgentKind::Claude,
            "codex" | "openai-codex" => AgentKind::Codex,
            "gemini" | "gemini-cli" => AgentKind::Gemini,
            "opencode" => AgentKind::Opencode,
            "shell" | "bash" | "zsh" => AgentKind::Shell,
            _ => AgentKind::Unknown,
        })
    }
}

/// A chat platform the relay bridges to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Discord,
    Slack,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Discord => write!(f, "discord"),
            Platform::Slack => write!(f, "slack"),
        }
    }
}

impl std::str::FromStr for Platform {
    type Err = AilyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discord" => Ok(Platform::Discord),
            "slack" => Ok(Platform::Slack),
            other => Err(AilyError::InvalidArgument(format!(
                "unknown platform: {other}"
            ))),
        }
    }
}

/// Opaque per-platform thread identifier (Discord thread id, Slack parent ts).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadRef(pub String);

impl ThreadRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MessageRole {
    type Err = AilyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            "tool" => Ok(MessageRole::Tool),
            other => Err(AilyError::InvalidArgument(format!("unknown role: {other}"))),
        }
    }
}

/// Where a stored message was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    Jsonl,
    Discord,
    Slack,
    Tmux,
    Hook,
}

impl fmt::Display for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageSource::Jsonl => "jsonl",
            MessageSource::Discord => "discord",
            MessageSource::Slack => "slack",
            MessageSource::Tmux => "tmux",
            MessageSource::Hook => "hook",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MessageSource {
    type Err = AilyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "jsonl" => Ok(MessageSource::Jsonl),
            "discord" => Ok(MessageSource::Discord),
            "slack" => Ok(MessageSource::Slack),
            "tmux" => Ok(MessageSource::Tmux),
            "hook" => Ok(MessageSource::Hook),
            other => Err(AilyError::InvalidArgument(format!(
                "unknown source: {other}"
            ))),
        }
    }
}

impl From<Platform> for MessageSource {
    fn from(p: Platform) -> Self {
        match p {
            Platform::Discord => MessageSource::Discord,
            Platform::Slack => MessageSource::Slack,
        }
    }
}

/// Canonical thread title prefix. Parsers accept this exact prefix (case
/// sensitive, single space) and take everything after it verbatim.
pub const THREAD_TITLE_PREFIX: &str = "[agent] ";

/// Render the canonical thread title for a session.
pub fn thread_title(session: &SessionName) -> String {
    format!("{THREAD_TITLE_PREFIX}{session}")
}

/// Parse a thread title back into a session name, if it is canonical.
pub fn parse_thread_title(title: &str) -> Option<SessionName> {
    let rest = title.strip_prefix(THREAD_TITLE_PREFIX)?;
    SessionName::parse(rest).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_name_accepts_valid() {
        assert!(SessionName::parse("build-7_x").is_ok());
        assert!(SessionName::parse(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn session_name_rejects_invalid() {
        assert!(SessionName::parse("").is_err());
        assert!(SessionName::parse(&"a".repeat(65)).is_err());
        assert!(SessionName::parse("has space").is_err());
        assert!(SessionName::parse("dots.bad").is_err());
    }

    #[test]
    fn agent_aliases_normalise_at_boundary() {
        assert_eq!("claude-code".parse::<AgentKind>().unwrap(), AgentKind::Claude);
        assert_eq!("BASH".parse::<AgentKind>().unwrap(), AgentKind::Shell);
        assert_eq!("mystery".parse::<AgentKind>().unwrap(), AgentKind::Unknown);
    }

    #[test]
    fn thread_title_round_trip() {
        let name = SessionName::parse("deploy-3").unwrap();
        let title = thread_title(&name);
        assert_eq!(title, "[agent] deploy-3");
        assert_eq!(parse_thread_title(&title).unwrap(), name);
    }

    #[test]
    fn thread_title_prefix_is_exact() {
        assert!(parse_thread_title("[Agent] x").is_none());
        assert!(parse_thread_title("[agent]  x").is_none());
        assert!(parse_thread_title("agent x").is_none());
    }
}
