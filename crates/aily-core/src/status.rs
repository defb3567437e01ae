use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical session status. Inbound aliases are translated at the boundary;
/// internals only ever see these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Waiting,
    Idle,
    Archived,
    Orphaned,
    Error,
    Unreachable,
}

impl SessionStatus {
    /// `archived` is terminal: nothing transitions out of it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Archived)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Active => "active",
            SessionStatus::Waiting => "waiting",
            SessionStatus::Idle => "idle",
            SessionStatus::Archived => "archived",
            SessionStatus::Orphaned => "orphaned",
            SessionStatus::Error => "error",
            SessionStatus::Unreachable => "unreachable",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionStatus::Active),
            "waiting" => Ok(SessionStatus::Waiting),
            "idle" => Ok(SessionStatus::Idle),
            "archived" => Ok(SessionStatus::Archived),
            "orphaned" => Ok(SessionStatus::Orphaned),
            "error" => Ok(SessionStatus::Error),
            "unreachable" => Ok(SessionStatus::Unreachable),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// An observation that may move a session through the status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// The session was seen alive in a multiplexer listing.
    SshSeen,
    /// The session was absent from a multiplexer listing.
    SshMissing,
    /// A message flowed through the session in either direction.
    MsgInbound,
    /// The agent asked the user a question.
    AskQuestion,
    /// The session was closed deliberately (kill command, lifecycle hook).
    LifecycleClose,
    /// The session's host stopped responding.
    HostDown,
}

impl fmt::Display for StatusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusEvent::SshSeen => "ssh_seen",
            StatusEvent::SshMissing => "ssh_missing",
            StatusEvent::MsgInbound => "msg_inbound",
            StatusEvent::AskQuestion => "ask_question",
            StatusEvent::LifecycleClose => "lifecycle_close",
            StatusEvent::HostDown => "host_down",
        };
        write!(f, "{s}")
    }
}

/// Apply a status event. Returns `Some(new)` when the event causes a
/// transition and `None` when it leaves the status unchanged (callers log
/// ignored events, they are never errors).
///
/// `idle` is derived by the sweeper (no activity for the idle window) and is
/// not an event here; `error` is produced out of band when an operation
/// failure is attributable to the session itself. From `error`, recovery
/// follows the `active` row: the next live sighting restores the session.
pub fn apply(status: SessionStatus, event: StatusEvent) -> Option<SessionStatus> {
    use SessionStatus::*;
    use StatusEvent::*;

    if status == Archived {
        return None;
    }

    let next = match (status, event) {
        (Active | Waiting | Idle | Error, SshSeen) => Active,
        (Active | Waiting | Idle | Error, SshMissing) => Orphaned,
        (Active | Waiting | Idle, MsgInbound) => Active,
        (Error, MsgInbound) => Error,
        (Active | Waiting | Idle, AskQuestion) => Waiting,
        (Error, AskQuestion) => Error,
        (Active | Waiting | Idle | Error, HostDown) => Unreachable,

        (Orphaned, SshSeen) => Active,
        (Orphaned, SshMissing | MsgInbound | AskQuestion | HostDown) => Orphaned,

        (Unreachable, SshSeen) => Active,
        (Unreachable, SshMissing | MsgInbound | AskQuestion | HostDown) => Unreachable,

        (_, LifecycleClose) => Archived,

        (Archived, _) => unreachable!("archived handled above"),
    };

    if next == status {
        None
    } else {
        Some(next)
    }
}

/// Status aliases seen in hook payloads and legacy platform events, mapped to
/// the status event they imply. Unknown aliases map to `None` and are ignored.
pub fn event_from_alias(alias: &str) -> Option<StatusEvent> {
    match alias.to_ascii_lowercase().as_str() {
        "done" | "complete" | "completed" | "finished" => Some(StatusEvent::MsgInbound),
        "ask" | "question" | "waiting_input" | "needs_input" => Some(StatusEvent::AskQuestion),
        "working" | "busy" | "running" => Some(StatusEvent::MsgInbound),
        "closed" | "exited" | "stopped" => Some(StatusEvent::LifecycleClose),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionStatus::*;
    use StatusEvent::*;

    #[test]
    fn archived_absorbs_everything() {
        for ev in [SshSeen, SshMissing, MsgInbound, AskQuestion, LifecycleClose, HostDown] {
            assert_eq!(apply(Archived, ev), None);
        }
    }

    #[test]
    fn waiting_on_question_active_on_reply() {
        assert_eq!(apply(Active, AskQuestion), Some(Waiting));
        assert_eq!(apply(Waiting, MsgInbound), Some(Active));
        // already waiting: no transition, not an error
        assert_eq!(apply(Waiting, AskQuestion), None);
    }

    #[test]
    fn unreachable_recovers_only_on_sighting() {
        assert_eq!(apply(Active, HostDown), Some(Unreachable));
        assert_eq!(apply(Unreachable, MsgInbound), None);
        assert_eq!(apply(Unreachable, AskQuestion), None);
        assert_eq!(apply(Unreachable, SshSeen), Some(Active));
    }

    #[test]
    fn orphaned_ignores_traffic() {
        assert_eq!(apply(Active, SshMissing), Some(Orphaned));
        assert_eq!(apply(Orphaned, MsgInbound), None);
        assert_eq!(apply(Orphaned, SshSeen), Some(Active));
        assert_eq!(apply(Orphaned, LifecycleClose), Some(Archived));
    }

    #[test]
    fn idle_behaves_like_active_row() {
        assert_eq!(apply(Idle, SshSeen), Some(Active));
        assert_eq!(apply(Idle, MsgInbound), Some(Active));
        assert_eq!(apply(Idle, AskQuestion), Some(Waiting));
        assert_eq!(apply(Idle, HostDown), Some(Unreachable));
    }

    #[test]
    fn aliases_translate_at_boundary() {
        assert_eq!(event_from_alias("DONE"), Some(MsgInbound));
        assert_eq!(event_from_alias("question"), Some(AskQuestion));
        assert_eq!(event_from_alias("exited"), Some(LifecycleClose));
        assert_eq!(event_from_alias("???"), None);
    }
}
