use serde::Serialize;

use aily_core::status::SessionStatus;
use aily_core::types::{Platform, SessionName};

/// Every event that can cross the bus. Tagged sum, no stringly-typed kinds:
/// subscribers filter on session scope, the dashboard serialises the tag as
/// the wire event name.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    SessionCreated {
        session: SessionName,
    },
    SessionUpdated {
        session: SessionName,
    },
    SessionStatusChanged {
        session: SessionName,
        old: SessionStatus,
        new: SessionStatus,
    },
    SessionDeleted {
        session: SessionName,
    },
    MessageNew {
        session: SessionName,
        message_id: i64,
    },
    TypingStart {
        session: SessionName,
    },
    TypingStop {
        session: SessionName,
    },
    SyncComplete {
        session: SessionName,
        new_messages: usize,
    },
    ConnectionStatus {
        platform: Platform,
        connected: bool,
    },
    NotificationFailed {
        session: SessionName,
        platform: Platform,
        reason: String,
    },
    ComponentDegraded {
        component: String,
        consecutive_failures: u32,
    },
    SystemHeartbeat {
        ts_millis: i64,
    },
    SubscriberLag {
        missed: u64,
    },
}

impl Event {
    /// Dotted wire name, stable across versions.
    pub fn name(&self) -> &'static str {
        match self {
            Event::SessionCreated { .. } => "session.created",
            Event::SessionUpdated { .. } => "session.updated",
            Event::SessionStatusChanged { .. } => "session.status_changed",
            Event::SessionDeleted { .. } => "session.deleted",
            Event::MessageNew { .. } => "message.new",
            Event::TypingStart { .. } => "typing.start",
            Event::TypingStop { .. } => "typing.stop",
            Event::SyncComplete { .. } => "sync.complete",
            Event::ConnectionStatus { .. } => "connection.status",
            Event::NotificationFailed { .. } => "notification.failed",
            Event::ComponentDegraded { .. } => "component.degraded",
            Event::SystemHeartbeat { .. } => "system.heartbeat",
            Event::SubscriberLag { .. } => "subscriber.lag",
        }
    }

    /// Session scope for subscriber filtering; `None` means process-wide.
    pub fn session(&self) -> Option<&SessionName> {
        match self {
            Event::SessionCreated { session }
            | Event::SessionUpdated { session }
            | Event::SessionStatusChanged { session, .. }
            | Event::SessionDeleted { session }
            | Event::MessageNew { session, .. }
            | Event::TypingStart { session }
            | Event::TypingStop { session }
            | Event::SyncComplete { session, .. }
            | Event::NotificationFailed { session, .. } => Some(session),
            Event::ConnectionStatus { .. }
            | Event::ComponentDegraded { .. }
            | Event::SystemHeartbeat { .. }
            | Event::SubscriberLag { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_are_dotted() {
        let ev = Event::SessionStatusChanged {
            session: SessionName::parse("s").unwrap(),
            old: SessionStatus::Active,
            new: SessionStatus::Idle,
        };
        assert_eq!(ev.name(), "session.status_changed");
    }

    #[test]
    fn serialises_with_event_tag() {
        let ev = Event::TypingStart {
            session: SessionName::parse("s").unwrap(),
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(r#""event":"typing_start""#));
        assert!(json.contains(r#""session":"s""#));
    }
}
