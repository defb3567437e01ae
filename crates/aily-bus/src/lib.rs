//! In-process publish/subscribe with per-subscriber session filtering.
//!
//! Publishing is fan-out over a tokio broadcast channel; each subscriber
//! applies its own filter on the receive side. A subscriber that falls more
//! than the buffer capacity behind loses the oldest events and observes a
//! single `subscriber.lag` event in their place.

mod events;

pub use events::Event;

use std::collections::HashSet;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use aily_core::types::SessionName;

/// Bounded per-subscriber buffer; overflow drops the oldest events.
const SUBSCRIBER_BUFFER: usize = 256;

/// Broadcast hub for typed relay events.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self { tx }
    }

    /// Publish an event to every live subscriber. Silently a no-op when no
    /// subscriber exists.
    pub fn publish(&self, event: Event) {
        debug!(event = %event.name(), "bus publish");
        let _ = self.tx.send(event);
    }

    /// Subscribe with an optional session filter. `None` (or an empty set)
    /// means all sessions; events without a session always pass.
    pub fn subscribe(&self, filter: Option<HashSet<SessionName>>) -> Subscription {
        let filter = filter.filter(|f| !f.is_empty());
        Subscription {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    /// Number of live subscribers (dashboard stats).
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A filtered receive handle onto the bus.
pub struct Subscription {
    rx: broadcast::Receiver<Event>,
    filter: Option<HashSet<SessionName>>,
}

impl Subscription {
    /// Receive the next event matching this subscriber's filter.
    ///
    /// Returns `None` when the bus is closed. Falling behind the buffer is
    /// reported in-band as [`Event::SubscriberLag`].
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    return Some(Event::SubscriberLag { missed });
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Replace the session filter (re-subscribe after reconnect).
    pub fn set_filter(&mut self, filter: Option<HashSet<SessionName>>) {
        self.filter = filter.filter(|f| !f.is_empty());
    }

    fn matches(&self, event: &Event) -> bool {
        match (&self.filter, event.session()) {
            (None, _) => true,
            // events without a session scope (heartbeat, connection status)
            // reach every subscriber
            (Some(_), None) => true,
            (Some(filter), Some(session)) => filter.contains(session),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aily_core::status::SessionStatus;

    fn name(s: &str) -> SessionName {
        SessionName::parse(s).unwrap()
    }

    #[tokio::test]
    async fn filtered_subscriber_sees_only_its_sessions() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Some([name("s1")].into_iter().collect()));

        bus.publish(Event::MessageNew {
            session: name("s2"),
            message_id: 1,
        });
        bus.publish(Event::MessageNew {
            session: name("s1"),
            message_id: 2,
        });

        match sub.recv().await.unwrap() {
            Event::MessageNew { session, message_id } => {
                assert_eq!(session, name("s1"));
                assert_eq!(message_id, 2);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unscoped_events_reach_filtered_subscribers() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Some([name("s1")].into_iter().collect()));

        bus.publish(Event::SystemHeartbeat { ts_millis: 42 });
        assert!(matches!(
            sub.recv().await.unwrap(),
            Event::SystemHeartbeat { ts_millis: 42 }
        ));
    }

    #[tokio::test]
    async fn empty_filter_means_all() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Some(HashSet::new()));

        bus.publish(Event::SessionStatusChanged {
            session: name("t"),
            old: SessionStatus::Active,
            new: SessionStatus::Idle,
        });
        assert!(sub.recv().await.is_some());
    }

    #[tokio::test]
    async fn lag_is_reported_in_band() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(None);

        for i in 0..(SUBSCRIBER_BUFFER + 10) {
            bus.publish(Event::MessageNew {
                session: name("s"),
                message_id: i as i64,
            });
        }

        match sub.recv().await.unwrap() {
            Event::SubscriberLag { missed } => assert!(missed >= 10),
            other => panic!("expected lag, got {other:?}"),
        }
    }
}
