use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use aily_bus::{Event, EventBus};

/// Consecutive failures before a component is reported degraded.
const DEGRADED_THRESHOLD: u32 = 3;

/// Per-component failure counter. Background scheduler errors never abort
/// their loop; they count here and escalate to the bus when they streak.
pub struct ComponentHealth {
    component: &'static str,
    consecutive: AtomicU32,
    bus: Arc<EventBus>,
}

impl ComponentHealth {
    pub fn new(component: &'static str, bus: Arc<EventBus>) -> Self {
        Self {
            component,
            consecutive: AtomicU32::new(0),
            bus,
        }
    }

    pub fn ok(&self) {
        self.consecutive.store(0, Ordering::Release);
    }

    pub fn failed(&self) {
        let streak = self.consecutive.fetch_add(1, Ordering::AcqRel) + 1;
        if streak == DEGRADED_THRESHOLD {
            self.bus.publish(Event::ComponentDegraded {
                component: self.component.to_string(),
                consecutive_failures: streak,
            });
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn third_consecutive_failure_escalates_once() {
        let bus = Arc::new(EventBus::new());
        let mut sub = bus.subscribe(None);
        let health = ComponentHealth::new("poller", Arc::clone(&bus));

        health.failed();
        health.failed();
        health.failed();
        health.failed(); // streak of four: still one event

        match sub.recv().await.unwrap() {
            Event::ComponentDegraded {
                component,
                consecutive_failures,
            } => {
                assert_eq!(component, "poller");
                assert_eq!(consecutive_failures, 3);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        // a success resets the streak
        health.ok();
        assert_eq!(health.consecutive_failures(), 0);
    }
}
