use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use aily_bus::{Event, EventBus};
use aily_core::config::HEARTBEAT_INTERVAL_SECS;
use aily_platform::manager::AdapterManager;
use aily_platform::types::AdapterStatus;

/// Publishes `system.heartbeat` plus each platform's connection status.
pub struct Heartbeat {
    bus: Arc<EventBus>,
    adapters: Arc<AdapterManager>,
}

impl Heartbeat {
    pub fn new(bus: Arc<EventBus>, adapters: Arc<AdapterManager>) -> Self {
        Self { bus, adapters }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = HEARTBEAT_INTERVAL_SECS, "heartbeat started");
        let mut interval =
            tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.bus.publish(Event::SystemHeartbeat {
                        ts_millis: chrono::Utc::now().timestamp_millis(),
                    });
                    for (platform, status) in self.adapters.statuses() {
                        self.bus.publish(Event::ConnectionStatus {
                            platform,
                            connected: status == AdapterStatus::Connected,
                        });
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
        info!("heartbeat stopped");
    }
}
