use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use aily_registry::SessionRegistry;

/// Sweep cadence; the idle threshold itself is configuration.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Demotes `active` sessions with no activity past the threshold to `idle`.
pub struct IdleSweeper {
    registry: Arc<SessionRegistry>,
    idle_after_secs: u64,
}

impl IdleSweeper {
    pub fn new(registry: Arc<SessionRegistry>, idle_after_secs: u64) -> Self {
        Self {
            registry,
            idle_after_secs,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(idle_after_secs = self.idle_after_secs, "idle sweeper started");
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let demoted = self.registry.sweep_idle(self.idle_after_secs);
                    if !demoted.is_empty() {
                        debug!(count = demoted.len(), "sessions demoted to idle");
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
        info!("idle sweeper stopped");
    }
}
