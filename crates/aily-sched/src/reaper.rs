use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use aily_registry::SessionRegistry;
use aily_router::Router;

const REAP_INTERVAL: Duration = Duration::from_secs(300);

/// Archives threads whose session has been orphaned past the retention
/// window. The thread cleanup policy decides archive vs delete.
pub struct OrphanReaper {
    registry: Arc<SessionRegistry>,
    router: Arc<Router>,
    retain_hours: u64,
}

impl OrphanReaper {
    pub fn new(registry: Arc<SessionRegistry>, router: Arc<Router>, retain_hours: u64) -> Self {
        Self {
            registry,
            router,
            retain_hours,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(retain_hours = self.retain_hours, "orphan reaper started");
        let mut interval = tokio::time::interval(REAP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => self.reap().await,
                _ = shutdown.cancelled() => break,
            }
        }
        info!("orphan reaper stopped");
    }

    async fn reap(&self) {
        let stale = self.registry.orphans_older_than(self.retain_hours);
        for name in stale {
            warn!(session = %name, "reaping orphaned session");
            // no multiplexer session exists by definition; close threads only
            self.router.close_session(&name, false).await;
        }
    }
}
