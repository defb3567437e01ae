use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use aily_core::types::Platform;

use crate::error::PlatformError;
use crate::manager::AdapterManager;
use crate::queue::{OutboundItem, OutboundQueue};

/// Default outbound queue depth per platform.
pub const OUTBOX_DEPTH: usize = 256;

/// Per-platform outbound spool: non-critical chatter (listings, notices,
/// confirmations) queues here and is shed under overflow; task-complete and
/// question posts go to the adapter directly and are never shed.
pub struct Outbox {
    platform: Platform,
    queue: Mutex<OutboundQueue>,
    ready: Notify,
}

impl Outbox {
    pub fn new(platform: Platform) -> Arc<Self> {
        Arc::new(Self {
            platform,
            queue: Mutex::new(OutboundQueue::new(OUTBOX_DEPTH)),
            ready: Notify::new(),
        })
    }

    /// Queue a post. Returns the shed victim on overflow.
    pub fn enqueue(&self, item: OutboundItem) -> Option<OutboundItem> {
        let shed = self.queue.lock().unwrap().push(item);
        if let Some(victim) = &shed {
            warn!(platform = %self.platform, thread = %victim.thread, "outbox overflow, shedding oldest");
        }
        self.ready.notify_one();
        shed
    }

    async fn pop(&self) -> OutboundItem {
        loop {
            if let Some(item) = self.queue.lock().unwrap().pop() {
                return item;
            }
            self.ready.notified().await;
        }
    }

    /// Drain loop: posts sequentially through the platform's adapter,
    /// honouring `Retry-After`, dropping items the platform rejects.
    pub async fn run(self: Arc<Self>, adapters: Arc<AdapterManager>, shutdown: CancellationToken) {
        loop {
            let item = tokio::select! {
                item = self.pop() => item,
                _ = shutdown.cancelled() => break,
            };
            let Some(adapter) = adapters.get(self.platform) else {
                continue;
            };
            match adapter.post(&item.thread, &item.text, item.raw).await {
                Ok(()) => {}
                Err(PlatformError::RateLimited { retry_after_secs }) => {
                    debug!(platform = %self.platform, retry_after_secs, "outbox rate limited");
                    tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
                    self.queue.lock().unwrap().push_front(item);
                }
                Err(e) => {
                    warn!(platform = %self.platform, error = %e, "outbox post dropped");
                }
            }
        }
        debug!(platform = %self.platform, "outbox stopped");
    }
}
