use std::collections::HashMap;

use tokio::time::sleep;
use tracing::{error, info, warn};

use aily_core::types::Platform;

use crate::adapter::PlatformAdapter;
use crate::backoff;
use crate::error::PlatformError;
use crate::types::AdapterStatus;

/// Connection attempts before a channel is given up at startup. Auth
/// failures abort immediately: a bad token never fixes itself.
const MAX_CONNECT_ATTEMPTS: u32 = 10;

/// Owns the registered adapters as a group: connect with backoff, hand out
/// shared references, disconnect in reverse registration order.
pub struct AdapterManager {
    adapters: Vec<Box<dyn PlatformAdapter>>,
}

impl AdapterManager {
    pub fn new() -> Self {
        Self {
            adapters: Vec::new(),
        }
    }

    pub fn register(&mut self, adapter: Box<dyn PlatformAdapter>) {
        info!(platform = %adapter.platform(), "registering platform adapter");
        self.adapters.push(adapter);
    }

    /// Connect every adapter sequentially. Auth failures propagate (the
    /// binary exits 4); transient failures retry with jittered backoff.
    pub async fn connect_all(&mut self) -> Result<(), PlatformError> {
        for adapter in self.adapters.iter_mut() {
            let platform = adapter.platform();
            connect_with_backoff(platform, adapter.as_mut()).await?;
        }
        Ok(())
    }

    /// Disconnect in reverse registration order (teardown mirrors build-up).
    pub async fn disconnect_all(&self) {
        for adapter in self.adapters.iter().rev() {
            let platform = adapter.platform();
            info!(%platform, "disconnecting platform adapter");
            if let Err(e) = adapter.disconnect().await {
                warn!(%platform, error = %e, "error during disconnect");
            }
        }
    }

    pub fn get(&self, platform: Platform) -> Option<&dyn PlatformAdapter> {
        self.adapters
            .iter()
            .find(|a| a.platform() == platform)
            .map(|b| b.as_ref())
    }

    pub fn platforms(&self) -> Vec<Platform> {
        self.adapters.iter().map(|a| a.platform()).collect()
    }

    pub fn statuses(&self) -> HashMap<Platform, AdapterStatus> {
        self.adapters
            .iter()
            .map(|a| (a.platform(), a.status()))
            .collect()
    }
}

impl Default for AdapterManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn connect_with_backoff(
    platform: Platform,
    adapter: &mut dyn PlatformAdapter,
) -> Result<(), PlatformError> {
    for attempt in 0..MAX_CONNECT_ATTEMPTS {
        match adapter.connect().await {
            Ok(()) => {
                info!(%platform, attempt, "platform connected");
                return Ok(());
            }
            Err(e @ PlatformError::Auth(_)) => {
                error!(%platform, error = %e, "authentication rejected, not retrying");
                return Err(e);
            }
            Err(e) if attempt + 1 == MAX_CONNECT_ATTEMPTS => return Err(e),
            Err(e) => {
                let delay = backoff::delay_for_attempt(attempt);
                warn!(
                    %platform,
                    attempt,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "platform connect failed, backing off"
                );
                sleep(delay).await;
            }
        }
    }
    unreachable!("backoff loop always returns")
}
