//! Outbound notification fan-out: each platform independently, with bounded
//! retries and `Retry-After` respected.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use aily_bus::{Event, EventBus};
use aily_core::types::{Platform, SessionName, ThreadRef};
use aily_platform::adapter::PlatformAdapter;
use aily_platform::backoff;
use aily_platform::error::PlatformError;
use aily_store::bindings::ThreadBindings;

/// Ensure the thread exists and post into it, retrying up to `max_retries`
/// extra attempts. Emits `notification.failed` when exhausted; failures on
/// one platform never affect another.
pub(crate) async fn post_to_platform(
    adapter: &dyn PlatformAdapter,
    bindings: &ThreadBindings,
    bus: &Arc<EventBus>,
    session: &SessionName,
    starter: &str,
    text: &str,
    raw: bool,
    max_retries: u32,
) -> Option<ThreadRef> {
    let platform = adapter.platform();
    let mut attempt: u32 = 0;
    loop {
        match try_once(adapter, bindings, session, starter, text, raw).await {
            Ok(thread) => return Some(thread),
            Err(e) if attempt < max_retries => {
                let delay = match &e {
                    PlatformError::RateLimited { retry_after_secs } => {
                        Duration::from_secs(*retry_after_secs)
                    }
                    _ => backoff::delay_for_attempt(attempt),
                };
                attempt += 1;
                debug!(%platform, %session, error = %e, attempt, "notify retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(%platform, %session, error = %e, "notification failed");
                bus.publish(Event::NotificationFailed {
                    session: session.clone(),
                    platform,
                    reason: e.to_string(),
                });
                return None;
            }
        }
    }
}

async fn try_once(
    adapter: &dyn PlatformAdapter,
    bindings: &ThreadBindings,
    session: &SessionName,
    starter: &str,
    text: &str,
    raw: bool,
) -> Result<ThreadRef, PlatformError> {
    let platform = adapter.platform();

    // bound thread first; a stale binding falls through to ensure_thread
    let bound = bindings
        .lookup(platform, session)
        .unwrap_or_default();
    let thread = match bound {
        Some(thread) => match adapter.post(&thread, text, raw).await {
            Ok(()) => return Ok(thread),
            Err(PlatformError::Gone) => {
                debug!(%platform, %session, "bound thread is gone, re-ensuring");
                ensure_and_bind(adapter, bindings, session, starter).await?
            }
            Err(e) => return Err(e),
        },
        None => ensure_and_bind(adapter, bindings, session, starter).await?,
    };

    adapter.post(&thread, text, raw).await?;
    Ok(thread)
}

// `Result<Option<ThreadRef>, _>::unwrap_or_default()` above collapses a
// storage read failure into "not bound", which re-ensures the thread.

async fn ensure_and_bind(
    adapter: &dyn PlatformAdapter,
    bindings: &ThreadBindings,
    session: &SessionName,
    starter: &str,
) -> Result<ThreadRef, PlatformError> {
    let thread = adapter.ensure_thread(session, starter).await?;
    if let Err(e) = bindings.bind(adapter.platform(), session, &thread) {
        warn!(%session, error = %e, "binding persist failed");
    }
    Ok(thread)
}
