use async_trait::async_trait;

use aily_core::types::{Platform, SessionName, ThreadRef};

use crate::error::Result;
use crate::types::AdapterStatus;

/// Common interface every chat adapter implements. The Router only ever
/// talks to this trait; platform wire details stay inside the adapter.
///
/// Implementations must be `Send + Sync` so a connected adapter can post
/// concurrently while its gateway task keeps receiving.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Which platform this adapter fronts.
    fn platform(&self) -> Platform;

    /// Establish the persistent gateway (with heartbeats). Reconnection on
    /// later drops is the adapter's own responsibility.
    async fn connect(&mut self) -> Result<()>;

    /// Gracefully close the gateway. Takes `&self` so teardown can run
    /// through the shared handles the Router holds.
    async fn disconnect(&self) -> Result<()>;

    /// Find-or-create the thread named `[agent] <session>`. Concurrent calls
    /// for the same name serialise behind a per-name lock and the second
    /// caller observes the already-created thread.
    async fn ensure_thread(&self, session: &SessionName, starter_text: &str) -> Result<ThreadRef>;

    /// Post text into a thread. `raw` suppresses the standard task-complete
    /// framing. Oversized content is split or truncated to the platform
    /// ceiling by the adapter.
    async fn post(&self, thread: &ThreadRef, text: &str, raw: bool) -> Result<()>;

    /// Archive the thread (platform-native where available, else a closing
    /// notice plus marker reaction).
    async fn archive_thread(&self, thread: &ThreadRef) -> Result<()>;

    /// Delete the thread where the platform supports it.
    async fn delete_thread(&self, thread: &ThreadRef) -> Result<()>;

    /// Current connection state without blocking.
    fn status(&self) -> AdapterStatus;
}
