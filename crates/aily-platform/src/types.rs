use aily_core::types::{Platform, ThreadRef};

/// Adapter connection state as seen by the manager and the stats endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// A user-authored message observed in a tracked thread, handed to the
/// Router verbatim.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub platform: Platform,
    pub thread: ThreadRef,
    /// Title of the thread if the platform knows it (binding probe).
    pub thread_title: Option<String>,
    pub author_id: String,
    pub text: String,
    pub external_id: String,
}
