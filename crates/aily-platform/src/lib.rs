//! Contract between the Router and the chat-platform adapters, plus the
//! pieces every adapter shares: outbound formatting against the platform
//! message ceiling, per-name thread locks, the bounded shedding queue, and
//! connect supervision with backoff.

pub mod adapter;
pub mod backoff;
pub mod error;
pub mod format;
pub mod locks;
pub mod manager;
pub mod outbox;
pub mod queue;
pub mod types;

pub use adapter::PlatformAdapter;
pub use error::{PlatformError, Result};
pub use locks::NameLocks;
pub use manager::AdapterManager;
pub use outbox::Outbox;
pub use queue::{OutboundItem, OutboundQueue};
pub use types::{AdapterStatus, InboundMessage};
