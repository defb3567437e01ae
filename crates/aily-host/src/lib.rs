//! Host Executor: runs multiplexer commands on a fleet of SSH hosts.
//!
//! One persistent multiplexed control channel per host (ssh ControlMaster,
//! lazily opened), one worker task per host funnelling commands through a
//! bounded queue. Unreachable hosts evict their queue and reconnect with
//! exponential backoff.

pub mod control;
pub mod error;
pub mod executor;
pub mod keys;

pub use error::{HostError, Result};
pub use executor::{CreateOutcome, HostExecutor, KillOutcome};
pub use keys::ControlKey;
