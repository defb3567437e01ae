//! Authoritative in-memory table of known sessions, persisted to the shared
//! database and kept current by merging observations from SSH polling,
//! platform events, hook webhooks, and user actions.

pub mod db;
pub mod error;
pub mod registry;
pub mod types;

pub use error::{RegistryError, Result};
pub use registry::SessionRegistry;
pub use types::{ListFilter, Observation, Session, SortOrder};
