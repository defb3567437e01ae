//! Persistent message log with cross-source dedup, thread bindings, and
//! dashboard preferences, all in a single SQLite file.
//!
//! Message appends funnel through a single writer task that groups bursts
//! into one transaction per commit window; readers operate on their own
//! connection and see consistent snapshots (WAL mode).

pub mod backup;
pub mod bindings;
pub mod db;
pub mod error;
pub mod messages;
pub mod prefs;
pub mod writer;

pub use error::{Result, StoreError};
pub use messages::{AppendOutcome, MessagePage, MessageStore, NewMessage, SearchHit, StoredMessage};
pub use writer::MessageWriter;
