//! Discord adapter: a serenity gateway for inbound thread messages and the
//! REST surface for thread management and posting.

pub mod adapter;
pub mod handler;
pub mod send;
pub mod threads;

pub use adapter::{DiscordAdapter, DiscordSettings};
