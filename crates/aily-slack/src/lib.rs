//! Slack adapter: Web API over HTTPS for posting and thread discovery, and
//! a Socket Mode WebSocket for inbound events.
//!
//! Slack has no native thread archive; archival posts a closing notice and
//! adds a marker reaction to the parent message.

pub mod adapter;
pub mod api;
pub mod socket;

pub use adapter::{SlackAdapter, SlackSettings};
