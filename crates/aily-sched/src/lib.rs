//! Periodic jobs: host polling, transcript scraping, idle sweeping, orphan
//! reaping, and heartbeats. Each job is a task driven by an interval and a
//! shared shutdown token; failures feed a per-component health counter.

pub mod health;
pub mod heartbeat;
pub mod poller;
pub mod reaper;
pub mod scraper;
pub mod sweeper;

pub use health::ComponentHealth;
pub use heartbeat::Heartbeat;
pub use poller::HostPoller;
pub use reaper::OrphanReaper;
pub use scraper::TranscriptScraper;
pub use sweeper::IdleSweeper;
