use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AilyError, Result};
use crate::types::{HostId, Platform};

pub const DEFAULT_PORT: u16 = 8797;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Heartbeat cadence on the event bus and streaming channel.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 25;
/// Default deadline for any single relay operation.
pub const DEFAULT_OP_TIMEOUT_MS: u64 = 10_000;
/// Streaming clients beyond this get 503.
pub const MAX_STREAM_CLIENTS: usize = 50;

/// Every tunable in one place. Loaded from `aily.toml` plus the observable
/// environment names (`PLATFORMS`, `DISCORD_BOT_TOKEN`, `SSH_HOSTS`, …).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AilyConfig {
    /// Comma-separated subset of {discord, slack}. Absent = auto from tokens.
    #[serde(default)]
    pub platforms: Option<String>,

    #[serde(default)]
    pub discord_bot_token: Option<String>,
    #[serde(default)]
    pub discord_channel_id: Option<String>,

    #[serde(default)]
    pub slack_bot_token: Option<String>,
    #[serde(default)]
    pub slack_app_token: Option<String>,
    #[serde(default)]
    pub slack_channel_id: Option<String>,

    /// Comma-separated SSH host aliases; targets resolve via the local ssh
    /// client config.
    #[serde(default)]
    pub ssh_hosts: String,

    #[serde(default)]
    pub thread_cleanup: ThreadCleanup,

    /// Enable multiplexer lifecycle hooks driving thread create/close.
    #[serde(default = "bool_true")]
    pub tmux_thread_sync: bool,

    #[serde(default = "default_notify_retries")]
    pub notify_max_retries: u32,

    /// Bearer token for the REST/stream surface. Absent = auth disabled
    /// (loopback deployments only).
    #[serde(default)]
    pub dashboard_token: Option<String>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_scrape_interval_ms")]
    pub scrape_interval_ms: u64,
    #[serde(default = "default_idle_after_sec")]
    pub idle_after_sec: u64,
    #[serde(default = "default_orphan_retain_hours")]
    pub orphan_retain_hours: u64,

    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThreadCleanup {
    #[default]
    Archive,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_backup_dir")]
    pub dir: String,
    #[serde(default = "default_backup_interval_hours")]
    pub interval_hours: u64,
    #[serde(default = "default_backup_retain_days")]
    pub retain_days: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
            interval_hours: default_backup_interval_hours(),
            retain_days: default_backup_retain_days(),
        }
    }
}

/// Observable configuration names overlayed from the process environment.
const ENV_KEYS: [&str; 15] = [
    "PLATFORMS",
    "DISCORD_BOT_TOKEN",
    "DISCORD_CHANNEL_ID",
    "SLACK_BOT_TOKEN",
    "SLACK_APP_TOKEN",
    "SLACK_CHANNEL_ID",
    "SSH_HOSTS",
    "THREAD_CLEANUP",
    "TMUX_THREAD_SYNC",
    "NOTIFY_MAX_RETRIES",
    "DASHBOARD_TOKEN",
    "POLL_INTERVAL_MS",
    "SCRAPE_INTERVAL_MS",
    "IDLE_AFTER_SEC",
    "ORPHAN_RETAIN_HOURS",
];

impl AilyConfig {
    /// Load config: TOML file (explicit path, else `~/.aily/aily.toml`) with
    /// the flat env names overlayed on top.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: AilyConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::raw().only(&ENV_KEYS))
            .extract()
            .map_err(|e| AilyError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the relay cannot run with. Failures here map to
    /// exit code 2.
    pub fn validate(&self) -> Result<()> {
        for platform in self.enabled_platforms() {
            match platform {
                Platform::Discord => {
                    if self.discord_bot_token.is_none() || self.discord_channel_id.is_none() {
                        return Err(AilyError::Config(
                            "discord enabled but DISCORD_BOT_TOKEN/DISCORD_CHANNEL_ID missing"
                                .into(),
                        ));
                    }
                }
                Platform::Slack => {
                    if self.slack_bot_token.is_none()
                        || self.slack_app_token.is_none()
                        || self.slack_channel_id.is_none()
                    {
                        return Err(AilyError::Config(
                            "slack enabled but SLACK_BOT_TOKEN/SLACK_APP_TOKEN/SLACK_CHANNEL_ID missing"
                                .into(),
                        ));
                    }
                }
            }
        }
        if let Some(raw) = &self.platforms {
            for token in raw.split(',').filter(|t| !t.trim().is_empty()) {
                token.parse::<Platform>()?;
            }
        }
        Ok(())
    }

    /// Enabled platforms: the explicit `PLATFORMS` list, else auto-detected
    /// from which credential sets are present.
    pub fn enabled_platforms(&self) -> Vec<Platform> {
        if let Some(raw) = &self.platforms {
            return raw
                .split(',')
                .filter_map(|t| t.parse::<Platform>().ok())
                .collect();
        }
        let mut auto = Vec::new();
        if self.discord_bot_token.is_some() {
            auto.push(Platform::Discord);
        }
        if self.slack_bot_token.is_some() {
            auto.push(Platform::Slack);
        }
        auto
    }

    /// Configured host fleet, in declaration order.
    pub fn hosts(&self) -> Vec<HostId> {
        self.ssh_hosts
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(HostId::from)
            .collect()
    }
}

impl Default for AilyConfig {
    fn default() -> Self {
        Self {
            platforms: None,
            discord_bot_token: None,
            discord_channel_id: None,
            slack_bot_token: None,
            slack_app_token: None,
            slack_channel_id: None,
            ssh_hosts: String::new(),
            thread_cleanup: ThreadCleanup::default(),
            tmux_thread_sync: true,
            notify_max_retries: default_notify_retries(),
            dashboard_token: None,
            poll_interval_ms: default_poll_interval_ms(),
            scrape_interval_ms: default_scrape_interval_ms(),
            idle_after_sec: default_idle_after_sec(),
            orphan_retain_hours: default_orphan_retain_hours(),
            database: DatabaseConfig::default(),
            gateway: GatewayConfig::default(),
            backup: BackupConfig::default(),
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_notify_retries() -> u32 {
    2
}
fn default_poll_interval_ms() -> u64 {
    10_000
}
fn default_scrape_interval_ms() -> u64 {
    3_000
}
fn default_idle_after_sec() -> u64 {
    900
}
fn default_orphan_retain_hours() -> u64 {
    24
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.aily/aily.db")
}
fn default_backup_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.aily/backups")
}
fn default_backup_interval_hours() -> u64 {
    6
}
fn default_backup_retain_days() -> u64 {
    7
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.aily/aily.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = AilyConfig::default();
        assert_eq!(cfg.notify_max_retries, 2);
        assert_eq!(cfg.poll_interval_ms, 10_000);
        assert_eq!(cfg.scrape_interval_ms, 3_000);
        assert_eq!(cfg.idle_after_sec, 900);
        assert_eq!(cfg.orphan_retain_hours, 24);
        assert!(cfg.tmux_thread_sync);
        assert_eq!(cfg.thread_cleanup, ThreadCleanup::Archive);
    }

    #[test]
    fn platforms_auto_detect_from_tokens() {
        let cfg = AilyConfig {
            discord_bot_token: Some("t".into()),
            ..Default::default()
        };
        assert_eq!(cfg.enabled_platforms(), vec![Platform::Discord]);

        let both = AilyConfig {
            discord_bot_token: Some("t".into()),
            slack_bot_token: Some("x".into()),
            ..Default::default()
        };
        assert_eq!(
            both.enabled_platforms(),
            vec![Platform::Discord, Platform::Slack]
        );
    }

    #[test]
    fn explicit_platform_list_wins() {
        let cfg = AilyConfig {
            platforms: Some("slack".into()),
            discord_bot_token: Some("t".into()),
            slack_bot_token: Some("x".into()),
            slack_app_token: Some("x".into()),
            slack_channel_id: Some("C1".into()),
            ..Default::default()
        };
        assert_eq!(cfg.enabled_platforms(), vec![Platform::Slack]);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_credentials_fail_validation() {
        let cfg = AilyConfig {
            platforms: Some("discord".into()),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn hosts_parse_comma_list() {
        let cfg = AilyConfig {
            ssh_hosts: "dev, build-1 ,".into(),
            ..Default::default()
        };
        assert_eq!(cfg.hosts(), vec![HostId::from("dev"), HostId::from("build-1")]);
    }
}
