use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use aily_bus::EventBus;
use aily_core::status::{SessionStatus, StatusEvent};
use aily_core::types::HostId;
use aily_host::{HostError, HostExecutor};
use aily_registry::{ListFilter, Observation, SessionRegistry};

use crate::health::ComponentHealth;

/// Polls every configured host for its live session list and reconciles the
/// registry: new sessions register, recovered ones emit `ssh_seen`, vanished
/// ones emit `ssh_missing`, a dead host emits `host_down` for its sessions.
pub struct HostPoller {
    executor: Arc<HostExecutor>,
    registry: Arc<SessionRegistry>,
    health: ComponentHealth,
    interval: Duration,
}

impl HostPoller {
    pub fn new(
        executor: Arc<HostExecutor>,
        registry: Arc<SessionRegistry>,
        bus: Arc<EventBus>,
        interval_ms: u64,
    ) -> Self {
        Self {
            executor,
            registry,
            health: ComponentHealth::new("host_poller", bus),
            interval: Duration::from_millis(interval_ms),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "host poller started");
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => self.poll_all().await,
                _ = shutdown.cancelled() => break,
            }
        }
        info!("host poller stopped");
    }

    /// One reconcile pass over the whole fleet.
    pub async fn poll_all(&self) {
        let mut any_failed = false;
        for host in self.executor.hosts() {
            if let Err(e) = self.poll_host(&host).await {
                debug!(%host, error = %e, "poll failed");
                any_failed = true;
            }
        }
        if any_failed {
            self.health.failed();
        } else {
            self.health.ok();
        }
    }

    async fn poll_host(&self, host: &HostId) -> Result<(), HostError> {
        let live = match self.executor.list_sessions(host).await {
            Ok(live) => live,
            Err(e @ HostError::Unreachable { .. }) => {
                // every session previously seen on this host goes unreachable
                for session in self.sessions_on(host) {
                    self.registry.transition(&session.name, StatusEvent::HostDown);
                }
                return Err(e);
            }
            Err(e) => {
                warn!(%host, error = %e, "session listing failed");
                return Err(e);
            }
        };

        for name in &live {
            match self.registry.get(name) {
                None => {
                    let _ = self.registry.upsert(name, Observation::live_on(host.clone()));
                }
                Some(existing) => {
                    // ssh_seen recovers sessions that were not known-live;
                    // an already-live status is left alone so the idle
                    // sweeper's demotion sticks between messages
                    if matches!(
                        existing.status,
                        SessionStatus::Orphaned
                            | SessionStatus::Unreachable
                            | SessionStatus::Error
                    ) {
                        self.registry.transition(name, StatusEvent::SshSeen);
                    }
                    if existing.host.as_ref() != Some(host) {
                        let _ = self
                            .registry
                            .upsert(name, Observation::live_on(host.clone()));
                    }
                }
            }
        }

        for session in self.sessions_on(host) {
            if !live.contains(&session.name) {
                self.registry
                    .transition(&session.name, StatusEvent::SshMissing);
            }
        }
        Ok(())
    }

    fn sessions_on(&self, host: &HostId) -> Vec<aily_registry::Session> {
        self.registry.list(&ListFilter {
            host: Some(host.clone()),
            ..Default::default()
        })
    }
}
