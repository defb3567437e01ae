use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use rusqlite::Connection;
use tracing::{debug, info, instrument};

use aily_bus::{Event, EventBus};
use aily_core::status::{self, SessionStatus, StatusEvent};
use aily_core::types::SessionName;

use crate::error::{RegistryError, Result};
use crate::types::{ListFilter, Observation, Session, SortOrder};

/// In-memory session table with write-through persistence.
///
/// The registry exclusively owns `Session` records: every mutation funnels
/// through it, and it is the only component that publishes session lifecycle
/// events on the bus.
pub struct SessionRegistry {
    sessions: DashMap<SessionName, Session>,
    db: Mutex<Connection>,
    bus: Arc<EventBus>,
}

impl SessionRegistry {
    /// Wrap an initialised connection and load all persisted sessions.
    pub fn load(conn: Connection, bus: Arc<EventBus>) -> Result<Self> {
        crate::db::init_db(&conn)?;

        let sessions = DashMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT name, host, agent, status, created_at, last_activity_at,
                        last_message_preview, log_path, scrape_offset
                 FROM sessions",
            )?;
            let rows = stmt.query_map([], row_to_session)?;
            for session in rows.filter_map(|r| r.ok()) {
                sessions.insert(session.name.clone(), session);
            }
        }
        info!(count = sessions.len(), "session registry loaded");

        Ok(Self {
            sessions,
            db: Mutex::new(conn),
            bus,
        })
    }

    /// Merge an observation. Creates the record on first sight (`active`
    /// when a live multiplexer session was seen, else `orphaned`); merges
    /// last-writer-wins per field otherwise, leaving `status` to the state
    /// machine.
    #[instrument(skip(self, obs), fields(session = %name))]
    pub fn upsert(&self, name: &SessionName, obs: Observation) -> Result<Session> {
        let mut created = false;

        let session = {
            let mut entry = self.sessions.entry(name.clone()).or_insert_with(|| {
                created = true;
                let now = Utc::now();
                Session {
                    name: name.clone(),
                    host: None,
                    agent: Default::default(),
                    status: if obs.seen_live {
                        SessionStatus::Active
                    } else {
                        SessionStatus::Orphaned
                    },
                    created_at: now,
                    last_activity_at: now,
                    last_message_preview: None,
                    log_path: None,
                    scrape_offset: 0,
                }
            });

            let s = entry.value_mut();
            if let Some(host) = obs.host {
                s.host = Some(host);
            }
            if let Some(agent) = obs.agent {
                s.agent = agent;
            }
            if let Some(preview) = obs.preview {
                s.last_message_preview = Some(preview);
                s.last_activity_at = Utc::now();
            }
            if let Some(log_path) = obs.log_path {
                s.log_path = Some(log_path);
            }
            s.clone()
        };

        self.persist(&session)?;
        if created {
            info!(status = %session.status, "session registered");
            self.bus.publish(Event::SessionCreated {
                session: name.clone(),
            });
        } else {
            self.bus.publish(Event::SessionUpdated {
                session: name.clone(),
            });
        }
        Ok(session)
    }

    pub fn get(&self, name: &SessionName) -> Option<Session> {
        self.sessions.get(name).map(|s| s.clone())
    }

    pub fn list(&self, filter: &ListFilter) -> Vec<Session> {
        let mut out: Vec<Session> = self
            .sessions
            .iter()
            .map(|e| e.value().clone())
            .filter(|s| filter.status.is_none_or(|st| s.status == st))
            .filter(|s| {
                filter
                    .host
                    .as_ref()
                    .is_none_or(|h| s.host.as_ref() == Some(h))
            })
            .collect();

        match filter.sort {
            SortOrder::RecentActivity => {
                out.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at))
            }
            SortOrder::Name => out.sort_by(|a, b| a.name.cmp(&b.name)),
            SortOrder::CreatedAt => out.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        out
    }

    /// Remove a session record entirely. The message log is owned by the
    /// store and cleaned up separately.
    pub fn delete(&self, name: &SessionName) -> Result<()> {
        let removed = self.sessions.remove(name).is_some();
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM sessions WHERE name = ?1", [name.as_str()])?;
        drop(db);
        if !removed && n == 0 {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        self.bus.publish(Event::SessionDeleted {
            session: name.clone(),
        });
        Ok(())
    }

    /// Run a status event through the state machine. Returns `(old, new)`
    /// when a transition happened; invalid or no-op events are logged and
    /// ignored.
    #[instrument(skip(self), fields(session = %name, event = %event))]
    pub fn transition(
        &self,
        name: &SessionName,
        event: StatusEvent,
    ) -> Option<(SessionStatus, SessionStatus)> {
        let (old, new, session) = {
            let mut entry = self.sessions.get_mut(name)?;
            let s = entry.value_mut();
            let old = s.status;
            let Some(new) = status::apply(old, event) else {
                debug!(status = %old, "status event ignored");
                return None;
            };
            s.status = new;
            if matches!(event, StatusEvent::MsgInbound | StatusEvent::SshSeen) {
                s.last_activity_at = Utc::now();
            }
            (old, new, s.clone())
        };

        if let Err(e) = self.persist(&session) {
            debug!(error = %e, "status persist failed");
        }
        info!(%old, %new, "session status changed");
        self.bus.publish(Event::SessionStatusChanged {
            session: name.clone(),
            old,
            new,
        });
        Some((old, new))
    }

    /// Attribute an operation failure to the session itself.
    pub fn set_error(&self, name: &SessionName) {
        self.force_status(name, SessionStatus::Error);
    }

    /// Sweeper entry: demote `active` sessions idle past the threshold.
    /// Returns the sessions demoted this pass.
    pub fn sweep_idle(&self, idle_after_secs: u64) -> Vec<SessionName> {
        let cutoff = Utc::now() - chrono::Duration::seconds(idle_after_secs as i64);
        let stale: Vec<SessionName> = self
            .sessions
            .iter()
            .filter(|e| e.value().status == SessionStatus::Active)
            .filter(|e| e.value().last_activity_at < cutoff)
            .map(|e| e.key().clone())
            .collect();

        for name in &stale {
            self.force_status(name, SessionStatus::Idle);
        }
        stale
    }

    /// Sessions orphaned for longer than the retention window.
    pub fn orphans_older_than(&self, hours: u64) -> Vec<SessionName> {
        let cutoff = Utc::now() - chrono::Duration::hours(hours as i64);
        self.sessions
            .iter()
            .filter(|e| e.value().status == SessionStatus::Orphaned)
            .filter(|e| e.value().last_activity_at < cutoff)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Record transcript scrape progress for a session.
    pub fn set_scrape_offset(&self, name: &SessionName, offset: i64) -> Result<()> {
        let session = {
            let mut entry = self
                .sessions
                .get_mut(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
            entry.value_mut().scrape_offset = offset;
            entry.value().clone()
        };
        self.persist(&session)
    }

    /// Counts by status (stats endpoint, sidebar counters).
    pub fn status_counts(&self) -> Vec<(SessionStatus, usize)> {
        let mut counts = std::collections::BTreeMap::new();
        for entry in self.sessions.iter() {
            *counts.entry(entry.value().status.to_string()).or_insert(0usize) += 1;
        }
        counts
            .into_iter()
            .filter_map(|(k, v)| k.parse::<SessionStatus>().ok().map(|s| (s, v)))
            .collect()
    }

    // --- private helpers ---------------------------------------------------

    fn force_status(&self, name: &SessionName, new: SessionStatus) {
        let changed = {
            let Some(mut entry) = self.sessions.get_mut(name) else {
                return;
            };
            let s = entry.value_mut();
            if s.status == new || s.status.is_terminal() {
                None
            } else {
                let old = s.status;
                s.status = new;
                Some((old, s.clone()))
            }
        };

        if let Some((old, session)) = changed {
            if let Err(e) = self.persist(&session) {
                debug!(error = %e, "status persist failed");
            }
            self.bus.publish(Event::SessionStatusChanged {
                session: name.clone(),
                old,
                new,
            });
        }
    }

    fn persist(&self, s: &Session) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO sessions
             (name, host, agent, status, created_at, last_activity_at,
              last_message_preview, log_path, scrape_offset)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(name) DO UPDATE SET
                host = excluded.host,
                agent = excluded.agent,
                status = excluded.status,
                last_activity_at = excluded.last_activity_at,
                last_message_preview = excluded.last_message_preview,
                log_path = excluded.log_path,
                scrape_offset = excluded.scrape_offset",
            rusqlite::params![
                s.name.as_str(),
                s.host.as_ref().map(|h| h.as_str()),
                s.agent.to_string(),
                s.status.to_string(),
                s.created_at.to_rfc3339(),
                s.last_activity_at.to_rfc3339(),
                s.last_message_preview,
                s.log_path,
                s.scrape_offset,
            ],
        )?;
        Ok(())
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let name_str: String = row.get(0)?;
    let host: Option<String> = row.get(1)?;
    let agent_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let created: String = row.get(4)?;
    let activity: String = row.get(5)?;

    Ok(Session {
        name: SessionName::parse(&name_str)
            .unwrap_or_else(|_| SessionName::parse("unknown").unwrap()),
        host: host.map(aily_core::types::HostId),
        agent: agent_str.parse().unwrap_or_default(),
        status: status_str.parse().unwrap_or(SessionStatus::Orphaned),
        created_at: created.parse().unwrap_or_else(|_| Utc::now()),
        last_activity_at: activity.parse().unwrap_or_else(|_| Utc::now()),
        last_message_preview: row.get(6)?,
        log_path: row.get(7)?,
        scrape_offset: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use aily_core::types::HostId;

    fn registry() -> SessionRegistry {
        let conn = Connection::open_in_memory().unwrap();
        SessionRegistry::load(conn, Arc::new(EventBus::new())).unwrap()
    }

    fn name(s: &str) -> SessionName {
        SessionName::parse(s).unwrap()
    }

    #[test]
    fn first_live_observation_is_active() {
        let reg = registry();
        let s = reg
            .upsert(&name("s1"), Observation::live_on(HostId::from("dev")))
            .unwrap();
        assert_eq!(s.status, SessionStatus::Active);
        assert_eq!(s.host, Some(HostId::from("dev")));
    }

    #[test]
    fn platform_only_observation_is_orphaned() {
        let reg = registry();
        let s = reg.upsert(&name("ghost"), Observation::from_platform()).unwrap();
        assert_eq!(s.status, SessionStatus::Orphaned);
        assert_eq!(s.host, None);
    }

    #[test]
    fn merge_is_last_writer_wins_per_field() {
        let reg = registry();
        reg.upsert(&name("s"), Observation::live_on(HostId::from("a"))).unwrap();
        let merged = reg
            .upsert(
                &name("s"),
                Observation {
                    host: Some(HostId::from("b")),
                    preview: Some("hi".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(merged.host, Some(HostId::from("b")));
        assert_eq!(merged.last_message_preview.as_deref(), Some("hi"));
        // status untouched by plain merges
        assert_eq!(merged.status, SessionStatus::Active);
    }

    #[test]
    fn transition_follows_state_machine() {
        let reg = registry();
        reg.upsert(&name("s"), Observation::live_on(HostId::from("h"))).unwrap();

        let (old, new) = reg.transition(&name("s"), StatusEvent::AskQuestion).unwrap();
        assert_eq!((old, new), (SessionStatus::Active, SessionStatus::Waiting));

        // invalid/no-op event is ignored, not an error
        assert!(reg.transition(&name("s"), StatusEvent::AskQuestion).is_none());

        reg.transition(&name("s"), StatusEvent::LifecycleClose).unwrap();
        // archived is terminal
        assert!(reg.transition(&name("s"), StatusEvent::SshSeen).is_none());
    }

    #[test]
    fn delete_removes_record() {
        let reg = registry();
        reg.upsert(&name("s"), Observation::live_on(HostId::from("h"))).unwrap();
        reg.delete(&name("s")).unwrap();
        assert!(reg.get(&name("s")).is_none());
        assert!(reg.delete(&name("s")).is_err());
    }

    #[test]
    fn sweep_idle_demotes_stale_active() {
        let reg = registry();
        reg.upsert(&name("s"), Observation::live_on(HostId::from("h"))).unwrap();
        // nothing is stale yet
        assert!(reg.sweep_idle(900).is_empty());
        // zero-threshold sweep demotes immediately
        let demoted = reg.sweep_idle(0);
        assert_eq!(demoted, vec![name("s")]);
        assert_eq!(reg.get(&name("s")).unwrap().status, SessionStatus::Idle);
    }

    #[test]
    fn registry_reloads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aily.db");
        let bus = Arc::new(EventBus::new());

        {
            let conn = Connection::open(&path).unwrap();
            let reg = SessionRegistry::load(conn, bus.clone()).unwrap();
            reg.upsert(&name("persisted"), Observation::live_on(HostId::from("h")))
                .unwrap();
        }

        let conn = Connection::open(&path).unwrap();
        let reg = SessionRegistry::load(conn, bus).unwrap();
        let s = reg.get(&name("persisted")).unwrap();
        assert_eq!(s.status, SessionStatus::Active);
    }
}
