use chrono::Utc;
use rusqlite::Connection;
use std::sync::Mutex;
use tracing::{debug, info};

use aily_core::types::{Platform, SessionName, ThreadRef};

use crate::error::{Result, StoreError};

/// Persisted `(platform, session) → thread_ref` map. Created on first
/// outbound post or explicit lifecycle event, rebound when the canonical
/// thread is discovered elsewhere, cleared under the `delete` policy.
pub struct ThreadBindings {
    db: Mutex<Connection>,
}

impl ThreadBindings {
    /// Wrap an already-initialised connection (see [`crate::db::init_db`]).
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    /// Create or replace the binding for a session on one platform.
    pub fn bind(
        &self,
        platform: Platform,
        session: &SessionName,
        thread: &ThreadRef,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let replaced = db.execute(
            "INSERT INTO thread_bindings (platform, session, thread_ref, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(platform, session)
             DO UPDATE SET thread_ref = excluded.thread_ref",
            rusqlite::params![platform.to_string(), session.as_str(), thread.as_str(), now],
        )?;
        if replaced > 0 {
            info!(%platform, %session, thread = %thread, "thread bound");
        }
        Ok(())
    }

    /// Thread for a session on a platform, if bound.
    pub fn lookup(&self, platform: Platform, session: &SessionName) -> Result<Option<ThreadRef>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT thread_ref FROM thread_bindings WHERE platform = ?1 AND session = ?2",
            rusqlite::params![platform.to_string(), session.as_str()],
            |row| row.get::<_, String>(0),
        ) {
            Ok(t) => Ok(Some(ThreadRef(t))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Reverse lookup: which session does this thread belong to?
    pub fn resolve(&self, platform: Platform, thread: &ThreadRef) -> Result<Option<SessionName>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT session FROM thread_bindings WHERE platform = ?1 AND thread_ref = ?2",
            rusqlite::params![platform.to_string(), thread.as_str()],
            |row| row.get::<_, String>(0),
        ) {
            Ok(s) => Ok(SessionName::parse(&s).ok()),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Remove one platform's binding for a session (`delete` cleanup policy).
    pub fn clear(&self, platform: Platform, session: &SessionName) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM thread_bindings WHERE platform = ?1 AND session = ?2",
            rusqlite::params![platform.to_string(), session.as_str()],
        )?;
        if n > 0 {
            debug!(%platform, %session, "thread binding cleared");
        }
        Ok(())
    }

    /// Remove every binding for a session across platforms.
    pub fn clear_session(&self, session: &SessionName) -> Result<usize> {
        let db = self.db.lock().unwrap();
        Ok(db.execute(
            "DELETE FROM thread_bindings WHERE session = ?1",
            [session.as_str()],
        )?)
    }

    /// All bindings for a session, ordered by platform name.
    pub fn for_session(&self, session: &SessionName) -> Result<Vec<(Platform, ThreadRef)>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(
            "SELECT platform, thread_ref FROM thread_bindings
             WHERE session = ?1 ORDER BY platform",
        )?;
        let rows = stmt.query_map([session.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows
            .filter_map(|r| r.ok())
            .filter_map(|(p, t)| p.parse::<Platform>().ok().map(|p| (p, ThreadRef(t))))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings() -> ThreadBindings {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        ThreadBindings::new(conn)
    }

    fn name(s: &str) -> SessionName {
        SessionName::parse(s).unwrap()
    }

    #[test]
    fn bind_and_resolve_round_trip() {
        let b = bindings();
        let s = name("s1");
        b.bind(Platform::Discord, &s, &ThreadRef("111".into())).unwrap();

        assert_eq!(
            b.lookup(Platform::Discord, &s).unwrap(),
            Some(ThreadRef("111".into()))
        );
        assert_eq!(
            b.resolve(Platform::Discord, &ThreadRef("111".into())).unwrap(),
            Some(s.clone())
        );
        // other platform unaffected
        assert_eq!(b.lookup(Platform::Slack, &s).unwrap(), None);
    }

    #[test]
    fn rebind_replaces_thread() {
        let b = bindings();
        let s = name("s1");
        b.bind(Platform::Slack, &s, &ThreadRef("1.0".into())).unwrap();
        b.bind(Platform::Slack, &s, &ThreadRef("2.0".into())).unwrap();
        assert_eq!(
            b.lookup(Platform::Slack, &s).unwrap(),
            Some(ThreadRef("2.0".into()))
        );
    }

    #[test]
    fn clear_session_removes_all_platforms() {
        let b = bindings();
        let s = name("s1");
        b.bind(Platform::Discord, &s, &ThreadRef("111".into())).unwrap();
        b.bind(Platform::Slack, &s, &ThreadRef("1.0".into())).unwrap();
        assert_eq!(b.clear_session(&s).unwrap(), 2);
        assert!(b.for_session(&s).unwrap().is_empty());
    }
}
