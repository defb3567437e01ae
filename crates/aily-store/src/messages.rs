use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::instrument;

use aily_core::types::{MessageRole, MessageSource, SessionName};

use crate::error::{Result, StoreError};
use crate::writer::{AppendRequest, MessageWriter, WRITE_QUEUE_DEPTH};

/// A message to append. `external_id` drives dedup when present; otherwise a
/// content-hash fallback key suppresses near-duplicate optimistic echoes
/// within a one-second bucket.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub session: SessionName,
    pub role: MessageRole,
    pub source: MessageSource,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub external_id: Option<String>,
}

impl NewMessage {
    pub(crate) fn dedup_key(&self) -> String {
        match &self.external_id {
            Some(ext) => format!("x:{ext}"),
            None => {
                let mut hasher = Sha256::new();
                hasher.update(self.content.as_bytes());
                let hash = hex::encode(hasher.finalize());
                let bucket = self.timestamp.timestamp();
                format!("h:{}:{}:{}:{}", self.role, self.source, &hash[..32], bucket)
            }
        }
    }
}

/// A persisted message row.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: i64,
    pub session: SessionName,
    pub role: MessageRole,
    pub source: MessageSource,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended(i64),
    /// Dedup suppressed the write; silently absorbed by callers.
    Duplicate,
}

/// One page of a session's log, newest first.
#[derive(Debug, Serialize)]
pub struct MessagePage {
    pub messages: Vec<StoredMessage>,
    pub total: i64,
}

/// A full-text search result with a snippet around the match.
#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub message: StoredMessage,
    pub snippet: String,
}

/// Reader handle plus the append funnel into the single writer task.
pub struct MessageStore {
    read_conn: Mutex<Connection>,
    append_tx: mpsc::Sender<AppendRequest>,
}

impl MessageStore {
    /// Open the store on `path`. Returns the store and the writer task; the
    /// caller spawns [`MessageWriter::run`] and keeps the handle for shutdown.
    pub fn open(path: &str) -> Result<(Self, MessageWriter)> {
        let read_conn = crate::db::open(path)?;
        crate::db::init_db(&read_conn)?;

        let write_conn = crate::db::open(path)?;
        let (append_tx, append_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);

        Ok((
            Self {
                read_conn: Mutex::new(read_conn),
                append_tx,
            },
            MessageWriter::new(write_conn, append_rx),
        ))
    }

    /// Append a message. Resolves once the writer has committed the batch
    /// containing it (or decided it is a duplicate).
    #[instrument(skip(self, msg), fields(session = %msg.session))]
    pub async fn append(&self, msg: NewMessage) -> Result<AppendOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.append_tx
            .send(AppendRequest {
                msg,
                reply: reply_tx,
            })
            .await
            .map_err(|_| StoreError::Closed)?;
        reply_rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Page a session's log, newest first. Offset form for classical
    /// pagination; pass `before_id` instead for cursor streaming.
    pub fn page(
        &self,
        session: &SessionName,
        limit: usize,
        offset: usize,
        before_id: Option<i64>,
    ) -> Result<MessagePage> {
        let conn = self.read_conn.lock().unwrap();
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session = ?1",
            [session.as_str()],
            |row| row.get(0),
        )?;

        let mut messages = match before_id {
            Some(cursor) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, session, role, source, content, ts, external_id
                     FROM messages
                     WHERE session = ?1 AND id < ?2
                     ORDER BY ts DESC, id DESC
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![session.as_str(), cursor, limit as i64],
                    row_to_message,
                )?;
                rows.filter_map(|r| r.ok()).collect::<Vec<_>>()
            }
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, session, role, source, content, ts, external_id
                     FROM messages
                     WHERE session = ?1
                     ORDER BY ts DESC, id DESC
                     LIMIT ?2 OFFSET ?3",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![session.as_str(), limit as i64, offset as i64],
                    row_to_message,
                )?;
                rows.filter_map(|r| r.ok()).collect::<Vec<_>>()
            }
        };
        // keep serialisation order stable regardless of cursor vs offset
        messages.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));

        Ok(MessagePage { messages, total })
    }

    /// Full-text search over message content, optionally scoped to a session.
    pub fn search(
        &self,
        session: Option<&SessionName>,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let conn = self.read_conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(
            "SELECT m.id, m.session, m.role, m.source, m.content, m.ts, m.external_id,
                    snippet(messages_fts, 0, '[', ']', '…', 12)
             FROM messages m
             JOIN messages_fts f ON m.id = f.rowid
             WHERE messages_fts MATCH ?1
               AND (?2 IS NULL OR m.session = ?2)
             ORDER BY rank
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![query, session.map(|s| s.as_str()), limit as i64],
            |row| {
                Ok(SearchHit {
                    message: row_to_message(row)?,
                    snippet: row.get(7)?,
                })
            },
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Whether a message with this `external_id` already exists for the
    /// session (scraper fast path, avoids queueing a doomed append).
    pub fn has_external_id(&self, session: &SessionName, external_id: &str) -> Result<bool> {
        let conn = self.read_conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session = ?1 AND dedup_key = ?2",
            rusqlite::params![session.as_str(), format!("x:{external_id}")],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Most recent message for a session, if any (preview rendering).
    pub fn last_message(&self, session: &SessionName) -> Result<Option<StoredMessage>> {
        let conn = self.read_conn.lock().unwrap();
        match conn.query_row(
            "SELECT id, session, role, source, content, ts, external_id
             FROM messages WHERE session = ?1
             ORDER BY ts DESC, id DESC LIMIT 1",
            [session.as_str()],
            row_to_message,
        ) {
            Ok(m) => Ok(Some(m)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Total stored messages (stats endpoint).
    pub fn count_all(&self) -> Result<i64> {
        let conn = self.read_conn.lock().unwrap();
        Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
    }

    /// Delete a session's log and its FTS rows. Used by bulk delete with the
    /// `delete` cleanup policy; archived sessions normally keep their log.
    pub fn delete_session(&self, session: &SessionName) -> Result<usize> {
        let conn = self.read_conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages_fts(messages_fts, rowid, content)
             SELECT 'delete', id, content FROM messages WHERE session = ?1",
            [session.as_str()],
        )?;
        let n = conn.execute("DELETE FROM messages WHERE session = ?1", [session.as_str()])?;
        Ok(n)
    }
}

pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let session_str: String = row.get(1)?;
    let role_str: String = row.get(2)?;
    let source_str: String = row.get(3)?;
    let ts_str: String = row.get(5)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        session: SessionName::parse(&session_str).unwrap_or_else(|_| {
            // a malformed name can only come from hand-edited storage
            SessionName::parse("unknown").unwrap()
        }),
        role: role_str.parse().unwrap_or(MessageRole::System),
        source: source_str.parse().unwrap_or(MessageSource::Hook),
        content: row.get(4)?,
        timestamp: ts_str
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now()),
        external_id: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn name(s: &str) -> SessionName {
        SessionName::parse(s).unwrap()
    }

    fn msg(session: &str, content: &str, external_id: Option<&str>) -> NewMessage {
        NewMessage {
            session: name(session),
            role: MessageRole::Assistant,
            source: MessageSource::Hook,
            content: content.to_string(),
            timestamp: Utc::now(),
            external_id: external_id.map(String::from),
        }
    }

    async fn open_store() -> (MessageStore, CancellationToken, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aily.db");
        let (store, writer) = MessageStore::open(path.to_str().unwrap()).unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(writer.run(token));
        (store, shutdown, dir)
    }

    #[tokio::test]
    async fn append_assigns_increasing_ids() {
        let (store, _stop, _dir) = open_store().await;
        let a = store.append(msg("s", "one", Some("e1"))).await.unwrap();
        let b = store.append(msg("s", "two", Some("e2"))).await.unwrap();
        match (a, b) {
            (AppendOutcome::Appended(ia), AppendOutcome::Appended(ib)) => assert!(ib > ia),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn external_id_dedup_within_session() {
        let (store, _stop, _dir) = open_store().await;
        assert!(matches!(
            store.append(msg("s", "done", Some("dup1"))).await.unwrap(),
            AppendOutcome::Appended(_)
        ));
        assert!(matches!(
            store.append(msg("s", "done", Some("dup1"))).await.unwrap(),
            AppendOutcome::Duplicate
        ));
        // same external id in a different session is a different message
        assert!(matches!(
            store.append(msg("t", "done", Some("dup1"))).await.unwrap(),
            AppendOutcome::Appended(_)
        ));
    }

    #[tokio::test]
    async fn content_hash_fallback_suppresses_echo() {
        let (store, _stop, _dir) = open_store().await;
        let ts = Utc::now();
        let mut first = msg("s", "restart", None);
        first.timestamp = ts;
        let mut echo = msg("s", "restart", None);
        echo.timestamp = ts;

        assert!(matches!(
            store.append(first).await.unwrap(),
            AppendOutcome::Appended(_)
        ));
        assert!(matches!(
            store.append(echo).await.unwrap(),
            AppendOutcome::Duplicate
        ));
    }

    #[tokio::test]
    async fn paging_is_newest_first_with_total() {
        let (store, _stop, _dir) = open_store().await;
        for i in 0..5 {
            store
                .append(msg("s", &format!("m{i}"), Some(&format!("e{i}"))))
                .await
                .unwrap();
        }
        let page = store.page(&name("s"), 2, 0, None).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.messages[0].content, "m4");

        let next = store.page(&name("s"), 2, 2, None).unwrap();
        assert_eq!(next.messages[0].content, "m2");
    }

    #[tokio::test]
    async fn cursor_paging_walks_backward() {
        let (store, _stop, _dir) = open_store().await;
        for i in 0..4 {
            store
                .append(msg("s", &format!("m{i}"), Some(&format!("e{i}"))))
                .await
                .unwrap();
        }
        let first = store.page(&name("s"), 2, 0, None).unwrap();
        let cursor = first.messages.last().unwrap().id;
        let rest = store.page(&name("s"), 10, 0, Some(cursor)).unwrap();
        assert_eq!(rest.messages.len(), 2);
        assert!(rest.messages.iter().all(|m| m.id < cursor));
    }

    #[tokio::test]
    async fn search_returns_snippets() {
        let (store, _stop, _dir) = open_store().await;
        store
            .append(msg("s", "the deploy finished without errors", Some("e1")))
            .await
            .unwrap();
        store
            .append(msg("t", "unrelated chatter", Some("e2")))
            .await
            .unwrap();

        let hits = store.search(None, "deploy", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.contains("[deploy]"));

        let scoped = store.search(Some(&name("t")), "deploy", 10).unwrap();
        assert!(scoped.is_empty());
    }
}
