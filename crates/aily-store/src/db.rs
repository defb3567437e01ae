use rusqlite::Connection;
use tracing::info;

use crate::error::{Result, StoreError};

/// Current schema version, stored in the `meta` sentinel row.
pub const SCHEMA_VERSION: i64 = 1;

/// Open a connection to the shared database file with the pragmas every
/// subsystem relies on (WAL for snapshot readers, busy timeout because
/// several subsystems hold their own connection to the same file).
pub fn open(path: &str) -> Result<Connection> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

/// Initialise message-store tables and the schema sentinel.
///
/// Safe to call on every startup; `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            session     TEXT NOT NULL,
            role        TEXT NOT NULL,
            source      TEXT NOT NULL,
            content     TEXT NOT NULL,
            ts          TEXT NOT NULL,
            external_id TEXT,
            dedup_key   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages(session, id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_dedup
            ON messages(session, dedup_key);

        CREATE TABLE IF NOT EXISTS thread_bindings (
            platform   TEXT NOT NULL,
            session    TEXT NOT NULL,
            thread_ref TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (platform, session)
        );
        CREATE INDEX IF NOT EXISTS idx_bindings_thread
            ON thread_bindings(platform, thread_ref);

        CREATE TABLE IF NOT EXISTS preferences (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )?;

    // FTS5 external-content table over message bodies; synced manually on
    // write since content is immutable after insertion.
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts
            USING fts5(content, content='messages', content_rowid='id');",
    )?;

    check_schema_version(conn)
}

fn check_schema_version(conn: &Connection) -> Result<()> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0),
        )
        .map(|v| v.parse().ok())
        .unwrap_or(None);

    match found {
        Some(v) if v > SCHEMA_VERSION => Err(StoreError::SchemaTooNew {
            found: v,
            supported: SCHEMA_VERSION,
        }),
        Some(v) if v == SCHEMA_VERSION => Ok(()),
        _ => {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = ?1",
                [SCHEMA_VERSION.to_string()],
            )?;
            info!(version = SCHEMA_VERSION, "schema sentinel written");
            Ok(())
        }
    }
}
