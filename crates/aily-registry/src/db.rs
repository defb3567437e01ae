use rusqlite::Connection;

use crate::error::Result;

/// Initialise the sessions table. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            name                 TEXT PRIMARY KEY,
            host                 TEXT,
            agent                TEXT NOT NULL,
            status               TEXT NOT NULL,
            created_at           TEXT NOT NULL,
            last_activity_at     TEXT NOT NULL,
            last_message_preview TEXT,
            log_path             TEXT,
            scrape_offset        INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_status
            ON sessions(status, last_activity_at DESC);",
    )?;
    Ok(())
}
