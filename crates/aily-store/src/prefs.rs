use chrono::Utc;
use rusqlite::Connection;
use std::sync::Mutex;

use crate::error::{Result, StoreError};

/// Dashboard UI preferences: JSON blobs keyed by preference name, persisted
/// so a reload keeps the user's layout.
pub struct Preferences {
    db: Mutex<Connection>,
}

impl Preferences {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT value FROM preferences WHERE key = ?1",
            [key],
            |row| row.get::<_, String>(0),
        ) {
            Ok(raw) => Ok(serde_json::from_str(&raw).ok()),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// All preferences as one JSON object.
    pub fn get_all(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached("SELECT key, value FROM preferences ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut map = serde_json::Map::new();
        for (key, raw) in rows.filter_map(|r| r.ok()) {
            if let Ok(value) = serde_json::from_str(&raw) {
                map.insert(key, value);
            }
        }
        Ok(map)
    }

    pub fn put(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO preferences (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                           updated_at = excluded.updated_at",
            rusqlite::params![key, value.to_string(), now],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn put_get_round_trip() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        let prefs = Preferences::new(conn);

        prefs.put("theme", &json!({"mode": "dark"})).unwrap();
        prefs.put("theme", &json!({"mode": "light"})).unwrap();

        assert_eq!(prefs.get("theme").unwrap(), Some(json!({"mode": "light"})));
        assert_eq!(prefs.get("missing").unwrap(), None);
        assert_eq!(prefs.get_all().unwrap().len(), 1);
    }
}
