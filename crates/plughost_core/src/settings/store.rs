//! Persistence boundary for settings overrides.

use crate::db::{DbError, DbResult, SharedConnection};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use std::sync::PoisonError;

/// Storage engine behind user overrides.
///
/// The tree calls `save` after validation and before the in-memory value
/// changes, so a failed write leaves the previous value in place.
pub trait SettingsStore: Send + Sync {
    fn load(&self, path: &str) -> DbResult<Option<Value>>;
    fn save(&self, path: &str, value: &Value) -> DbResult<()>;
    fn remove(&self, path: &str) -> DbResult<()>;
}

/// SQLite-backed store using the `setting_overrides` table.
pub struct SqliteSettingsStore {
    conn: SharedConnection,
}

impl SqliteSettingsStore {
    /// Requires a connection opened through `open_db`/`open_db_in_memory`.
    pub fn new(conn: SharedConnection) -> Self {
        Self { conn }
    }
}

impl SettingsStore for SqliteSettingsStore {
    fn load(&self, path: &str) -> DbResult<Option<Value>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let raw = conn
            .query_row(
                "SELECT value_json FROM setting_overrides WHERE path = ?1",
                params![path],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        raw.map(|text| {
            serde_json::from_str(&text).map_err(|err| {
                DbError::InvalidData(format!("setting override `{path}` is not JSON: {err}"))
            })
        })
        .transpose()
    }

    fn save(&self, path: &str, value: &Value) -> DbResult<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO setting_overrides (path, value_json, updated_at)
             VALUES (?1, ?2, CAST(strftime('%s', 'now') AS INTEGER))
             ON CONFLICT(path) DO UPDATE SET
                value_json = excluded.value_json,
                updated_at = excluded.updated_at",
            params![path, value.to_string()],
        )?;
        Ok(())
    }

    fn remove(&self, path: &str) -> DbResult<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "DELETE FROM setting_overrides WHERE path = ?1",
            params![path],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{SettingsStore, SqliteSettingsStore};
    use crate::db::{open_db_in_memory, share};
    use serde_json::json;

    #[test]
    fn save_load_remove_roundtrip() {
        let store = SqliteSettingsStore::new(share(open_db_in_memory().expect("db")));
        assert_eq!(store.load("a.b.c").expect("load"), None);

        store.save("a.b.c", &json!(12)).expect("save");
        store.save("a.b.c", &json!(16)).expect("overwrite");
        assert_eq!(store.load("a.b.c").expect("load"), Some(json!(16)));

        store.remove("a.b.c").expect("remove");
        assert_eq!(store.load("a.b.c").expect("load"), None);
    }
}
