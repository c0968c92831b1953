use crate::db::DbPool;
use crate::error::Result;

/// Durable string key-value store, the desktop stand-in for browser localStorage.
#[derive(Clone)]
pub struct LocalStorage {
    pool: DbPool,
}

impl LocalStorage {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn get_item(&self, key: &str) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        match conn.query_row(
            "SELECT value FROM local_storage WHERE key = ?1",
            [key],
            |row| row.get(0),
        ) {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert or overwrite; last write wins.
    pub fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO local_storage (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            [key, value],
        )?;
        Ok(())
    }

    pub fn remove_item(&self, key: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        let removed = conn.execute("DELETE FROM local_storage WHERE key = ?1", [key])?;
        Ok(removed > 0)
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT key FROM local_storage WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )?;
        let keys = stmt
            .query_map([prefix], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(keys)
    }

    #[cfg(test)]
    pub(crate) fn pool_for_tests(&self) -> &DbPool {
        &self.pool
    }
}
