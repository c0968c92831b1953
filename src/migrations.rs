use std::collections::HashSet;

use crate::db::DbPool;
use crate::error::Result;

pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            name: "001_initial_schema",
            sql: "-- local_storage is created by init_db, this only stamps the schema version
                  PRAGMA user_version = 1;",
        },
        Migration {
            name: "002_local_storage_updated_index",
            sql: "CREATE INDEX IF NOT EXISTS idx_local_storage_updated
                      ON local_storage(updated_at);",
        },
    ]
}

pub fn run_pending(pool: &DbPool) -> Result<Vec<String>> {
    let conn = pool.get()?;
    let applied_set: HashSet<String> = conn
        .prepare("SELECT name FROM migrations ORDER BY id")?
        .query_map([], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();

    let mut newly_applied = Vec::new();

    for migration in all_migrations() {
        if !applied_set.contains(migration.name) {
            conn.execute_batch(migration.sql)?;
            conn.execute("INSERT INTO migrations (name) VALUES (?1)", [migration.name])?;
            tracing::info!(name = migration.name, "Applied migration");
            newly_applied.push(migration.name.to_string());
        }
    }

    Ok(newly_applied)
}

pub fn applied(pool: &DbPool) -> Result<Vec<String>> {
    let conn = pool.get()?;
    let names: Vec<String> = conn
        .prepare("SELECT name FROM migrations ORDER BY id")?
        .query_map([], |row| row.get(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(names)
}
