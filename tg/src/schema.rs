//! Schema migrations for the task graph database

use chrono::Utc;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::StoreResult;

struct Migration {
    version: &'static str,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: "001",
    name: "initial",
    sql: include_str!("migrations/001_initial.sql"),
}];

/// Apply all pending migrations inside one transaction per migration
pub fn run_migrations(conn: &mut Connection) -> StoreResult<()> {
    debug!("run_migrations: called");
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )?;

    let applied = applied_versions(conn)?;
    for migration in MIGRATIONS {
        if applied.iter().any(|v| v == migration.version) {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            (migration.version, migration.name, Utc::now().to_rfc3339()),
        )?;
        tx.commit()?;
        info!(version = migration.version, name = migration.name, "Applied migration");
    }
    Ok(())
}

fn applied_versions(conn: &Connection) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
    let versions = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(versions)
}
