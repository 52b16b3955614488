//! Schema migrations using PRAGMA user_version.

use rusqlite::Connection;

use crate::error::ExporterErrorKind;

const V001_INITIAL: &str = "
    CREATE TABLE IF NOT EXISTS jobs (
        job_path        TEXT PRIMARY KEY,
        enabled         INTEGER NOT NULL DEFAULT 1,
        last_seen_build INTEGER NOT NULL DEFAULT 0,
        last_sync_time  INTEGER,
        created_at      INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS job_changes (
        job_path   TEXT NOT NULL,
        action     TEXT NOT NULL,
        event_time INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_jobs_enabled ON jobs(enabled);
    CREATE INDEX IF NOT EXISTS idx_jobs_enabled_lastseen ON jobs(enabled, last_seen_build);
    CREATE INDEX IF NOT EXISTS idx_jobs_last_sync_time ON jobs(last_sync_time);
    CREATE INDEX IF NOT EXISTS idx_job_changes_time ON job_changes(event_time);
";

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), ExporterErrorKind> {
    let current_version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    let migrations: &[(&str, u32)] = &[(V001_INITIAL, 1)];

    for (sql, version) in migrations {
        if current_version < *version {
            conn.execute_batch(sql)?;
            conn.pragma_update(None, "user_version", version)?;
            tracing::info!(version, "applied catalogue migration");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);

        // Both tables exist and are queryable.
        conn.prepare("SELECT job_path FROM jobs").unwrap();
        conn.prepare("SELECT job_path, action, event_time FROM job_changes")
            .unwrap();
    }
}
