//! Durable job catalogue backed by SQLite.
//!
//! The catalogue is the bridge between the discovery and collection
//! halves of the pipeline: discovery reconciles the observed job set into
//! it, the collector reads the enabled set back out and advances each
//! job's `last_seen_build` cursor. An append-only `job_changes` table
//! records every add and soft-delete.
//!
//! Exactly one writer connection exists per process; every operation
//! serializes on it.

mod migrations;

use std::{
    collections::HashSet,
    path::Path,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use crate::error::ExporterErrorKind;

/// A job row in the catalogue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    /// Full slash-separated path, as Jenkins reports it.
    pub job_path: String,
    /// False after the job disappeared from a discovery scan.
    pub enabled: bool,
    /// Highest build number a metric has been published for.
    pub last_seen_build: i64,
    /// Unix seconds of the last discovery touch.
    pub last_sync_time: Option<i64>,
    /// Unix seconds of the first observation.
    pub created_at: i64,
}

/// Outcome counts of one [`Catalogue::sync_jobs`] transaction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncCounts {
    /// Newly inserted or resurrected rows.
    pub added: usize,
    /// Enabled rows soft-deleted because they were not observed.
    pub deleted: usize,
    /// Live rows whose `last_sync_time` was bumped.
    pub touched: usize,
}

/// Handle to the catalogue database. Cheap to clone; all clones share the
/// single writer connection.
#[derive(Debug, Clone)]
pub struct Catalogue {
    conn: Arc<Mutex<Connection>>,
}

impl Catalogue {
    /// Open (creating if needed) the catalogue at the given path, apply
    /// pragmas, and run migrations.
    pub fn open(path: &Path) -> Result<Self, ExporterErrorKind> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::init(conn, Some(path))
    }

    /// Open an in-memory catalogue. Used by tests.
    pub fn open_in_memory() -> Result<Self, ExporterErrorKind> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<&Path>) -> Result<Self, ExporterErrorKind> {
        apply_pragmas(&conn)?;
        migrations::run_migrations(&conn)?;

        if let Some(path) = path {
            info!(path = %path.display(), "job catalogue ready");
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Snapshot of all enabled jobs, ordered by path.
    pub fn list_enabled_jobs(&self) -> Result<Vec<JobRecord>, ExporterErrorKind> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT job_path, enabled, last_seen_build, last_sync_time, created_at
             FROM jobs
             WHERE enabled = 1
             ORDER BY job_path",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(JobRecord {
                job_path: row.get(0)?,
                enabled: row.get::<_, i64>(1)? != 0,
                last_seen_build: row.get(2)?,
                last_sync_time: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;

        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?);
        }
        Ok(jobs)
    }

    /// Record the highest build number published for a job.
    ///
    /// A missing row is logged and ignored; discovery owns row lifecycle.
    pub fn update_last_seen(
        &self,
        job_path: &str,
        build_number: i64,
    ) -> Result<(), ExporterErrorKind> {
        let conn = self.lock();
        let affected = conn.execute(
            "UPDATE jobs SET last_seen_build = ?1 WHERE job_path = ?2",
            params![build_number, job_path],
        )?;

        if affected == 0 {
            warn!(job_path, "update_last_seen found no catalogue row");
        }

        Ok(())
    }

    /// Reconcile the observed job set into the catalogue in one
    /// transaction: insert unseen paths (emitting an `ADD` audit row),
    /// resurrect soft-deleted rows that reappeared (fresh `ADD`), bump
    /// `last_sync_time` on live rows, and soft-delete enabled rows that
    /// were not observed (emitting `DELETE`).
    pub fn sync_jobs(&self, observed: &HashSet<String>) -> Result<SyncCounts, ExporterErrorKind> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let now = now_unix();
        let mut counts = SyncCounts::default();

        for job_path in observed {
            let enabled: Option<i64> = tx
                .query_row(
                    "SELECT enabled FROM jobs WHERE job_path = ?1",
                    params![job_path],
                    |row| row.get(0),
                )
                .optional()?;

            match enabled {
                None => {
                    tx.execute(
                        "INSERT INTO jobs(job_path, enabled, last_seen_build, last_sync_time, created_at)
                         VALUES (?1, 1, 0, ?2, ?2)",
                        params![job_path, now],
                    )?;
                    record_change(&tx, job_path, "ADD", now)?;
                    counts.added += 1;
                }
                Some(0) => {
                    // The job came back after a soft-delete: reuse the row.
                    tx.execute(
                        "UPDATE jobs SET enabled = 1, last_sync_time = ?1 WHERE job_path = ?2",
                        params![now, job_path],
                    )?;
                    record_change(&tx, job_path, "ADD", now)?;
                    counts.added += 1;
                    debug!(job_path = %job_path, "resurrected soft-deleted job");
                }
                Some(_) => {
                    tx.execute(
                        "UPDATE jobs SET last_sync_time = ?1 WHERE job_path = ?2",
                        params![now, job_path],
                    )?;
                    counts.touched += 1;
                }
            }
        }

        let vanished: Vec<String> = {
            let mut stmt = tx.prepare("SELECT job_path FROM jobs WHERE enabled = 1")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut vanished = Vec::new();
            for row in rows {
                let job_path = row?;
                if !observed.contains(&job_path) {
                    vanished.push(job_path);
                }
            }
            vanished
        };

        for job_path in &vanished {
            tx.execute(
                "UPDATE jobs SET enabled = 0 WHERE job_path = ?1",
                params![job_path],
            )?;
            record_change(&tx, job_path, "DELETE", now)?;
            counts.deleted += 1;
        }

        tx.commit()?;
        Ok(counts)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("catalogue writer lock poisoned")
    }

    #[cfg(test)]
    fn change_log(&self) -> Vec<(String, String)> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT job_path, action FROM job_changes ORDER BY rowid")
            .unwrap();
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .map(Result::unwrap)
            .collect()
    }
}

fn record_change(
    tx: &rusqlite::Transaction<'_>,
    job_path: &str,
    action: &str,
    event_time: i64,
) -> Result<(), ExporterErrorKind> {
    tx.execute(
        "INSERT INTO job_changes(job_path, action, event_time) VALUES (?1, ?2, ?3)",
        params![job_path, action, event_time],
    )?;
    Ok(())
}

/// Pragmas for the single writer connection: durable but not
/// fsync-per-commit.
fn apply_pragmas(conn: &Connection) -> Result<(), ExporterErrorKind> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
        PRAGMA busy_timeout = 5000;
        ",
    )?;
    Ok(())
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed(paths: &[&str]) -> HashSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn first_sync_inserts_jobs_with_add_audit() {
        let catalogue = Catalogue::open_in_memory().unwrap();

        let counts = catalogue
            .sync_jobs(&observed(&["release/api", "release/web"]))
            .unwrap();
        assert_eq!(
            counts,
            SyncCounts {
                added: 2,
                deleted: 0,
                touched: 0
            }
        );

        let jobs = catalogue.list_enabled_jobs().unwrap();
        assert_eq!(jobs.len(), 2);
        // Ordered by path.
        assert_eq!(jobs[0].job_path, "release/api");
        assert_eq!(jobs[1].job_path, "release/web");
        assert_eq!(jobs[0].last_seen_build, 0);
        assert!(jobs[0].last_sync_time.is_some());

        let changes = catalogue.change_log();
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|(_, action)| action == "ADD"));
    }

    #[test]
    fn unchanged_resync_only_touches() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        let jobs = observed(&["release/api", "release/web"]);

        catalogue.sync_jobs(&jobs).unwrap();
        let counts = catalogue.sync_jobs(&jobs).unwrap();

        assert_eq!(
            counts,
            SyncCounts {
                added: 0,
                deleted: 0,
                touched: 2
            }
        );
        // No new audit rows beyond the two initial ADDs.
        assert_eq!(catalogue.change_log().len(), 2);
    }

    #[test]
    fn vanished_job_is_soft_deleted_with_delete_audit() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        catalogue
            .sync_jobs(&observed(&["release/api", "release/web"]))
            .unwrap();

        let counts = catalogue.sync_jobs(&observed(&["release/api"])).unwrap();
        assert_eq!(counts.deleted, 1);
        assert_eq!(counts.touched, 1);

        let jobs = catalogue.list_enabled_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_path, "release/api");

        let changes = catalogue.change_log();
        // ADD appears before the DELETE for the same path.
        let add_idx = changes
            .iter()
            .position(|c| c == &("release/web".to_string(), "ADD".to_string()))
            .unwrap();
        let delete_idx = changes
            .iter()
            .position(|c| c == &("release/web".to_string(), "DELETE".to_string()))
            .unwrap();
        assert!(add_idx < delete_idx);
    }

    #[test]
    fn empty_observed_set_soft_deletes_everything() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        catalogue
            .sync_jobs(&observed(&["release/api", "release/web"]))
            .unwrap();

        let counts = catalogue.sync_jobs(&HashSet::new()).unwrap();
        assert_eq!(counts.deleted, 2);
        assert!(catalogue.list_enabled_jobs().unwrap().is_empty());
    }

    #[test]
    fn reappearing_job_is_resurrected_in_place() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        catalogue.sync_jobs(&observed(&["release/api"])).unwrap();
        catalogue.update_last_seen("release/api", 42).unwrap();

        catalogue.sync_jobs(&HashSet::new()).unwrap();
        let counts = catalogue.sync_jobs(&observed(&["release/api"])).unwrap();
        assert_eq!(counts.added, 1);

        let jobs = catalogue.list_enabled_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        // Same row: the build cursor survived the disable/enable round trip.
        assert_eq!(jobs[0].last_seen_build, 42);

        let changes = catalogue.change_log();
        let actions: Vec<&str> = changes.iter().map(|(_, action)| action.as_str()).collect();
        assert_eq!(actions, vec!["ADD", "DELETE", "ADD"]);
    }

    #[test]
    fn update_last_seen_ignores_missing_rows() {
        let catalogue = Catalogue::open_in_memory().unwrap();
        catalogue.update_last_seen("ghost", 7).unwrap();
        assert!(catalogue.list_enabled_jobs().unwrap().is_empty());
    }

    #[test]
    fn catalogue_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalogue.db");

        {
            let catalogue = Catalogue::open(&path).unwrap();
            catalogue.sync_jobs(&observed(&["release/api"])).unwrap();
            catalogue.update_last_seen("release/api", 42).unwrap();
        }

        let reopened = Catalogue::open(&path).unwrap();
        let jobs = reopened.list_enabled_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].last_seen_build, 42);
    }
}
