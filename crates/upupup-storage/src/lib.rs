//! Single-file SQLite persistence shared by the worker and the server.
//!
//! The database runs in WAL mode with a single connection; all writers are
//! serialized behind one mutex. Retention pruning happens inside the same
//! transaction as the insert so row counts are bounded at commit.

pub mod error;
mod hooks;
mod ingest;


use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

pub use error::{Result, StorageError};
pub use hooks::HookExecution;
pub use ingest::NodeMetricSnapshot;

const DEFAULT_CHECK_STATE_RETENTION: u32 = 30;
const DEFAULT_NOTIFICATION_RETENTION: u32 = 100;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS check_states (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    check_id TEXT NOT NULL,
    check_name TEXT NOT NULL,
    success INTEGER NOT NULL,
    summary TEXT,
    error TEXT,
    latency_ms INTEGER,
    occurred_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_check_states_check ON check_states (check_id, occurred_at DESC);

CREATE TABLE IF NOT EXISTS notification_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    notifier_id TEXT NOT NULL,
    check_id TEXT NOT NULL,
    check_name TEXT NOT NULL,
    run_id TEXT,
    status TEXT,
    severity TEXT,
    summary TEXT,
    labels_json TEXT,
    occurred_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_notification_logs_occurred ON notification_logs (occurred_at DESC);

CREATE TABLE IF NOT EXISTS hook_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    hook_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    scope TEXT NOT NULL,
    target_ids_json TEXT NOT NULL,
    requested_by TEXT,
    requested_from_ip TEXT,
    parameters_json TEXT,
    note TEXT,
    until_first_success INTEGER NOT NULL DEFAULT 0,
    active_until INTEGER,
    requested_at INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'active'
);
CREATE INDEX IF NOT EXISTS idx_hook_executions_status ON hook_executions (status);
CREATE INDEX IF NOT EXISTS idx_hook_executions_active_until ON hook_executions (active_until);

CREATE TABLE IF NOT EXISTS node_metrics (
    node_id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    ingested_at INTEGER NOT NULL,
    source_ip TEXT
);
";

/// Retention limits applied on every insert.
#[derive(Debug, Clone, Copy, Default)]
pub struct Options {
    pub check_state_retention: u32,
    pub notification_log_retention: u32,
}

/// Wraps SQLite persistence for check runs, notifications, hooks and node
/// metric snapshots.
pub struct Store {
    conn: Mutex<Connection>,
    check_state_limit: u32,
    notification_limit: u32,
}

/// A persisted check execution result.
#[derive(Debug, Clone)]
pub struct CheckRun {
    pub check_id: String,
    pub check_name: String,
    pub success: bool,
    pub summary: String,
    pub error: String,
    pub latency: Duration,
    pub occurred_at: DateTime<Utc>,
}

/// A notifier dispatch attempt, recorded before the transport fires.
#[derive(Debug, Clone)]
pub struct NotificationLog {
    pub notifier_id: String,
    pub check_id: String,
    pub check_name: String,
    pub run_id: String,
    pub status: String,
    pub severity: String,
    pub summary: String,
    pub labels: HashMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl Store {
    /// Opens the store, applying WAL pragmas and creating the schema.
    pub fn open(path: impl AsRef<Path>, opts: Options) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(StorageError::InvalidConfig("storage path is required".into()));
        }
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let conn = Connection::open(path)?;
        configure(&conn)?;
        conn.execute_batch(SCHEMA)?;

        let check_state_limit = if opts.check_state_retention == 0 {
            DEFAULT_CHECK_STATE_RETENTION
        } else {
            opts.check_state_retention
        };
        let notification_limit = if opts.notification_log_retention == 0 {
            DEFAULT_NOTIFICATION_RETENTION
        } else {
            opts.notification_log_retention
        };

        Ok(Self {
            conn: Mutex::new(conn),
            check_state_limit,
            notification_limit,
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory(opts: Options) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            check_state_limit: if opts.check_state_retention == 0 {
                DEFAULT_CHECK_STATE_RETENTION
            } else {
                opts.check_state_retention
            },
            notification_limit: if opts.notification_log_retention == 0 {
                DEFAULT_NOTIFICATION_RETENTION
            } else {
                opts.notification_log_retention
            },
        })
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Verifies the database connection is usable.
    pub fn ping(&self) -> Result<()> {
        self.conn().query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    /// Persists a check run and prunes the oldest rows for that check beyond
    /// the retention limit, atomically.
    pub fn record_check_run(&self, run: &CheckRun) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO check_states (check_id, check_name, success, summary, error, latency_ms, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                run.check_id,
                run.check_name,
                run.success as i64,
                run.summary,
                run.error,
                run.latency.as_millis() as i64,
                run.occurred_at.timestamp_millis(),
            ],
        )?;
        tx.execute(
            "DELETE FROM check_states
             WHERE check_id = ?1 AND id NOT IN (
                 SELECT id FROM check_states
                 WHERE check_id = ?1
                 ORDER BY id DESC
                 LIMIT ?2
             )",
            rusqlite::params![run.check_id, self.check_state_limit],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Appends a notification log row and prunes the global tail.
    pub fn record_notification(&self, log: &NotificationLog) -> Result<()> {
        let labels_json = if log.labels.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&log.labels)?
        };
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO notification_logs (notifier_id, check_id, check_name, run_id, status, severity, summary, labels_json, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                log.notifier_id,
                log.check_id,
                log.check_name,
                log.run_id,
                log.status,
                log.severity,
                log.summary,
                labels_json,
                log.occurred_at.timestamp_millis(),
            ],
        )?;
        tx.execute(
            "DELETE FROM notification_logs
             WHERE id NOT IN (
                 SELECT id FROM notification_logs
                 ORDER BY id DESC
                 LIMIT ?1
             )",
            rusqlite::params![self.notification_limit],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// The most recent run of a check, if any history exists.
    pub fn latest_check_run(&self, check_id: &str) -> Result<Option<CheckRun>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT check_id, check_name, success, summary, error, latency_ms, occurred_at
             FROM check_states
             WHERE check_id = ?1
             ORDER BY occurred_at DESC
             LIMIT 1",
        )?;
        let run = stmt
            .query_row(rusqlite::params![check_id], |row| {
                Ok(CheckRun {
                    check_id: row.get(0)?,
                    check_name: row.get(1)?,
                    success: row.get::<_, i64>(2)? == 1,
                    summary: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    error: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    latency: Duration::from_millis(
                        row.get::<_, Option<i64>>(5)?.unwrap_or(0).max(0) as u64,
                    ),
                    occurred_at: millis_to_datetime(row.get(6)?),
                })
            })
            .map(Some)
            .or_else(no_rows_to_none)?;
        Ok(run)
    }

    /// Number of runs for a check since the given instant.
    pub fn count_recent_check_runs(&self, check_id: &str, since: DateTime<Utc>) -> Result<u32> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM check_states WHERE check_id = ?1 AND occurred_at >= ?2",
            rusqlite::params![check_id, since.timestamp_millis()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    /// Total and failed run counts for a check since the given instant.
    pub fn recent_outcome_counts(
        &self,
        check_id: &str,
        since: DateTime<Utc>,
    ) -> Result<(u32, u32)> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0)
             FROM check_states
             WHERE check_id = ?1 AND occurred_at >= ?2",
            rusqlite::params![check_id, since.timestamp_millis()],
            |row| Ok((row.get::<_, i64>(0)? as u32, row.get::<_, i64>(1)? as u32)),
        )
        .map_err(Into::into)
    }

    /// Latest notification log entries, newest first.
    pub fn recent_notification_logs(&self, limit: u32) -> Result<Vec<NotificationLog>> {
        let limit = if limit == 0 { 10 } else { limit };
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT notifier_id, check_id, check_name, run_id, status, severity, summary, labels_json, occurred_at
             FROM notification_logs
             ORDER BY occurred_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, i64>(8)?,
            ))
        })?;
        let mut logs = Vec::new();
        for row in rows {
            let (notifier_id, check_id, check_name, run_id, status, severity, summary, labels_json, occurred_at) =
                row?;
            let labels = match labels_json.as_deref() {
                Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
                _ => HashMap::new(),
            };
            logs.push(NotificationLog {
                notifier_id,
                check_id,
                check_name,
                run_id: run_id.unwrap_or_default(),
                status: status.unwrap_or_default(),
                severity: severity.unwrap_or_default(),
                summary: summary.unwrap_or_default(),
                labels,
                occurred_at: millis_to_datetime(occurred_at),
            });
        }
        Ok(logs)
    }
}

fn configure(conn: &Connection) -> Result<()> {
    // journal_mode reports the resulting mode as a row
    conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
    conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

pub(crate) fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn no_rows_to_none<T>(err: rusqlite::Error) -> Result<Option<T>> {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other.into()),
    }
}
