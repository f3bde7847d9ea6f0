//! Persisted operator hook executions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::{millis_to_datetime, Store};

/// A hook execution row. Written by the server, observed by the worker.
#[derive(Debug, Clone, Default)]
pub struct HookExecution {
    pub id: i64,
    pub hook_id: String,
    pub kind: String,
    pub scope: String,
    pub target_ids: Vec<String>,
    pub requested_by: String,
    pub requested_from_ip: String,
    pub requested_at: DateTime<Utc>,
    pub active_until: Option<DateTime<Utc>>,
    pub until_first_success: bool,
    pub parameters: HashMap<String, String>,
    pub note: String,
    pub status: String,
}

impl Store {
    /// Inserts a hook execution and returns its row id.
    pub fn insert_hook_execution(&self, exec: &HookExecution) -> Result<i64> {
        let target_ids_json = serde_json::to_string(&exec.target_ids)?;
        let parameters_json = if exec.parameters.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&exec.parameters)?
        };
        let conn = self.conn();
        conn.execute(
            "INSERT INTO hook_executions
                 (hook_id, kind, scope, target_ids_json, requested_by, requested_from_ip,
                  parameters_json, note, until_first_success, active_until, requested_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                exec.hook_id,
                exec.kind,
                exec.scope,
                target_ids_json,
                exec.requested_by,
                exec.requested_from_ip,
                parameters_json,
                exec.note,
                exec.until_first_success as i64,
                exec.active_until.map(|t| t.timestamp_millis()),
                exec.requested_at.timestamp_millis(),
                exec.status,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Hook executions that are `active` and not expired at `now`.
    pub fn active_hook_executions(&self, now: DateTime<Utc>) -> Result<Vec<HookExecution>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT id, hook_id, kind, scope, target_ids_json, requested_by, requested_from_ip,
                    parameters_json, note, until_first_success, active_until, requested_at, status
             FROM hook_executions
             WHERE status = 'active' AND (active_until IS NULL OR active_until >= ?1)",
        )?;
        let rows = stmt.query_map(rusqlite::params![now.timestamp_millis()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, i64>(9)?,
                row.get::<_, Option<i64>>(10)?,
                row.get::<_, i64>(11)?,
                row.get::<_, String>(12)?,
            ))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (
                id,
                hook_id,
                kind,
                scope,
                target_ids_json,
                requested_by,
                requested_from_ip,
                parameters_json,
                note,
                until_first_success,
                active_until,
                requested_at,
                status,
            ) = row?;
            let target_ids: Vec<String> = serde_json::from_str(&target_ids_json)?;
            let parameters = match parameters_json.as_deref() {
                Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
                _ => HashMap::new(),
            };
            result.push(HookExecution {
                id,
                hook_id,
                kind,
                scope,
                target_ids,
                requested_by: requested_by.unwrap_or_default(),
                requested_from_ip: requested_from_ip.unwrap_or_default(),
                requested_at: millis_to_datetime(requested_at),
                active_until: active_until.map(millis_to_datetime),
                until_first_success: until_first_success == 1,
                parameters,
                note: note.unwrap_or_default(),
                status,
            });
        }
        Ok(result)
    }

    /// Marks an active hook execution as completed. Completing an already
    /// completed row is a no-op.
    pub fn complete_hook_execution(&self, id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE hook_executions SET status = 'completed' WHERE id = ?1 AND status = 'active'",
            rusqlite::params![id],
        )?;
        Ok(())
    }

    /// Status of a single execution row; used by tests and health reporting.
    pub fn hook_execution_status(&self, id: i64) -> Result<Option<String>> {
        let conn = self.conn();
        let status = conn
            .query_row(
                "SELECT status FROM hook_executions WHERE id = ?1",
                rusqlite::params![id],
                |row| row.get::<_, String>(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(crate::StorageError::from(other)),
            })?;
        Ok(status)
    }
}
