//! Latest node metric snapshots, one row per node.

use chrono::{DateTime, Utc};

use crate::error::{Result, StorageError};
use crate::{millis_to_datetime, Store};

/// The latest Prometheus text payload forwarded for a node.
#[derive(Debug, Clone)]
pub struct NodeMetricSnapshot {
    pub node_id: String,
    pub payload: String,
    pub source_ip: Option<String>,
    pub ingested_at: DateTime<Utc>,
}

impl Store {
    /// Stores or replaces the snapshot for a node. The upsert is a single
    /// statement, so readers see either the old row or the new one.
    pub fn upsert_node_metrics(&self, snapshot: &NodeMetricSnapshot) -> Result<()> {
        let node_id = snapshot.node_id.trim();
        if node_id.is_empty() {
            return Err(StorageError::InvalidConfig("node id is required".into()));
        }
        if snapshot.payload.trim().is_empty() {
            return Err(StorageError::InvalidConfig("payload is required".into()));
        }
        let source_ip = snapshot
            .source_ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty());
        self.conn().execute(
            "INSERT INTO node_metrics (node_id, payload, ingested_at, source_ip)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(node_id) DO UPDATE SET
                 payload = excluded.payload,
                 ingested_at = excluded.ingested_at,
                 source_ip = excluded.source_ip",
            rusqlite::params![
                node_id,
                snapshot.payload,
                snapshot.ingested_at.timestamp_millis(),
                source_ip,
            ],
        )?;
        Ok(())
    }

    /// The most recent snapshot for the node, if one was ever ingested.
    pub fn latest_node_metrics(&self, node_id: &str) -> Result<Option<NodeMetricSnapshot>> {
        let node_id = node_id.trim();
        if node_id.is_empty() {
            return Err(StorageError::InvalidConfig("node id is required".into()));
        }
        let conn = self.conn();
        let snapshot = conn
            .query_row(
                "SELECT node_id, payload, ingested_at, source_ip FROM node_metrics WHERE node_id = ?1",
                rusqlite::params![node_id],
                |row| {
                    Ok(NodeMetricSnapshot {
                        node_id: row.get(0)?,
                        payload: row.get(1)?,
                        ingested_at: millis_to_datetime(row.get(2)?),
                        source_ip: row.get(3)?,
                    })
                },
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(StorageError::from(other)),
            })?;
        Ok(snapshot)
    }
}
