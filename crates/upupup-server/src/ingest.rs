//! `POST /api/ingest/{nodeID}`: node metrics ingestion.

use std::io::Read;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use flate2::read::GzDecoder;

use crate::access::ClientIp;
use crate::state::AppState;
use upupup_storage::NodeMetricSnapshot;

/// Wire payloads beyond this size are rejected with 413.
pub const MAX_INGEST_PAYLOAD_BYTES: usize = 2 * 1024 * 1024;

pub async fn handle(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let node_id = node_id.trim().to_string();
    if node_id.is_empty() {
        return (StatusCode::BAD_REQUEST, "node id is required").into_response();
    }
    if body.len() > MAX_INGEST_PAYLOAD_BYTES {
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("payload exceeds {MAX_INGEST_PAYLOAD_BYTES} bytes"),
        )
            .into_response();
    }

    let content_encoding = headers
        .get("content-encoding")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let payload = match decode_payload(&body, content_encoding) {
        Ok(payload) => payload,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("invalid payload: {e}")).into_response();
        }
    };
    let metrics = String::from_utf8_lossy(&payload).trim().to_string();
    if metrics.is_empty() {
        return (StatusCode::BAD_REQUEST, "payload is empty").into_response();
    }

    let ingested_at = Utc::now();
    let snapshot = NodeMetricSnapshot {
        node_id: node_id.clone(),
        payload: metrics,
        source_ip: (!client_ip.is_empty()).then_some(client_ip),
        ingested_at,
    };
    if let Err(e) = state.store.upsert_node_metrics(&snapshot) {
        tracing::error!(node_id = %node_id, error = %e, "failed to persist metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to persist metrics: {e}"),
        )
            .into_response();
    }

    let response = serde_json::json!({
        "status": "stored",
        "node_id": node_id,
        "ingested_at": ingested_at,
    });
    (StatusCode::ACCEPTED, Json(response)).into_response()
}

fn decode_payload(data: &[u8], content_encoding: &str) -> anyhow::Result<Vec<u8>> {
    match content_encoding.trim().to_ascii_lowercase().as_str() {
        "" | "identity" => Ok(data.to_vec()),
        "gzip" => {
            let mut decoder = GzDecoder::new(data);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| anyhow::anyhow!("decompress gzip: {e}"))?;
            Ok(decompressed)
        }
        other => anyhow::bail!("unsupported content encoding {other:?}"),
    }
}
