//! `POST /api/hook/{hookID}`: operator hook invocation.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::ClientIp;
use crate::hooks::{HookError, InvokeOptions};
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct HookRequestPayload {
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub until_first_success: Option<bool>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub requested_by: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct HookResponsePayload {
    pub status: &'static str,
    pub hook_id: String,
    pub execution_id: i64,
    pub kind: String,
    pub scope: String,
    pub target_ids: Vec<String>,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,
    pub until_first_success: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub requested_by: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub requested_from_ip: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub note: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub parameters: HashMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

pub async fn handle(
    State(state): State<AppState>,
    Path(hook_id): Path<String>,
    Extension(ClientIp(client_ip)): Extension<ClientIp>,
    body: Bytes,
) -> Response {
    let Some(config) = state.hooks.config(&hook_id).cloned() else {
        return (StatusCode::NOT_FOUND, "unknown hook").into_response();
    };

    if let Some(allowlist) = state.hook_allowlists.get(&hook_id) {
        let ip = client_ip.parse().ok();
        if !allowlist.allowed(ip) {
            return (StatusCode::FORBIDDEN, "forbidden").into_response();
        }
    }

    let payload: HookRequestPayload = if body.is_empty() {
        HookRequestPayload::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(payload) => payload,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("invalid json payload: {e}"),
                )
                    .into_response();
            }
        }
    };

    let mut duration_override = None;
    if !payload.duration.is_empty() {
        match humantime::parse_duration(&payload.duration) {
            Ok(duration) => duration_override = Some(duration),
            Err(e) => {
                return (StatusCode::BAD_REQUEST, format!("invalid duration: {e}"))
                    .into_response();
            }
        }
    }
    if duration_override.is_none() {
        if let Some(seconds) = payload.duration_seconds {
            duration_override = Some(std::time::Duration::from_secs(seconds.max(0) as u64));
        }
    }

    let mut requested_by = payload.requested_by;
    if requested_by.is_empty() {
        if let Some(owner) = config.metadata.get("owner") {
            requested_by = owner.clone();
        }
    }
    if requested_by.is_empty() {
        requested_by = client_ip.clone();
    }

    let opts = InvokeOptions {
        duration_override,
        until_first_success: payload.until_first_success,
        note: payload.note,
        requested_by,
        requested_from_ip: client_ip,
        additional_metadata: payload.metadata,
    };

    let exec = match state.hooks.invoke(&hook_id, opts) {
        Ok(exec) => exec,
        Err(HookError::Unknown(_)) => {
            return (StatusCode::NOT_FOUND, "unknown hook").into_response();
        }
        Err(HookError::Storage(e)) => {
            tracing::error!(hook_id = %hook_id, error = %e, "failed to persist hook execution");
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to persist hook execution")
                .into_response();
        }
    };

    let duration_seconds = exec
        .active_until
        .map(|until| (until - exec.requested_at).num_seconds());
    let response = HookResponsePayload {
        status: "accepted",
        hook_id,
        execution_id: exec.id,
        kind: exec.kind,
        scope: exec.scope,
        target_ids: exec.target_ids,
        requested_at: exec.requested_at,
        active_until: exec.active_until,
        duration_seconds,
        until_first_success: exec.until_first_success,
        requested_by: exec.requested_by,
        requested_from_ip: exec.requested_from_ip,
        note: exec.note,
        parameters: exec.parameters,
        message: config.description,
    };
    (StatusCode::ACCEPTED, Json(response)).into_response()
}
