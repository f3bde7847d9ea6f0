//! `GET /healthcheck`: database, per-check recency and notification health.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::AppState;

pub const STATUS_OK: &str = "ok";
pub const STATUS_WARN: &str = "warn";
pub const STATUS_CRITICAL: &str = "critical";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub generated_at: DateTime<Utc>,
    pub database: ComponentStatus,
    pub checks: Vec<CheckComponent>,
    pub notifications: ComponentStatus,
    #[serde(skip_serializing_if = "Vec::is_empty", rename = "hooks")]
    pub active_hooks: Vec<HookComponent>,
}

#[derive(Debug, Serialize, Default)]
pub struct ComponentStatus {
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct CheckComponent {
    pub check_id: String,
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<CheckRunDetail>,
    pub required_recent: u32,
    pub recent_within_seconds: i64,
}

#[derive(Debug, Serialize)]
pub struct CheckRunDetail {
    pub success: bool,
    pub summary: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub latency_ms: f64,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HookComponent {
    pub hook_id: String,
    pub kind: String,
    pub scope: String,
    pub target_ids: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub requested_by: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub requested_from_ip: String,
    pub requested_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_until: Option<DateTime<Utc>>,
    pub until_first_success: bool,
}

pub async fn handle(State(state): State<AppState>) -> Response {
    let response = snapshot(&state, Utc::now());
    let status_code = if response.status == STATUS_OK {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response)).into_response()
}

pub fn snapshot(state: &AppState, now: DateTime<Utc>) -> HealthResponse {
    let mut database = ComponentStatus {
        status: STATUS_OK.to_string(),
        detail: String::new(),
    };
    if let Err(e) = state.store.ping() {
        database.status = STATUS_CRITICAL.to_string();
        database.detail = e.to_string();
    }

    let checks = evaluate_checks(state, now);
    let notifications = evaluate_notifications(state);
    let active_hooks = list_active_hooks(state, now);

    let status = derive_overall(&database.status, &notifications.status, &checks);

    HealthResponse {
        status,
        generated_at: now,
        database,
        checks,
        notifications,
        active_hooks,
    }
}

fn evaluate_checks(state: &AppState, now: DateTime<Utc>) -> Vec<CheckComponent> {
    let mut results = Vec::with_capacity(state.config.checks.len());
    let required_runs = state.health.required_recent_runs;

    for check in &state.config.checks {
        let window = state.recent_window(check);
        let mut component = CheckComponent {
            check_id: check.id.clone(),
            name: check.name.clone(),
            status: STATUS_OK.to_string(),
            detail: String::new(),
            last_run: None,
            required_recent: required_runs,
            recent_within_seconds: window.as_secs() as i64,
        };

        let last_run = match state.store.latest_check_run(&check.id) {
            Ok(run) => run,
            Err(e) => {
                component.status = STATUS_CRITICAL.to_string();
                component.detail = e.to_string();
                results.push(component);
                continue;
            }
        };
        let Some(last_run) = last_run else {
            if state.health.skip_checks_with_no_history {
                component.detail = "no history yet - skipped".to_string();
            } else if state.health.fail_on_missing_check_state {
                component.status = STATUS_CRITICAL.to_string();
                component.detail = "no check runs recorded".to_string();
            } else {
                component.status = STATUS_WARN.to_string();
                component.detail = "no check runs recorded".to_string();
            }
            results.push(component);
            continue;
        };

        component.last_run = Some(CheckRunDetail {
            success: last_run.success,
            summary: last_run.summary.clone(),
            error: last_run.error.clone(),
            latency_ms: last_run.latency.as_secs_f64() * 1000.0,
            occurred_at: last_run.occurred_at,
        });

        let since = now - chrono::Duration::from_std(window).unwrap_or_default();
        match state.store.count_recent_check_runs(&check.id, since) {
            Err(e) => {
                component.status = STATUS_CRITICAL.to_string();
                component.detail = e.to_string();
                results.push(component);
                continue;
            }
            Ok(count) => {
                if count < required_runs {
                    component.status = STATUS_WARN.to_string();
                    component.detail = "insufficient recent check runs".to_string();
                }
            }
        }

        let age = now.signed_duration_since(last_run.occurred_at);
        if age > chrono::Duration::from_std(window).unwrap_or_default() {
            component.status = STATUS_WARN.to_string();
            component.detail = "last run exceeded expected interval".to_string();
        }
        if !last_run.success {
            if component.status == STATUS_OK {
                component.status = STATUS_WARN.to_string();
            }
            component.detail = append_detail(&component.detail, "last run failed");
        }
        results.push(component);
    }
    results
}

fn evaluate_notifications(state: &AppState) -> ComponentStatus {
    let mut status = ComponentStatus {
        status: STATUS_OK.to_string(),
        detail: String::new(),
    };
    let logs = match state
        .store
        .recent_notification_logs(state.health.notification_error_lookback)
    {
        Ok(logs) => logs,
        Err(e) => {
            status.status = STATUS_CRITICAL.to_string();
            status.detail = e.to_string();
            return status;
        }
    };
    if logs.is_empty() {
        if !state.health.allow_no_notifications {
            status.status = STATUS_WARN.to_string();
            status.detail = "no notifications recorded".to_string();
        }
        return status;
    }
    let error_statuses: Vec<String> = state
        .health
        .notification_error_statuses
        .iter()
        .map(|s| s.trim().to_ascii_lowercase())
        .collect();
    for entry in &logs {
        if error_statuses.contains(&entry.status.to_ascii_lowercase()) {
            status.status = STATUS_WARN.to_string();
            status.detail =
                append_detail(&status.detail, "recent notification recorded failure status");
            break;
        }
    }
    status
}

fn list_active_hooks(state: &AppState, now: DateTime<Utc>) -> Vec<HookComponent> {
    let Ok(execs) = state.hooks.list_active(now) else {
        return Vec::new();
    };
    execs
        .into_iter()
        .map(|exec| HookComponent {
            hook_id: exec.hook_id,
            kind: exec.kind,
            scope: exec.scope,
            target_ids: exec.target_ids,
            requested_by: exec.requested_by,
            requested_from_ip: exec.requested_from_ip,
            requested_at: exec.requested_at,
            active_until: exec.active_until,
            until_first_success: exec.until_first_success,
        })
        .collect()
}

fn derive_overall(database: &str, notifications: &str, checks: &[CheckComponent]) -> String {
    if database == STATUS_CRITICAL || notifications == STATUS_CRITICAL {
        return STATUS_CRITICAL.to_string();
    }
    let mut status = if database == STATUS_WARN || notifications == STATUS_WARN {
        STATUS_WARN
    } else {
        STATUS_OK
    };
    for check in checks {
        if check.status == STATUS_CRITICAL {
            return STATUS_CRITICAL.to_string();
        }
        if check.status == STATUS_WARN {
            status = STATUS_WARN;
        }
    }
    status.to_string()
}

fn append_detail(existing: &str, addition: &str) -> String {
    if existing.is_empty() {
        addition.to_string()
    } else {
        format!("{existing}; {addition}")
    }
}
