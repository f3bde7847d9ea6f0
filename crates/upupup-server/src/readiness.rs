//! `GET /readiness` and Prometheus scrape-config generation.
//!
//! At startup the server derives one static target per (check, target) pair
//! and writes the scrape config atomically (write to `<path>.tmp`, rename).
//! Readiness reports 200 only after a successful generation.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::health::{STATUS_CRITICAL, STATUS_OK, STATUS_WARN};
use crate::state::{AppState, ScrapeConfigStatus};

const DEFAULT_GLOBAL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    status: String,
    generated_at: DateTime<Utc>,
    configuration: ConfigComponent,
}

#[derive(Debug, Serialize)]
struct ConfigComponent {
    status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    detail: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_generated: Option<DateTime<Utc>>,
    checks: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    targets: Vec<String>,
}

pub async fn handle(State(state): State<AppState>) -> Response {
    let component = config_component(&state);
    let ready = component.status == STATUS_OK;
    let response = ReadinessResponse {
        status: component.status.clone(),
        generated_at: Utc::now(),
        configuration: component,
    };
    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response)).into_response()
}

fn config_component(state: &AppState) -> ConfigComponent {
    let status = state
        .scrape_config
        .read()
        .unwrap_or_else(|p| p.into_inner())
        .clone();

    let mut component = ConfigComponent {
        status: STATUS_OK.to_string(),
        detail: String::new(),
        path: status.path.clone(),
        last_generated: None,
        checks: state.checks.len(),
        targets: status.targets.clone(),
    };

    if component.path.is_empty() {
        component.status = STATUS_WARN.to_string();
        component.detail = "server.prometheus.config_path not configured".to_string();
    }
    if let Some(error) = &status.error {
        component.status = STATUS_CRITICAL.to_string();
        component.detail = error.clone();
        return component;
    }
    match status.generated_at {
        None => {
            if component.detail.is_empty() {
                component.detail = "prometheus scrape config not generated yet".to_string();
            }
            if component.status == STATUS_OK {
                component.status = STATUS_WARN.to_string();
            }
        }
        Some(at) => component.last_generated = Some(at),
    }
    component
}

/// Generates the scrape config and records the outcome for readiness.
pub fn initialise_scrape_config(state: &AppState) {
    let path = state.metrics.config_path.trim().to_string();
    let mut status = ScrapeConfigStatus {
        path: path.clone(),
        ..ScrapeConfigStatus::default()
    };
    if path.is_empty() {
        status.error = None;
        tracing::warn!("prometheus config path not configured; readiness will remain unready");
    } else {
        match generate_scrape_config(state, &path) {
            Ok(targets) => {
                status.generated_at = Some(Utc::now());
                status.targets = targets.clone();
                tracing::info!(
                    path = %path,
                    checks = state.checks.len(),
                    targets = ?targets,
                    "generated prometheus scrape config"
                );
            }
            Err(e) => {
                status.error = Some(e.to_string());
                tracing::error!(error = %e, path = %path, "failed to generate prometheus scrape config");
            }
        }
    }
    *state
        .scrape_config
        .write()
        .unwrap_or_else(|p| p.into_inner()) = status;
}

#[derive(Debug, Serialize)]
struct PromConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    global: Option<PromGlobalConfig>,
    scrape_configs: Vec<PromScrapeConfig>,
}

#[derive(Debug, Serialize)]
struct PromGlobalConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    scrape_interval: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    evaluation_interval: String,
}

#[derive(Debug, Serialize)]
struct PromScrapeConfig {
    job_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    scheme: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    scrape_interval: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    static_configs: Vec<PromStaticConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    relabel_configs: Vec<PromRelabelConfig>,
}

#[derive(Debug, Serialize)]
struct PromStaticConfig {
    targets: Vec<String>,
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    labels: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct PromRelabelConfig {
    source_labels: Vec<String>,
    regex: String,
    target_label: String,
    replacement: String,
}

fn generate_scrape_config(state: &AppState, path: &str) -> Result<Vec<String>> {
    let targets = dedupe_targets(&state.metrics.targets, &state.config.server.listen);
    if targets.is_empty() {
        anyhow::bail!("no prometheus scrape targets configured");
    }

    let mut check_ids: Vec<&String> = state.checks.keys().collect();
    check_ids.sort();

    let mut static_configs = Vec::with_capacity(check_ids.len() * targets.len());
    for check_id in &check_ids {
        for target in &targets {
            static_configs.push(PromStaticConfig {
                targets: vec![target.clone()],
                labels: std::collections::BTreeMap::from([(
                    "check_id".to_string(),
                    (*check_id).clone(),
                )]),
            });
        }
    }

    let config = PromConfigFile {
        global: Some(PromGlobalConfig {
            scrape_interval: duration_string(
                state.metrics.global_scrape_interval.map(|d| d.0),
                DEFAULT_GLOBAL_INTERVAL,
            ),
            evaluation_interval: duration_string(
                state.metrics.global_evaluation_interval.map(|d| d.0),
                DEFAULT_GLOBAL_INTERVAL,
            ),
        }),
        scrape_configs: vec![PromScrapeConfig {
            job_name: state.metrics.job_name.clone(),
            scheme: state.metrics.scheme.clone(),
            scrape_interval: duration_string(
                state.metrics.scrape_interval.map(|d| d.0),
                Duration::ZERO,
            ),
            static_configs,
            relabel_configs: vec![PromRelabelConfig {
                source_labels: vec!["check_id".to_string()],
                regex: "(.*)".to_string(),
                target_label: "__metrics_path__".to_string(),
                replacement: "/api/metrics/$1".to_string(),
            }],
        }],
    };

    let body = serde_yaml::to_string(&config).context("marshal prometheus config")?;
    let content = format!(
        "# Generated by upupup at {}\n{body}",
        Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    );

    let path = Path::new(path);
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("prepare config directory {:?}", dir))?;
        }
    }
    let tmp = std::path::PathBuf::from(format!("{}.tmp", path.display()));
    std::fs::write(&tmp, content).context("write temporary config")?;
    std::fs::rename(&tmp, path).context("replace config")?;

    Ok(targets)
}

/// Trimmed, deduplicated and lexicographically sorted targets; empty lists
/// fall back to `localhost:<port>` derived from the listen address.
fn dedupe_targets(raw: &[String], listen: &str) -> Vec<String> {
    let mut targets: BTreeSet<String> = raw
        .iter()
        .map(|target| target.trim().to_string())
        .filter(|target| !target.is_empty())
        .collect();
    if targets.is_empty() {
        if let Some(fallback) = derive_target_from_listen(listen) {
            targets.insert(fallback);
        }
    }
    targets.into_iter().collect()
}

fn derive_target_from_listen(listen: &str) -> Option<String> {
    let listen = listen.trim();
    if listen.is_empty() {
        return None;
    }
    let Some((host, port)) = listen.rsplit_once(':') else {
        return Some(listen.to_string());
    };
    let host = match host {
        "" | "0.0.0.0" | "::" | "[::]" => "localhost",
        other => other,
    };
    Some(format!("{host}:{port}"))
}

fn duration_string(value: Option<Duration>, fallback: Duration) -> String {
    let value = value.filter(|d| !d.is_zero()).unwrap_or(fallback);
    if value.is_zero() {
        String::new()
    } else {
        humantime::format_duration(value).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_are_deduped_and_sorted() {
        let targets = dedupe_targets(
            &[
                "b.example:9100".to_string(),
                " a.example:9100 ".to_string(),
                "b.example:9100".to_string(),
                "".to_string(),
            ],
            ":8080",
        );
        assert_eq!(targets, vec!["a.example:9100".to_string(), "b.example:9100".to_string()]);
    }

    #[test]
    fn empty_targets_derive_from_listen_address() {
        assert_eq!(dedupe_targets(&[], ":8080"), vec!["localhost:8080".to_string()]);
        assert_eq!(
            dedupe_targets(&[], "0.0.0.0:9999"),
            vec!["localhost:9999".to_string()]
        );
        assert_eq!(
            dedupe_targets(&[], "10.1.2.3:9999"),
            vec!["10.1.2.3:9999".to_string()]
        );
        assert!(dedupe_targets(&[], "").is_empty());
    }

    #[test]
    fn duration_strings() {
        assert_eq!(
            duration_string(None, DEFAULT_GLOBAL_INTERVAL),
            "30s".to_string()
        );
        assert_eq!(
            duration_string(Some(Duration::from_secs(15)), DEFAULT_GLOBAL_INTERVAL),
            "15s".to_string()
        );
        assert_eq!(duration_string(None, Duration::ZERO), String::new());
    }
}
