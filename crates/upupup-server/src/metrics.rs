//! `GET /api/metrics/{checkID}`: per-check Prometheus rendering.
//!
//! Combines the worker's latest check-run row with recent outcome counts,
//! and for metrics checks appends the raw node snapshot with a `check_id`
//! label injected into every sample line that lacks one.

use std::fmt::Write as _;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use crate::state::AppState;

pub async fn handle(State(state): State<AppState>, Path(check_id): Path<String>) -> Response {
    let Some(check) = state.checks.get(&check_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let last_run = match state.store.latest_check_run(&check_id) {
        Ok(Some(run)) => run,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, "no check data available").into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to load check data: {e}"),
            )
                .into_response();
        }
    };

    let now = Utc::now();
    let window = state.recent_window(check);
    let since = now - chrono::Duration::from_std(window).unwrap_or_default();
    let (total, failed) = match state.store.recent_outcome_counts(&check_id, since) {
        Ok(counts) => counts,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to aggregate check data: {e}"),
            )
                .into_response();
        }
    };

    let namespace = &state.metrics.namespace;
    let mut label_pairs = vec![
        format!("check_id=\"{}\"", prom_label_value(&check_id)),
        format!("check_name=\"{}\"", prom_label_value(&check.name)),
    ];
    if !check.labels.is_empty() {
        let mut keys: Vec<&String> = check.labels.keys().collect();
        keys.sort();
        for key in keys {
            label_pairs.push(format!(
                "{}=\"{}\"",
                prom_label_key(key),
                prom_label_value(&check.labels[key])
            ));
        }
    }
    let labels = label_pairs.join(",");

    let mut body = String::new();
    let gauge = |body: &mut String, name: &str, help: &str, value: String| {
        let _ = writeln!(body, "# HELP {namespace}_{name} {help}");
        let _ = writeln!(body, "# TYPE {namespace}_{name} gauge");
        let _ = writeln!(body, "{namespace}_{name}{{{labels}}} {value}");
        body.push('\n');
    };
    gauge(
        &mut body,
        "check_status",
        "Last check status (1=success)",
        format!("{:.0}", if last_run.success { 1.0 } else { 0.0 }),
    );
    gauge(
        &mut body,
        "check_last_run_timestamp_seconds",
        "Unix time of last check run",
        format!("{:.0}", last_run.occurred_at.timestamp() as f64),
    );
    gauge(
        &mut body,
        "check_latency_seconds",
        "Last check latency in seconds",
        format!("{:.6}", last_run.latency.as_secs_f64()),
    );
    gauge(
        &mut body,
        "check_recent_window_seconds",
        "Observation window for recent counts",
        format!("{:.0}", window.as_secs_f64()),
    );
    gauge(
        &mut body,
        "check_recent_total",
        "Total runs within the observation window",
        total.to_string(),
    );
    // last gauge carries no trailing blank line
    let _ = writeln!(
        body,
        "# HELP {namespace}_check_recent_failures Failed runs within the observation window"
    );
    let _ = writeln!(body, "# TYPE {namespace}_check_recent_failures gauge");
    let _ = writeln!(body, "{namespace}_check_recent_failures{{{labels}}} {failed}");

    if check.metrics.is_some() {
        if let Some(node_id) = check.metrics_node_id() {
            match state.store.latest_node_metrics(node_id) {
                Err(e) => {
                    return (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        format!("failed to load node metrics: {e}"),
                    )
                        .into_response();
                }
                Ok(Some(snapshot)) if !snapshot.payload.is_empty() => {
                    let decorated = ensure_check_id_label(&snapshot.payload, node_id);
                    body.push('\n');
                    let timestamp = if snapshot.ingested_at.timestamp_millis() == 0 {
                        "unknown".to_string()
                    } else {
                        snapshot.ingested_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
                    };
                    let _ = writeln!(
                        body,
                        "# Raw metrics from node {} (ingested_at={timestamp})",
                        prom_label_value(node_id)
                    );
                    body.push_str(&decorated);
                    if !decorated.ends_with('\n') {
                        body.push('\n');
                    }
                }
                Ok(_) => {}
            }
        }
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

/// Escapes a label value for `\`, newline and `"`.
pub fn prom_label_value(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('"', "\\\"")
}

/// Rewrites a label key to `[A-Za-z0-9_]`; a leading digit and every other
/// character become `_`. An empty key becomes `_`.
pub fn prom_label_key(input: &str) -> String {
    if input.is_empty() {
        return "_".to_string();
    }
    input
        .chars()
        .enumerate()
        .map(|(idx, c)| {
            let valid = c.is_ascii_alphanumeric() || c == '_';
            if !valid || (idx == 0 && c.is_ascii_digit()) {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Injects `check_id="<id>"` into every sample line that lacks a check_id
/// label, leaving comments, blank lines and existing label sets intact.
pub fn ensure_check_id_label(payload: &str, check_id: &str) -> String {
    let check_id = check_id.trim();
    if payload.is_empty() || check_id.is_empty() {
        return payload.to_string();
    }
    let check_label = format!("check_id=\"{}\"", prom_label_value(check_id));
    let lines: Vec<String> = payload
        .split('\n')
        .map(|line| decorate_line(line, &check_label))
        .collect();
    lines.join("\n")
}

fn decorate_line(line: &str, check_label: &str) -> String {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return line.to_string();
    }

    let rest = line.trim_start_matches([' ', '\t']);
    let leading = &line[..line.len() - rest.len()];

    let Some(ws_pos) = rest.find([' ', '\t']) else {
        return line.to_string();
    };
    let metric_part = &rest[..ws_pos];
    let value_part = &rest[ws_pos..];

    if metric_part.contains("check_id=") {
        return line.to_string();
    }

    let decorated = if let Some(brace_pos) = metric_part.find('{') {
        let Some(close_pos) = metric_part.rfind('}') else {
            return line.to_string();
        };
        if close_pos < brace_pos {
            return line.to_string();
        }
        let prefix = &metric_part[..close_pos];
        let suffix = &metric_part[close_pos..];
        if prefix.ends_with('{') {
            format!("{prefix}{check_label}{suffix}")
        } else {
            format!("{prefix},{check_label}{suffix}")
        }
    } else {
        format!("{metric_part}{{{check_label}}}")
    };

    format!("{leading}{decorated}{value_part}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_value_escaping() {
        assert_eq!(prom_label_value("plain"), "plain");
        assert_eq!(prom_label_value("a\\b"), "a\\\\b");
        assert_eq!(prom_label_value("a\nb"), "a\\nb");
        assert_eq!(prom_label_value("a\"b"), "a\\\"b");
    }

    #[test]
    fn label_key_sanitization() {
        assert_eq!(prom_label_key("team"), "team");
        assert_eq!(prom_label_key("app.kubernetes.io/name"), "app_kubernetes_io_name");
        assert_eq!(prom_label_key("7layer"), "_layer");
        assert_eq!(prom_label_key(""), "_");
        assert_eq!(prom_label_key("snake_case_9"), "snake_case_9");
    }

    #[test]
    fn bare_samples_gain_a_label_set() {
        let out = ensure_check_id_label("node_load1 0.5", "node-1");
        assert_eq!(out, "node_load1{check_id=\"node-1\"} 0.5");
    }

    #[test]
    fn labelled_samples_are_extended() {
        let out = ensure_check_id_label("node_cpu{mode=\"idle\"} 12", "node-1");
        assert_eq!(out, "node_cpu{mode=\"idle\",check_id=\"node-1\"} 12");
    }

    #[test]
    fn empty_label_sets_are_filled() {
        let out = ensure_check_id_label("node_cpu{} 12", "node-1");
        assert_eq!(out, "node_cpu{check_id=\"node-1\"} 12");
    }

    #[test]
    fn existing_check_id_is_kept() {
        let line = "node_cpu{check_id=\"other\"} 12";
        assert_eq!(ensure_check_id_label(line, "node-1"), line);
    }

    #[test]
    fn comments_and_blanks_are_untouched() {
        let payload = "# HELP node_load1 load\n\nnode_load1 0.5\n";
        let out = ensure_check_id_label(payload, "node-1");
        assert_eq!(
            out,
            "# HELP node_load1 load\n\nnode_load1{check_id=\"node-1\"} 0.5\n"
        );
    }

    #[test]
    fn indentation_is_preserved() {
        let out = ensure_check_id_label("  node_load1 0.5", "node-1");
        assert_eq!(out, "  node_load1{check_id=\"node-1\"} 0.5");
    }
}
