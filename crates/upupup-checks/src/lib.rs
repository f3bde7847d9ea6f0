//! Probe protocols and the metrics evaluation engine.
//!
//! Every check type produces a [`CheckResult`] whose `success` is the
//! conjunction of its assertion results. Probe I/O is bounded by the check's
//! effective timeout.

mod compare;
mod dns;
mod http;
mod icmp;
pub mod metrics;
mod tcp;
mod tls;
mod whois;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use upupup_common::{CheckConfig, ServiceDefaults, TemplateEngine};
use upupup_storage::Store;

pub use compare::{compare_floats, compare_strings};

/// Shared dependencies for running checks.
#[derive(Clone)]
pub struct Environment {
    pub defaults: ServiceDefaults,
    pub secrets: Arc<HashMap<String, String>>,
    pub templates: Arc<TemplateEngine>,
    /// Required for metrics checks; other probes never touch the store.
    pub store: Option<Arc<Store>>,
}

/// Outcome of a single probe execution.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub check_id: String,
    pub check_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub latency: Duration,
    pub success: bool,
    pub error: Option<String>,
    pub assertion_results: Vec<AssertionResult>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl CheckResult {
    fn begin(check: &CheckConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            check_id: check.id.clone(),
            check_name: check.name.clone(),
            started_at,
            completed_at: started_at,
            latency: Duration::ZERO,
            success: false,
            error: None,
            assertion_results: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    fn fail(mut self, error: impl Into<String>) -> Self {
        self.completed_at = Utc::now();
        self.error = Some(error.into());
        self.success = false;
        self
    }

    fn finish(mut self, assertions: Vec<AssertionResult>) -> Self {
        self.completed_at = Utc::now();
        self.success = assertions.iter().all(|a| a.passed);
        self.assertion_results = assertions;
        self
    }
}

/// The verdict of one assertion over a probe outcome.
#[derive(Debug, Clone, Default)]
pub struct AssertionResult {
    pub kind: String,
    pub op: String,
    pub path: String,
    pub passed: bool,
    pub message: String,
}

impl AssertionResult {
    pub fn passed(kind: &str, op: &str) -> Self {
        Self {
            kind: kind.to_string(),
            op: op.to_string(),
            passed: true,
            ..Self::default()
        }
    }

    pub fn failed(kind: &str, op: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            op: op.to_string(),
            passed: false,
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Runs a check once, bounded by the effective timeout.
pub async fn execute(check: &CheckConfig, env: &Environment) -> CheckResult {
    let started_at = Utc::now();
    let timeout = check.effective_timeout(&env.defaults);

    let probe = run_probe(check, env, started_at, timeout);
    if timeout.is_zero() {
        return probe.await;
    }
    match tokio::time::timeout(timeout, probe).await {
        Ok(result) => result,
        Err(_) => CheckResult::begin(check, started_at).fail(format!(
            "check timed out after {}",
            humantime_like(timeout)
        )),
    }
}

async fn run_probe(
    check: &CheckConfig,
    env: &Environment,
    started_at: DateTime<Utc>,
    timeout: Duration,
) -> CheckResult {
    match check.kind.to_ascii_lowercase().as_str() {
        "http" | "https" => http::run(check, env, started_at, timeout).await,
        "tcp" => tcp::run(check, env, started_at, timeout).await,
        "icmp" => icmp::run(check, started_at, timeout).await,
        "dns" => dns::run(check, started_at).await,
        "tls" => tls::run(check, started_at, timeout).await,
        "whois" => whois::run(check, started_at, timeout).await,
        "metrics" => metrics::run(check, env, started_at).await,
        other => {
            CheckResult::begin(check, started_at).fail(format!("unsupported check type {other:?}"))
        }
    }
}

/// Condenses a result into the one-line summary carried by notifications and
/// check-run rows.
pub fn summarize(result: &CheckResult) -> String {
    if result.success {
        return "Check succeeded".to_string();
    }
    if let Some(error) = &result.error {
        return error.clone();
    }
    let failed: Vec<String> = result
        .assertion_results
        .iter()
        .filter(|a| !a.passed)
        .map(|a| {
            if a.message.is_empty() {
                format!("{} {} failed", a.kind, a.op)
            } else {
                a.message.clone()
            }
        })
        .collect();
    if failed.is_empty() {
        return "check failed".to_string();
    }
    failed.join("; ")
}

fn humantime_like(d: Duration) -> String {
    // Drops the sub-millisecond noise tokio timeouts carry.
    let d = Duration::from_millis(d.as_millis() as u64);
    humantime_format(d)
}

fn humantime_format(d: Duration) -> String {
    if d.as_secs() >= 1 && d.subsec_nanos() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_result(success: bool) -> CheckResult {
        CheckResult {
            check_id: "c".into(),
            check_name: "c".into(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            latency: Duration::ZERO,
            success,
            error: None,
            assertion_results: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn summarize_success() {
        assert_eq!(summarize(&check_result(true)), "Check succeeded");
    }

    #[test]
    fn summarize_prefers_error() {
        let mut result = check_result(false);
        result.error = Some("connect refused".into());
        assert_eq!(summarize(&result), "connect refused");
    }

    #[test]
    fn summarize_joins_failed_assertions() {
        let mut result = check_result(false);
        result.assertion_results = vec![
            AssertionResult::failed("status_code", "==", "expected status == 200, got 503"),
            AssertionResult::passed("latency_ms", "<"),
            AssertionResult::failed("body_contains", "contains", "string not found in body"),
        ];
        assert_eq!(
            summarize(&result),
            "expected status == 200, got 503; string not found in body"
        );
    }

    #[test]
    fn summarize_falls_back_when_assertions_have_no_messages() {
        let mut result = check_result(false);
        result.assertion_results = vec![AssertionResult {
            kind: "tcp_connect".into(),
            op: "".into(),
            passed: false,
            ..AssertionResult::default()
        }];
        assert_eq!(summarize(&result), "tcp_connect  failed");
    }
}
