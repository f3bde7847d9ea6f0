//! TCP connect probe.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use upupup_common::CheckConfig;

use crate::compare::{compare_floats, value_as_f64, value_is_truthy};
use crate::{AssertionResult, CheckResult, Environment};

pub(crate) async fn run(
    check: &CheckConfig,
    _env: &Environment,
    started_at: DateTime<Utc>,
    timeout: Duration,
) -> CheckResult {
    let result = CheckResult::begin(check, started_at);

    let run_start = Instant::now();
    let connect = tokio::net::TcpStream::connect(&check.target);
    let stream = if timeout.is_zero() {
        connect.await
    } else {
        match tokio::time::timeout(timeout, connect).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let mut result = result.fail(format!("dial tcp {}: timed out", check.target));
                result.latency = run_start.elapsed();
                return result;
            }
        }
    };
    let latency = run_start.elapsed();
    match stream {
        Ok(stream) => drop(stream),
        Err(e) => {
            let mut result = result.fail(format!("dial tcp {}: {e}", check.target));
            result.latency = latency;
            return result;
        }
    }

    let mut result = result;
    result.latency = latency;
    let latency_ms = latency.as_secs_f64() * 1000.0;

    let mut assertions = Vec::with_capacity(check.assertions.len());
    for assertion in &check.assertions {
        let outcome = match assertion.kind.to_ascii_lowercase().as_str() {
            "tcp_connect" => {
                if value_is_truthy(&assertion.value) {
                    AssertionResult::passed(&assertion.kind, &assertion.op)
                } else {
                    AssertionResult::failed(
                        &assertion.kind,
                        &assertion.op,
                        "connection succeeded but expectation false",
                    )
                }
            }
            "latency_ms" => {
                let expect = value_as_f64(&assertion.value).unwrap_or_default();
                if compare_floats(latency_ms, expect, &assertion.op) {
                    AssertionResult::passed(&assertion.kind, &assertion.op)
                } else {
                    AssertionResult::failed(
                        &assertion.kind,
                        &assertion.op,
                        format!("latency {:.2}ms not {} {:.2}ms", latency_ms, assertion.op, expect),
                    )
                }
            }
            other => AssertionResult::failed(
                &assertion.kind,
                &assertion.op,
                format!("unsupported assertion {other:?}"),
            ),
        };
        assertions.push(outcome);
    }

    result.finish(assertions)
}
