//! HTTP/HTTPS probe with optional pre-auth flow and templated requests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json_path::JsonPath;
use upupup_common::{CheckConfig, CheckScope, HttpRequestConfig, RenderScope};

use crate::compare::{
    compare_floats, compare_strings, format_value, value_as_f64,
};
use crate::{tls, AssertionResult, CheckResult, Environment};

pub(crate) async fn run(
    check: &CheckConfig,
    env: &Environment,
    started_at: DateTime<Utc>,
    timeout: Duration,
) -> CheckResult {
    let result = CheckResult::begin(check, started_at);

    let client = match build_client(timeout) {
        Ok(client) => client,
        Err(e) => return result.fail(format!("build http client: {e}")),
    };

    let mut vars = HashMap::new();
    if let Some(preauth) = &check.preauth {
        if let Err(e) = execute_preauth(preauth, check, env, &client, &mut vars).await {
            return result.fail(format!("preauth failed: {e}"));
        }
    }

    let scope = render_scope(check, env, &vars);
    let request_cfg = check.request.clone().unwrap_or_default();
    let target = if request_cfg.url.is_empty() {
        check.target.clone()
    } else {
        request_cfg.url.clone()
    };

    let url = match env.templates.render(&target, &scope) {
        Ok(url) => url,
        Err(e) => return result.fail(format!("render target: {e}")),
    };
    let method = if request_cfg.method.is_empty() {
        reqwest::Method::GET
    } else {
        match reqwest::Method::from_bytes(request_cfg.method.as_bytes()) {
            Ok(method) => method,
            Err(_) => return result.fail(format!("invalid method {:?}", request_cfg.method)),
        }
    };

    let mut request = client.request(method, url.as_str());
    if !request_cfg.headers.is_empty() {
        let headers = match env.templates.render_map(&request_cfg.headers, &scope) {
            Ok(headers) => headers,
            Err(e) => return result.fail(format!("render headers: {e}")),
        };
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    if !request_cfg.body.is_empty() {
        let body = match env.templates.render(&request_cfg.body, &scope) {
            Ok(body) => body,
            Err(e) => return result.fail(format!("render body: {e}")),
        };
        request = request.body(body);
    }

    let run_start = Instant::now();
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            let mut result = result.fail(e.to_string());
            result.latency = run_start.elapsed();
            return result;
        }
    };
    let status = response.status();
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => return result.fail(format!("read response: {e}")),
    };

    let mut result = result;
    result.latency = run_start.elapsed();
    let latency_ms = result.latency.as_secs_f64() * 1000.0;
    let body_text = String::from_utf8_lossy(&body).into_owned();

    // Parsed lazily: only the first jsonpath assertion pays for it.
    let mut body_json: Option<Result<serde_json::Value, serde_json::Error>> = None;

    let mut assertions = Vec::with_capacity(check.assertions.len());
    for assertion in &check.assertions {
        let mut outcome = AssertionResult {
            kind: assertion.kind.clone(),
            op: assertion.op.clone(),
            path: assertion.path.clone(),
            passed: false,
            message: String::new(),
        };
        match assertion.kind.to_ascii_lowercase().as_str() {
            "status_code" => {
                let expect = value_as_f64(&assertion.value).unwrap_or_default();
                let actual = f64::from(status.as_u16());
                outcome.passed = compare_floats(actual, expect, &assertion.op);
                if !outcome.passed {
                    outcome.message = format!(
                        "expected status {} {:.0}, got {:.0}",
                        assertion.op, expect, actual
                    );
                }
            }
            "jsonpath" => {
                let parsed = body_json.get_or_insert_with(|| serde_json::from_slice(&body));
                match parsed {
                    Err(e) => outcome.message = format!("parse json: {e}"),
                    Ok(json) => match JsonPath::parse(&assertion.path) {
                        Err(e) => outcome.message = format!("jsonpath lookup: {e}"),
                        Ok(path) => {
                            let found = path.query(json).all().first().copied().cloned();
                            if assertion.op.eq_ignore_ascii_case("exists") {
                                outcome.passed =
                                    found.as_ref().is_some_and(|v| !v.is_null());
                                if !outcome.passed {
                                    outcome.message = "jsonpath value does not exist".into();
                                }
                            } else {
                                match found {
                                    None => outcome.message = "jsonpath lookup: no match".into(),
                                    Some(value) => {
                                        outcome.passed = compare_json(
                                            &value,
                                            &assertion.value,
                                            &assertion.op,
                                        );
                                        if !outcome.passed {
                                            outcome.message = format!(
                                                "jsonpath value mismatch: got {}",
                                                format_value(&value)
                                            );
                                        }
                                    }
                                }
                            }
                        }
                    },
                }
            }
            "body_contains" => {
                let expect = format_value(&assertion.value);
                match assertion.op.to_ascii_lowercase().as_str() {
                    "regex" => match regex::Regex::new(&expect) {
                        Err(e) => outcome.message = format!("invalid regex {expect:?}: {e}"),
                        Ok(rx) => {
                            outcome.passed = rx.is_match(&body_text);
                            if !outcome.passed {
                                outcome.message = "regex did not match body".into();
                            }
                        }
                    },
                    "contains" => {
                        outcome.passed = body_text.contains(&expect);
                        if !outcome.passed {
                            outcome.message = "string not found in body".into();
                        }
                    }
                    other => outcome.message = format!("unsupported op {other:?}"),
                }
            }
            "latency_ms" => {
                let expect = value_as_f64(&assertion.value).unwrap_or_default();
                outcome.passed = compare_floats(latency_ms, expect, &assertion.op);
                if !outcome.passed {
                    outcome.message = format!(
                        "latency {:.2}ms not {} {:.2}ms",
                        latency_ms, assertion.op, expect
                    );
                }
            }
            "ssl_valid_days" => match certificate_days(&url, timeout).await {
                Err(e) => outcome.message = format!("no tls connection: {e}"),
                Ok(days) => {
                    let expect = value_as_f64(&assertion.value).unwrap_or_default();
                    outcome.passed = compare_floats(days, expect, &assertion.op);
                    if !outcome.passed {
                        outcome.message = format!("cert valid for {days:.0} days");
                    }
                }
            },
            other => outcome.message = format!("unsupported assertion {other:?}"),
        }
        assertions.push(outcome);
    }

    result.finish(assertions)
}

fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if !timeout.is_zero() {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

fn render_scope(
    check: &CheckConfig,
    env: &Environment,
    vars: &HashMap<String, String>,
) -> RenderScope {
    RenderScope {
        secrets: env.secrets.as_ref().clone(),
        vars: vars.clone(),
        check: CheckScope {
            id: check.id.clone(),
            name: check.name.clone(),
            target: check.target.clone(),
        },
        labels: check.labels.clone(),
        extra: HashMap::new(),
    }
}

async fn execute_preauth(
    preauth: &upupup_common::PreAuthConfig,
    check: &CheckConfig,
    env: &Environment,
    client: &reqwest::Client,
    vars: &mut HashMap<String, String>,
) -> anyhow::Result<()> {
    if !preauth.flow.eq_ignore_ascii_case("http-token") {
        anyhow::bail!("unsupported preauth flow {:?}", preauth.flow);
    }

    let scope = render_scope(check, env, vars);
    let request_cfg: &HttpRequestConfig = &preauth.request;
    let url = if request_cfg.url.is_empty() {
        check.target.clone()
    } else {
        request_cfg.url.clone()
    };
    let url = env.templates.render(&url, &scope)?;
    let method = if request_cfg.method.is_empty() {
        reqwest::Method::GET
    } else {
        reqwest::Method::from_bytes(request_cfg.method.as_bytes())
            .map_err(|_| anyhow::anyhow!("invalid preauth method {:?}", request_cfg.method))?
    };

    let mut request = client.request(method, url.as_str());
    if !request_cfg.headers.is_empty() {
        for (key, value) in env.templates.render_map(&request_cfg.headers, &scope)? {
            request = request.header(key, value);
        }
    }
    if !request_cfg.body.is_empty() {
        request = request.body(env.templates.render(&request_cfg.body, &scope)?);
    }
    if let Some(timeout) = request_cfg.timeout {
        if !timeout.is_zero() {
            request = request.timeout(timeout.0);
        }
    }

    let response = request.send().await?;
    let body: serde_json::Value = response.json().await?;

    if !preauth.capture.from.eq_ignore_ascii_case("jsonpath") {
        anyhow::bail!("unsupported capture from {:?}", preauth.capture.from);
    }
    let path = JsonPath::parse(&preauth.capture.path)?;
    let value = path
        .query(&body)
        .all()
        .first()
        .copied()
        .ok_or_else(|| anyhow::anyhow!("preauth capture: path matched nothing"))?;
    vars.insert(preauth.capture.var.clone(), format_value(value));
    Ok(())
}

fn compare_json(actual: &serde_json::Value, expected: &serde_json::Value, op: &str) -> bool {
    if let (Some(a), Some(b)) = (actual.as_f64(), value_as_f64(expected)) {
        return compare_floats(a, b, op);
    }
    compare_strings(actual, expected, op)
}

async fn certificate_days(url: &str, timeout: Duration) -> anyhow::Result<f64> {
    let parsed = reqwest::Url::parse(url)?;
    if parsed.scheme() != "https" {
        anyhow::bail!("target is not https");
    }
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("url has no host"))?;
    let port = parsed.port_or_known_default().unwrap_or(443);
    tls::certificate_days_remaining(host, port, host, timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_comparison_prefers_numbers() {
        assert!(compare_json(&json!(42), &json!(42.0), "=="));
        assert!(compare_json(&json!(41.5), &json!(42), "<"));
        assert!(compare_json(&json!("up"), &json!("up"), "equals"));
        assert!(!compare_json(&json!("up"), &json!("down"), "equals"));
    }
}
