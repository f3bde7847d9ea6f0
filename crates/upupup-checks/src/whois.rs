//! WHOIS expiry probe.
//!
//! Looks up the registry server by public suffix, sends the bare domain and
//! extracts the `Expiry Date:` timestamp from the response. Unknown suffixes
//! are an error rather than a silent fallback to a single server.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use upupup_common::CheckConfig;

use crate::compare::{compare_floats, value_as_f64};
use crate::{AssertionResult, CheckResult};

const WHOIS_PORT: u16 = 43;
const READ_DEADLINE: Duration = Duration::from_secs(10);

pub(crate) async fn run(
    check: &CheckConfig,
    started_at: DateTime<Utc>,
    timeout: Duration,
) -> CheckResult {
    let result = CheckResult::begin(check, started_at);
    let domain = check.target.trim();

    let server = match server_for_domain(domain) {
        Ok(server) => server,
        Err(e) => return result.fail(e.to_string()),
    };

    let body = match query(server, domain, timeout).await {
        Ok(body) => body,
        Err(e) => return result.fail(e.to_string()),
    };

    let mut result = result;
    result.metadata.insert("raw".into(), serde_json::json!(body));

    let expiration = match extract_expiry(&body) {
        Ok(expiration) => expiration,
        Err(e) => return result.fail(e.to_string()),
    };
    let days = (expiration - Utc::now()).num_seconds() as f64 / 86_400.0;

    let mut assertions = Vec::with_capacity(check.assertions.len());
    for assertion in &check.assertions {
        let outcome = match assertion.kind.to_ascii_lowercase().as_str() {
            "domain_expires_in_days" => {
                let expect = value_as_f64(&assertion.value).unwrap_or_default();
                if compare_floats(days, expect, &assertion.op) {
                    AssertionResult::passed(&assertion.kind, &assertion.op)
                } else {
                    AssertionResult::failed(
                        &assertion.kind,
                        &assertion.op,
                        format!("domain expires in {days:.0} days"),
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

async fn query(server: &str, domain: &str, timeout: Duration) -> anyhow::Result<String> {
    let addr = format!("{server}:{WHOIS_PORT}");
    let connect = TcpStream::connect(&addr);
    let mut stream = if timeout.is_zero() {
        connect.await
    } else {
        tokio::time::timeout(timeout, connect)
            .await
            .map_err(|_| anyhow::anyhow!("dial whois: timed out"))?
    }
    .map_err(|e| anyhow::anyhow!("dial whois: {e}"))?;

    stream
        .write_all(format!("{domain}\r\n").as_bytes())
        .await
        .map_err(|e| anyhow::anyhow!("write whois: {e}"))?;

    let mut body = Vec::new();
    tokio::time::timeout(READ_DEADLINE, stream.read_to_end(&mut body))
        .await
        .map_err(|_| anyhow::anyhow!("read whois: timed out"))?
        .map_err(|e| anyhow::anyhow!("read whois: {e}"))?;
    Ok(String::from_utf8_lossy(&body).into_owned())
}

fn whois_servers(suffix: &str) -> Option<&'static str> {
    match suffix {
        "com" | "net" => Some("whois.verisign-grs.com"),
        "org" => Some("whois.pir.org"),
        "io" => Some("whois.nic.io"),
        _ => None,
    }
}

fn server_for_domain(domain: &str) -> anyhow::Result<&'static str> {
    let suffix = psl::suffix(domain.as_bytes())
        .ok_or_else(|| anyhow::anyhow!("public suffix: no suffix for {domain:?}"))?;
    let suffix = std::str::from_utf8(suffix.as_bytes())
        .map_err(|e| anyhow::anyhow!("public suffix: {e}"))?;
    whois_servers(suffix).ok_or_else(|| {
        let registrable = psl::domain(domain.as_bytes())
            .and_then(|d| std::str::from_utf8(d.as_bytes()).ok().map(str::to_string))
            .unwrap_or_else(|| domain.to_string());
        anyhow::anyhow!("no specific whois server for {registrable:?}")
    })
}

fn expiry_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)Expiry Date:\s*(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z)")
            .expect("expiry regex is valid")
    })
}

fn extract_expiry(body: &str) -> anyhow::Result<DateTime<Utc>> {
    let captures = expiry_regex()
        .captures(body)
        .ok_or_else(|| anyhow::anyhow!("could not locate expiry date"))?;
    let raw = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| anyhow::anyhow!("parse expiry: {e}"))
}
