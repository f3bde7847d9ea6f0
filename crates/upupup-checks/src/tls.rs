//! TLS handshake probe and certificate helpers.
//!
//! The handshake runs with webpki verification against the SNI name, so a
//! hostname or chain problem surfaces as a probe error before assertions run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use upupup_common::CheckConfig;
use x509_parser::prelude::*;

use crate::compare::{compare_floats, value_as_f64, value_is_truthy};
use crate::{AssertionResult, CheckResult};

pub(crate) async fn run(
    check: &CheckConfig,
    started_at: DateTime<Utc>,
    timeout: Duration,
) -> CheckResult {
    let result = CheckResult::begin(check, started_at);

    let (host, port) = match split_host_port(&check.target) {
        Ok(parts) => parts,
        Err(e) => return result.fail(format!("invalid target: {e}")),
    };
    let server_name = if check.sni.trim().is_empty() {
        host.clone()
    } else {
        check.sni.trim().to_string()
    };

    let not_after = match peer_certificate_not_after(&host, port, &server_name, timeout).await {
        Ok(not_after) => not_after,
        Err(e) => return result.fail(e.to_string()),
    };
    let days = (not_after - Utc::now()).num_seconds() as f64 / 86_400.0;

    let mut result = result;
    result
        .metadata
        .insert("not_after".into(), serde_json::json!(not_after.to_rfc3339()));

    let mut assertions = Vec::with_capacity(check.assertions.len());
    for assertion in &check.assertions {
        let outcome = match assertion.kind.to_ascii_lowercase().as_str() {
            "ssl_valid_days" => {
                let expect = value_as_f64(&assertion.value).unwrap_or_default();
                if compare_floats(days, expect, &assertion.op) {
                    AssertionResult::passed(&assertion.kind, &assertion.op)
                } else {
                    AssertionResult::failed(
                        &assertion.kind,
                        &assertion.op,
                        format!("cert expires in {days:.0} days"),
                    )
                }
            }
            "ssl_hostname_matches" => {
                // The verified handshake already proved the hostname.
                if value_is_truthy(&assertion.value) {
                    AssertionResult::passed(&assertion.kind, &assertion.op)
                } else {
                    AssertionResult::failed(
                        &assertion.kind,
                        &assertion.op,
                        "certificate hostname matched but expectation false",
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

/// Days until the peer certificate expires, via a verified handshake.
/// Shared with the HTTP probe's `ssl_valid_days` assertion.
pub(crate) async fn certificate_days_remaining(
    host: &str,
    port: u16,
    server_name: &str,
    timeout: Duration,
) -> anyhow::Result<f64> {
    let not_after = peer_certificate_not_after(host, port, server_name, timeout).await?;
    Ok((not_after - Utc::now()).num_seconds() as f64 / 86_400.0)
}

async fn peer_certificate_not_after(
    host: &str,
    port: u16,
    server_name: &str,
    timeout: Duration,
) -> anyhow::Result<DateTime<Utc>> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let server_name = ServerName::try_from(server_name.to_string())
        .map_err(|e| anyhow::anyhow!("invalid server name: {e}"))?;

    let addr = format!("{host}:{port}");
    let timeout = if timeout.is_zero() {
        Duration::from_secs(10)
    } else {
        timeout
    };
    let tcp = tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| anyhow::anyhow!("dial {addr}: timed out"))?
        .map_err(|e| anyhow::anyhow!("dial {addr}: {e}"))?;
    let stream = tokio::time::timeout(timeout, connector.connect(server_name, tcp))
        .await
        .map_err(|_| anyhow::anyhow!("tls handshake timed out"))?
        .map_err(|e| anyhow::anyhow!("tls handshake: {e}"))?;

    let (_io, conn) = stream.get_ref();
    let certs = conn
        .peer_certificates()
        .ok_or_else(|| anyhow::anyhow!("no peer certificates"))?;
    let leaf = certs
        .first()
        .ok_or_else(|| anyhow::anyhow!("empty certificate chain"))?;

    let (_, cert) = X509Certificate::from_der(leaf.as_ref())
        .map_err(|e| anyhow::anyhow!("parse certificate: {e}"))?;
    let not_after = cert.validity().not_after.to_datetime();
    Ok(Utc
        .timestamp_opt(not_after.unix_timestamp(), 0)
        .single()
        .unwrap_or_default())
}

fn split_host_port(target: &str) -> anyhow::Result<(String, u16)> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("missing port in address {target:?}"))?;
    let port: u16 = port
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid port in address {target:?}: {e}"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        anyhow::bail!("missing host in address {target:?}");
    }
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_splitting() {
        assert_eq!(split_host_port("example.com:443").unwrap(), ("example.com".into(), 443));
        assert_eq!(split_host_port("[::1]:8443").unwrap(), ("::1".into(), 8443));
        assert!(split_host_port("example.com").is_err());
        assert!(split_host_port("example.com:https").is_err());
    }
}
