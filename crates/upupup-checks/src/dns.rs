//! DNS lookup probe against a configurable resolver.

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::TokioAsyncResolver;
use upupup_common::CheckConfig;

use crate::compare::{compare_floats, value_as_f64, value_as_string_list};
use crate::{AssertionResult, CheckResult};

const DEFAULT_RESOLVER: &str = "8.8.8.8:53";

pub(crate) async fn run(check: &CheckConfig, started_at: DateTime<Utc>) -> CheckResult {
    let result = CheckResult::begin(check, started_at);

    let resolver_addr = if check.resolver.trim().is_empty() {
        DEFAULT_RESOLVER
    } else {
        check.resolver.trim()
    };
    let socket_addr: SocketAddr = match resolver_addr.parse() {
        Ok(addr) => addr,
        Err(e) => return result.fail(format!("invalid resolver {resolver_addr:?}: {e}")),
    };

    let mut config = ResolverConfig::new();
    config.add_name_server(NameServerConfig::new(socket_addr, Protocol::Udp));
    let mut opts = ResolverOpts::default();
    opts.attempts = 1;
    let resolver = TokioAsyncResolver::tokio(config, opts);

    let record_type = record_type_from_str(&check.record_type);
    let lookup = match resolver.lookup(check.target.as_str(), record_type).await {
        Ok(lookup) => lookup,
        Err(e) => return result.fail(e.to_string()),
    };

    let records: Vec<_> = lookup.record_iter().collect();
    let answers: Vec<String> = records
        .iter()
        .filter_map(|record| record.data().map(rdata_to_string))
        .collect();

    let mut result = result;
    result
        .metadata
        .insert("answer_count".into(), serde_json::json!(answers.len()));

    let mut assertions = Vec::with_capacity(check.assertions.len());
    for assertion in &check.assertions {
        let outcome = match assertion.kind.to_ascii_lowercase().as_str() {
            "dns_answer" => {
                let expected = value_as_string_list(&assertion.value);
                let matched = expected
                    .iter()
                    .any(|exp| answers.iter().any(|act| act == exp));
                if matched {
                    AssertionResult::passed(&assertion.kind, &assertion.op)
                } else {
                    AssertionResult::failed(
                        &assertion.kind,
                        &assertion.op,
                        format!("expected any of {expected:?}, got {answers:?}"),
                    )
                }
            }
            "ttl_seconds" => {
                if records.is_empty() {
                    AssertionResult::failed(&assertion.kind, &assertion.op, "no DNS answers")
                } else {
                    let expect = value_as_f64(&assertion.value).unwrap_or_default();
                    let actual = f64::from(records[0].ttl());
                    if compare_floats(actual, expect, &assertion.op) {
                        AssertionResult::passed(&assertion.kind, &assertion.op)
                    } else {
                        AssertionResult::failed(
                            &assertion.kind,
                            &assertion.op,
                            format!("ttl {:.0} not {} {:.0}", actual, assertion.op, expect),
                        )
                    }
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

fn rdata_to_string(data: &RData) -> String {
    match data {
        RData::A(a) => a.to_string(),
        RData::AAAA(aaaa) => aaaa.to_string(),
        other => other.to_string(),
    }
}

fn record_type_from_str(raw: &str) -> RecordType {
    match raw.to_ascii_uppercase().as_str() {
        "AAAA" => RecordType::AAAA,
        "CNAME" => RecordType::CNAME,
        "MX" => RecordType::MX,
        _ => RecordType::A,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_types_default_to_a() {
        assert_eq!(record_type_from_str("A"), RecordType::A);
        assert_eq!(record_type_from_str("aaaa"), RecordType::AAAA);
        assert_eq!(record_type_from_str("mx"), RecordType::MX);
        assert_eq!(record_type_from_str("TXT"), RecordType::A);
        assert_eq!(record_type_from_str(""), RecordType::A);
    }
}
