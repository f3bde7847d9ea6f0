//! ICMP echo probe: three pings per execution.

use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use surge_ping::{Client, Config, PingIdentifier, PingSequence};
use upupup_common::CheckConfig;

use crate::compare::{compare_floats, value_as_f64};
use crate::{AssertionResult, CheckResult};

const ECHO_COUNT: u16 = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) async fn run(
    check: &CheckConfig,
    started_at: DateTime<Utc>,
    timeout: Duration,
) -> CheckResult {
    let result = CheckResult::begin(check, started_at);
    let timeout = if timeout.is_zero() { DEFAULT_TIMEOUT } else { timeout };

    let addr = match resolve_target(&check.target).await {
        Ok(addr) => addr,
        Err(e) => return result.fail(format!("init pinger: {e}")),
    };
    let client = match Client::new(&Config::default()) {
        Ok(client) => client,
        Err(e) => return result.fail(format!("init pinger: {e}")),
    };
    let mut pinger = client.pinger(addr, PingIdentifier(rand::random())).await;
    pinger.timeout(timeout);

    let payload = [0u8; 56];
    let mut rtts: Vec<Duration> = Vec::with_capacity(ECHO_COUNT as usize);
    for seq in 0..ECHO_COUNT {
        if let Ok((_packet, rtt)) = pinger.ping(PingSequence(seq), &payload).await {
            rtts.push(rtt);
        }
    }

    let received = rtts.len() as f64;
    let packet_loss = (f64::from(ECHO_COUNT) - received) / f64::from(ECHO_COUNT) * 100.0;
    let avg_rtt = if rtts.is_empty() {
        Duration::ZERO
    } else {
        rtts.iter().sum::<Duration>() / rtts.len() as u32
    };
    let avg_rtt_ms = avg_rtt.as_secs_f64() * 1000.0;

    let mut result = result;
    result.latency = avg_rtt;
    result
        .metadata
        .insert("packet_loss".into(), serde_json::json!(packet_loss));
    result
        .metadata
        .insert("rtt_p95_ms".into(), serde_json::json!(avg_rtt_ms));

    let mut assertions = Vec::with_capacity(check.assertions.len());
    for assertion in &check.assertions {
        let outcome = match assertion.kind.to_ascii_lowercase().as_str() {
            "packet_loss_percent" => {
                let expect = value_as_f64(&assertion.value).unwrap_or_default();
                if compare_floats(packet_loss, expect, &assertion.op) {
                    AssertionResult::passed(&assertion.kind, &assertion.op)
                } else {
                    AssertionResult::failed(
                        &assertion.kind,
                        &assertion.op,
                        format!(
                            "packet loss {:.2}% not {} {:.2}",
                            packet_loss, assertion.op, expect
                        ),
                    )
                }
            }
            "latency_ms_p95" => {
                let expect = value_as_f64(&assertion.value).unwrap_or_default();
                if compare_floats(avg_rtt_ms, expect, &assertion.op) {
                    AssertionResult::passed(&assertion.kind, &assertion.op)
                } else {
                    AssertionResult::failed(
                        &assertion.kind,
                        &assertion.op,
                        format!("latency {:.2}ms not {} {:.2}", avg_rtt_ms, assertion.op, expect),
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

async fn resolve_target(target: &str) -> anyhow::Result<IpAddr> {
    if let Ok(addr) = target.parse::<IpAddr>() {
        return Ok(addr);
    }
    let mut addrs = tokio::net::lookup_host((target, 0)).await?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| anyhow::anyhow!("no address for {target:?}"))
}
