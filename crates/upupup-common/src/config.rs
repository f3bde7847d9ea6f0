//! Declarative configuration shared by the worker and the server.
//!
//! A single YAML document describes service defaults, secrets, notifiers,
//! escalation policies, operator hooks and the check list. The loader inlines
//! assertion sets into checks and validates every cross-reference up front so
//! the runtime never has to deal with dangling ids.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono_tz::Tz;
use serde::de::{self, Deserializer};
use serde::Deserialize;

/// Interval applied when neither the check nor the defaults set one.
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(60);

/// A duration parsed from a human-readable scalar (`300ms`, `5s`, `10m`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigDuration(pub Duration);

impl ConfigDuration {
    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<Duration> for ConfigDuration {
    fn from(d: Duration) -> Self {
        Self(d)
    }
}

impl<'de> Deserialize<'de> for ConfigDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let raw = raw.trim();
        if raw.is_empty() || raw == "0" {
            return Ok(Self(Duration::ZERO));
        }
        humantime::parse_duration(raw)
            .map(Self)
            .map_err(|e| de::Error::custom(format!("invalid duration {raw:?}: {e}")))
    }
}

/// Maintenance window kinds supported by `service.defaults.maintenance_windows`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceKind {
    Cron,
    Range,
}

/// A maintenance entry, written as a scalar prefixed with `cron:` or `range:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceSpec {
    pub kind: MaintenanceKind,
    pub expr: String,
}

impl<'de> Deserialize<'de> for MaintenanceSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let raw = raw.trim();
        if let Some(expr) = raw.strip_prefix("cron:") {
            return Ok(Self {
                kind: MaintenanceKind::Cron,
                expr: expr.trim().to_string(),
            });
        }
        if let Some(expr) = raw.strip_prefix("range:") {
            return Ok(Self {
                kind: MaintenanceKind::Range,
                expr: expr.trim().to_string(),
            });
        }
        Err(de::Error::custom(format!(
            "unsupported maintenance spec {raw:?}"
        )))
    }
}

/// How to resolve a secret value. Written as `source:value`, e.g. `env:SMTP_PASSWORD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSpec {
    pub source: String,
    pub value: String,
}

impl<'de> Deserialize<'de> for SecretSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let raw = raw.trim();
        let (source, value) = raw
            .split_once(':')
            .ok_or_else(|| de::Error::custom(format!("invalid secret spec {raw:?}")))?;
        Ok(Self {
            source: source.trim().to_string(),
            value: value.trim().to_string(),
        })
    }
}

/// Root configuration document.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub secrets: HashMap<String, SecretSpec>,
    #[serde(default)]
    pub assertion_sets: HashMap<String, Vec<Assertion>>,
    #[serde(default)]
    pub notifiers: Vec<NotifierConfig>,
    #[serde(default)]
    pub notification_policies: Vec<NotificationPolicy>,
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
    #[serde(default)]
    pub checks: Vec<CheckConfig>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServiceConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub defaults: ServiceDefaults,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServiceDefaults {
    #[serde(default)]
    pub interval: ConfigDuration,
    #[serde(default)]
    pub timeout: ConfigDuration,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub backoff: ConfigDuration,
    #[serde(default)]
    pub maintenance_windows: Vec<MaintenanceSpec>,
    #[serde(default)]
    pub log_runs: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub check_state_retention: u32,
    #[serde(default)]
    pub notification_log_retention: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerSection {
    #[serde(default)]
    pub listen: String,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    #[serde(default)]
    pub log_requests: bool,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub prometheus: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HealthConfig {
    #[serde(default)]
    pub max_interval_multiplier: u32,
    #[serde(default)]
    pub required_recent_runs: u32,
    #[serde(default)]
    pub skip_checks_with_no_history: bool,
    #[serde(default)]
    pub fail_on_missing_check_state: bool,
    #[serde(default)]
    pub notification_error_lookback: u32,
    #[serde(default)]
    pub notification_error_statuses: Vec<String>,
    #[serde(default)]
    pub allow_no_notifications: bool,
}

impl HealthConfig {
    /// Fills unset tunables with their documented defaults.
    pub fn with_defaults(mut self) -> Self {
        if self.max_interval_multiplier == 0 {
            self.max_interval_multiplier = 3;
        }
        if self.required_recent_runs == 0 {
            self.required_recent_runs = 1;
        }
        if self.notification_error_lookback == 0 {
            self.notification_error_lookback = 20;
        }
        if self.notification_error_statuses.is_empty() {
            self.notification_error_statuses = vec![
                "error".to_string(),
                "failed".to_string(),
                "failure".to_string(),
            ];
        }
        self
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub config_path: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub job_name: String,
    #[serde(default)]
    pub scheme: String,
    #[serde(default)]
    pub scrape_interval: Option<ConfigDuration>,
    #[serde(default)]
    pub global_scrape_interval: Option<ConfigDuration>,
    #[serde(default)]
    pub global_evaluation_interval: Option<ConfigDuration>,
}

impl MetricsConfig {
    pub fn with_defaults(mut self) -> Self {
        if self.namespace.is_empty() {
            self.namespace = "upupup".to_string();
        }
        if self.job_name.is_empty() {
            self.job_name = "upupup_checks".to_string();
        }
        self
    }
}

/// A notification endpoint. The parameter map is decoded per type by the
/// notify crate when the registry is built.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: serde_yaml::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationPolicy {
    pub id: String,
    #[serde(default, rename = "match")]
    pub match_labels: HashMap<String, String>,
    #[serde(default)]
    pub stages: Vec<PolicyStage>,
    #[serde(default)]
    pub resolve_notifiers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyStage {
    #[serde(default)]
    pub after: ConfigDuration,
    #[serde(default)]
    pub every: Option<ConfigDuration>,
    #[serde(default)]
    pub notifiers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HookConfig {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub action: HookAction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HookAction {
    pub kind: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub target_ids: Vec<String>,
    #[serde(default)]
    pub duration: Option<ConfigDuration>,
    #[serde(default)]
    pub max_duration: Option<ConfigDuration>,
    #[serde(default)]
    pub until_first_success: bool,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub assertion_sets: Vec<String>,
    #[serde(default)]
    pub schedule: Option<CheckSchedule>,
    #[serde(default)]
    pub request: Option<HttpRequestConfig>,
    #[serde(default)]
    pub preauth: Option<PreAuthConfig>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub notifications: CheckNotification,
    /// DNS checks only.
    #[serde(default)]
    pub resolver: String,
    /// DNS checks only.
    #[serde(default)]
    pub record_type: String,
    /// TLS checks only.
    #[serde(default)]
    pub sni: String,
    /// Metrics checks only.
    #[serde(default)]
    pub metrics: Option<MetricsCheckSpec>,
    #[serde(default)]
    pub log_runs: Option<bool>,
}

impl CheckConfig {
    /// Per-check override wins, otherwise the service default; an unset or
    /// zero interval falls back to 60 seconds.
    pub fn effective_interval(&self, defaults: &ServiceDefaults) -> Duration {
        let interval = self
            .schedule
            .as_ref()
            .and_then(|s| s.interval)
            .map(|d| d.0)
            .unwrap_or(defaults.interval.0);
        if interval.is_zero() {
            FALLBACK_INTERVAL
        } else {
            interval
        }
    }

    pub fn effective_timeout(&self, defaults: &ServiceDefaults) -> Duration {
        if let Some(request) = &self.request {
            if let Some(timeout) = request.timeout {
                return timeout.0;
            }
        }
        if let Some(schedule) = &self.schedule {
            if let Some(timeout) = schedule.timeout {
                return timeout.0;
            }
        }
        defaults.timeout.0
    }

    pub fn effective_retries(&self, defaults: &ServiceDefaults) -> u32 {
        self.schedule
            .as_ref()
            .and_then(|s| s.retries)
            .unwrap_or(defaults.retries)
    }

    pub fn effective_backoff(&self, defaults: &ServiceDefaults) -> Duration {
        self.schedule
            .as_ref()
            .and_then(|s| s.backoff)
            .map(|d| d.0)
            .unwrap_or(defaults.backoff.0)
    }

    pub fn should_log_runs(&self, defaults: &ServiceDefaults) -> bool {
        self.log_runs.unwrap_or(defaults.log_runs)
    }

    /// Node id for metrics checks: explicit `metrics.node_id`, else `target`.
    pub fn metrics_node_id(&self) -> Option<&str> {
        let spec = self.metrics.as_ref()?;
        let node_id = spec.node_id.trim();
        if !node_id.is_empty() {
            return Some(node_id);
        }
        let target = self.target.trim();
        if target.is_empty() {
            None
        } else {
            Some(target)
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CheckSchedule {
    #[serde(default)]
    pub interval: Option<ConfigDuration>,
    #[serde(default)]
    pub timeout: Option<ConfigDuration>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub backoff: Option<ConfigDuration>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HttpRequestConfig {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub timeout: Option<ConfigDuration>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreAuthConfig {
    pub flow: String,
    pub request: HttpRequestConfig,
    pub capture: CaptureSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSpec {
    pub from: String,
    pub path: String,
    #[serde(rename = "as")]
    pub var: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Assertion {
    pub kind: String,
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Thresholds {
    #[serde(default)]
    pub failure_ratio: Option<FailureRatioThreshold>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FailureRatioThreshold {
    #[serde(default)]
    pub window: usize,
    #[serde(default)]
    pub fail_count: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CheckNotification {
    #[serde(default)]
    pub route: String,
    #[serde(default)]
    pub overrides: Option<NotificationOverride>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotificationOverride {
    #[serde(default)]
    pub initial_notifiers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MetricsCheckSpec {
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub max_age: Option<ConfigDuration>,
    #[serde(default)]
    pub computed: HashMap<String, ComputedMetric>,
    #[serde(default)]
    pub thresholds: Vec<MetricThreshold>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComputedMetric {
    pub expression: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub variables: HashMap<String, MetricReference>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricReference {
    pub metric_name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub default: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricThreshold {
    pub name: String,
    pub op: String,
    pub value: f64,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl fmt::Display for MaintenanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaintenanceKind::Cron => write!(f, "cron"),
            MaintenanceKind::Range => write!(f, "range"),
        }
    }
}

impl Config {
    /// Loads and validates a configuration document. Assertion sets are
    /// inlined into the referencing checks before validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(content).context("parse config")?;
        config.apply_assertion_sets()?;
        config.validate()?;
        Ok(config)
    }

    /// The configured timezone, falling back to UTC when parsing fails.
    pub fn timezone(&self) -> Tz {
        let name = self.service.timezone.trim();
        if name.is_empty() {
            return Tz::UTC;
        }
        Tz::from_str(name).unwrap_or(Tz::UTC)
    }

    /// Resolves the secret map. The only supported source reads from the
    /// process environment.
    pub fn resolve_secrets(&self) -> Result<HashMap<String, String>> {
        let mut resolved = HashMap::with_capacity(self.secrets.len());
        for (key, spec) in &self.secrets {
            match spec.source.as_str() {
                "env" => {
                    let value = std::env::var(&spec.value).map_err(|_| {
                        anyhow!("missing env var {:?} for secret {:?}", spec.value, key)
                    })?;
                    resolved.insert(key.clone(), value);
                }
                other => bail!("unsupported secret source {:?} for secret {:?}", other, key),
            }
        }
        Ok(resolved)
    }

    fn apply_assertion_sets(&mut self) -> Result<()> {
        if self.assertion_sets.is_empty() {
            for check in &self.checks {
                if let Some(name) = check.assertion_sets.first() {
                    bail!(
                        "check {:?} references unknown assertion_set {:?}",
                        check.id,
                        name
                    );
                }
            }
            return Ok(());
        }
        for check in &mut self.checks {
            if check.assertion_sets.is_empty() {
                continue;
            }
            let mut combined = Vec::new();
            for set_name in &check.assertion_sets {
                let set = self.assertion_sets.get(set_name).ok_or_else(|| {
                    anyhow!(
                        "check {:?} references unknown assertion_set {:?}",
                        check.id,
                        set_name
                    )
                })?;
                combined.extend(set.iter().cloned());
            }
            combined.append(&mut check.assertions);
            check.assertions = combined;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let mut notifier_ids = HashMap::new();
        for notifier in &self.notifiers {
            if notifier_ids.insert(notifier.id.as_str(), ()).is_some() {
                bail!("duplicate notifier {:?}", notifier.id);
            }
        }
        let mut policy_ids = HashMap::new();
        for policy in &self.notification_policies {
            if policy_ids.insert(policy.id.as_str(), ()).is_some() {
                bail!("duplicate notification policy {:?}", policy.id);
            }
            for (idx, stage) in policy.stages.iter().enumerate() {
                for id in &stage.notifiers {
                    if !notifier_ids.contains_key(id.as_str()) {
                        bail!(
                            "policy {:?} stage {idx} references unknown notifier {:?}",
                            policy.id,
                            id
                        );
                    }
                }
            }
            for id in &policy.resolve_notifiers {
                if !notifier_ids.contains_key(id.as_str()) {
                    bail!("policy {:?} references unknown resolve notifier {:?}", policy.id, id);
                }
            }
        }
        let mut hook_ids = HashMap::new();
        for hook in &self.hooks {
            if hook_ids.insert(hook.id.as_str(), ()).is_some() {
                bail!("duplicate hook {:?}", hook.id);
            }
        }
        let mut check_ids = HashMap::new();
        for check in &self.checks {
            if check_ids.insert(check.id.as_str(), ()).is_some() {
                bail!("duplicate check {:?}", check.id);
            }
            let route = check.notifications.route.trim();
            if !route.is_empty() && !policy_ids.contains_key(route) {
                bail!("check {:?} routes to unknown policy {:?}", check.id, route);
            }
            if let Some(overrides) = &check.notifications.overrides {
                for id in &overrides.initial_notifiers {
                    if !notifier_ids.contains_key(id.as_str()) {
                        bail!(
                            "check {:?} references unknown initial notifier {:?}",
                            check.id,
                            id
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_scalars_parse_human_strings() {
        #[derive(Deserialize)]
        struct Doc {
            a: ConfigDuration,
            b: ConfigDuration,
            c: ConfigDuration,
        }
        let doc: Doc = serde_yaml::from_str("a: 300ms\nb: 5s\nc: 10m\n").unwrap();
        assert_eq!(doc.a.0, Duration::from_millis(300));
        assert_eq!(doc.b.0, Duration::from_secs(5));
        assert_eq!(doc.c.0, Duration::from_secs(600));
    }

    #[test]
    fn duration_rejects_garbage() {
        let err = serde_yaml::from_str::<ConfigDuration>("banana").unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }

    #[test]
    fn maintenance_spec_prefixes() {
        let spec: MaintenanceSpec = serde_yaml::from_str("'cron: 0 2 * * *'").unwrap();
        assert_eq!(spec.kind, MaintenanceKind::Cron);
        assert_eq!(spec.expr, "0 2 * * *");

        let spec: MaintenanceSpec =
            serde_yaml::from_str("range:2025-12-24T00:00-2025-12-26T23:59").unwrap();
        assert_eq!(spec.kind, MaintenanceKind::Range);

        assert!(serde_yaml::from_str::<MaintenanceSpec>("weekly: monday").is_err());
    }

    #[test]
    fn secret_spec_splits_on_first_colon() {
        let spec: SecretSpec = serde_yaml::from_str("env:SMTP_PASSWORD").unwrap();
        assert_eq!(spec.source, "env");
        assert_eq!(spec.value, "SMTP_PASSWORD");
        assert!(serde_yaml::from_str::<SecretSpec>("SMTP_PASSWORD").is_err());
    }

    const SAMPLE: &str = r#"
version: 1
service:
  name: edge
  timezone: Europe/Zurich
  defaults:
    interval: 30s
    timeout: 5s
    retries: 2
    backoff: 1s
    maintenance_windows:
      - "cron: 0 2 * * *"
storage:
  path: /tmp/upupup.db
notifiers:
  - id: ops-slack
    type: slack
    config:
      webhook_url_ref: slack_hook
notification_policies:
  - id: default
    stages:
      - after: 0s
        notifiers: [ops-slack]
      - after: 5m
        every: 10m
        notifiers: [ops-slack]
    resolve_notifiers: [ops-slack]
assertion_sets:
  common_http:
    - kind: status_code
      op: "=="
      value: 200
checks:
  - id: api-health
    name: API health
    type: http
    target: https://example.com/health
    assertion_sets: [common_http]
    assertions:
      - kind: latency_ms
        op: "<"
        value: 800
    thresholds:
      failure_ratio:
        window: 3
        fail_count: 2
    notifications:
      route: default
"#;

    #[test]
    fn sample_config_loads_and_inlines_assertion_sets() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.timezone(), chrono_tz::Europe::Zurich);
        let check = &config.checks[0];
        assert_eq!(check.assertions.len(), 2);
        assert_eq!(check.assertions[0].kind, "status_code");
        assert_eq!(check.assertions[1].kind, "latency_ms");
        assert_eq!(
            check.effective_interval(&config.service.defaults),
            Duration::from_secs(30)
        );
        assert_eq!(check.effective_retries(&config.service.defaults), 2);
    }

    #[test]
    fn unknown_route_is_rejected() {
        let bad = SAMPLE.replace("route: default", "route: nope");
        let err = Config::parse(&bad).unwrap_err();
        assert!(err.to_string().contains("unknown policy"));
    }

    #[test]
    fn unknown_assertion_set_is_rejected() {
        let bad = SAMPLE.replace("assertion_sets: [common_http]", "assertion_sets: [missing]");
        let err = Config::parse(&bad).unwrap_err();
        assert!(err.to_string().contains("unknown assertion_set"));
    }

    #[test]
    fn unknown_notifier_in_stage_is_rejected() {
        let bad = SAMPLE.replace("notifiers: [ops-slack]\n      - after: 5m", "notifiers: [missing]\n      - after: 5m");
        let err = Config::parse(&bad).unwrap_err();
        assert!(err.to_string().contains("unknown notifier"));
    }

    #[test]
    fn zero_interval_falls_back_to_a_minute() {
        let config = Config::parse("checks:\n  - id: c\n    type: tcp\n    target: 127.0.0.1:22\n").unwrap();
        assert_eq!(
            config.checks[0].effective_interval(&config.service.defaults),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn bad_timezone_falls_back_to_utc() {
        let config = Config::parse("service:\n  timezone: Mars/Olympus\n").unwrap();
        assert_eq!(config.timezone(), Tz::UTC);
    }

    #[test]
    fn metrics_node_id_falls_back_to_target() {
        let config = Config::parse(
            "checks:\n  - id: m\n    type: metrics\n    target: node-7\n    metrics:\n      thresholds:\n        - name: node_load1\n          op: \"<\"\n          value: 4\n",
        )
        .unwrap();
        assert_eq!(config.checks[0].metrics_node_id(), Some("node-7"));
    }

    #[test]
    fn resolve_secrets_requires_env_source() {
        let config = Config::parse("secrets:\n  token: vault:kv/token\n").unwrap();
        let err = config.resolve_secrets().unwrap_err();
        assert!(err.to_string().contains("unsupported secret source"));

        let config = Config::parse("secrets:\n  token: env:UPUPUP_TEST_TOKEN_UNSET\n").unwrap();
        assert!(config.resolve_secrets().is_err());
    }
}
