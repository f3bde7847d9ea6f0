//! Metrics evaluation engine.
//!
//! Reads the latest node snapshot from the shared store, parses it as
//! Prometheus text exposition and evaluates labelled thresholds, including
//! computed metrics defined as arithmetic expressions over variable
//! references.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use evalexpr::{ContextWithMutableVariables, HashMapContext, Value as EvalValue};
use prometheus_parse::{Sample, Scrape, Value};
use upupup_common::{CheckConfig, ComputedMetric, MetricReference, MetricThreshold};

use crate::compare::compare_floats;
use crate::{AssertionResult, CheckResult, Environment};

/// Samples grouped by family name. The sample value variant carries the
/// family type; histogram and summary samples are rejected when matched.
pub type MetricFamilies = HashMap<String, Vec<Sample>>;

pub(crate) async fn run(
    check: &CheckConfig,
    env: &Environment,
    started_at: DateTime<Utc>,
) -> CheckResult {
    let mut result = CheckResult::begin(check, started_at);

    let Some(store) = env.store.as_ref() else {
        return result.fail("metrics store not configured");
    };
    let Some(spec) = check.metrics.as_ref() else {
        return result.fail("metrics configuration missing");
    };
    if spec.thresholds.is_empty() {
        return result.fail("no metrics thresholds configured");
    }
    let Some(node_id) = check.metrics_node_id() else {
        return result.fail("node id or target is required for metrics check");
    };
    result
        .metadata
        .insert("node_id".into(), serde_json::json!(node_id));

    let snapshot = match store.latest_node_metrics(node_id) {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return result.fail(format!("no metrics available for node {node_id:?}")),
        Err(e) => return result.fail(format!("load node metrics: {e}")),
    };
    result.metadata.insert(
        "ingested_at".into(),
        serde_json::json!(snapshot.ingested_at.to_rfc3339()),
    );

    if let Some(max_age) = spec.max_age {
        if !max_age.is_zero() {
            let age = Utc::now() - snapshot.ingested_at;
            let stale = snapshot.ingested_at.timestamp_millis() == 0
                || age > chrono::Duration::from_std(max_age.0).unwrap_or(chrono::Duration::MAX);
            if stale {
                let assertion = AssertionResult {
                    kind: "freshness".into(),
                    op: "max_age".into(),
                    path: String::new(),
                    passed: false,
                    message: format!(
                        "metrics older than {}",
                        humantime::format_duration(max_age.0)
                    ),
                };
                return result.finish(vec![assertion]);
            }
        }
    }

    let families = match parse_metric_families(&snapshot.payload) {
        Ok(families) => families,
        Err(e) => return result.fail(format!("parse metrics payload: {e}")),
    };

    let mut cache: ComputedCache = HashMap::new();
    let assertions = spec
        .thresholds
        .iter()
        .map(|threshold| evaluate_threshold(&families, &spec.computed, &mut cache, threshold))
        .collect();
    result.finish(assertions)
}

/// Parses a text-exposition payload into families keyed by sample name.
pub fn parse_metric_families(payload: &str) -> anyhow::Result<MetricFamilies> {
    let lines = payload.lines().map(|line| Ok(line.to_string()));
    let scrape = Scrape::parse(lines)?;
    let mut families: MetricFamilies = HashMap::new();
    for sample in scrape.samples {
        families.entry(sample.metric.clone()).or_default().push(sample);
    }
    Ok(families)
}

type ComputedCache = HashMap<String, Result<f64, String>>;

/// Evaluates one threshold against parsed families, resolving computed
/// metrics through the per-evaluation cache.
pub fn evaluate_threshold(
    families: &MetricFamilies,
    computed: &HashMap<String, ComputedMetric>,
    cache: &mut ComputedCache,
    threshold: &MetricThreshold,
) -> AssertionResult {
    let mut outcome = AssertionResult {
        kind: threshold.name.clone(),
        op: threshold.op.clone(),
        path: format_label_set(&threshold.labels),
        passed: false,
        message: String::new(),
    };
    if threshold.name.trim().is_empty() {
        outcome.message = "metric name is required".into();
        return outcome;
    }

    if let Some(spec) = computed.get(&threshold.name) {
        if !spec_labels_compatible(spec, &threshold.labels) {
            outcome.message = "threshold labels do not match computed metric labels".into();
            return outcome;
        }
        return match resolve_computed(&threshold.name, families, computed, cache) {
            Err(message) => {
                outcome.message = message;
                outcome
            }
            Ok(value) => finish_numeric(outcome, value, threshold),
        };
    }

    let Some(samples) = families.get(&threshold.name) else {
        outcome.message = "metric not found".into();
        return outcome;
    };
    match find_sample_value(samples, &threshold.labels) {
        Err(message) => {
            outcome.message = message;
            outcome
        }
        Ok(None) => {
            outcome.message = "no series matched labels".into();
            outcome
        }
        Ok(Some(value)) => finish_numeric(outcome, value, threshold),
    }
}

fn finish_numeric(
    mut outcome: AssertionResult,
    value: f64,
    threshold: &MetricThreshold,
) -> AssertionResult {
    if compare_floats(value, threshold.value, &threshold.op) {
        outcome.passed = true;
    } else {
        outcome.message = format!(
            "value {:.4} not {} {:.4}",
            value, threshold.op, threshold.value
        );
    }
    outcome
}

fn resolve_computed(
    name: &str,
    families: &MetricFamilies,
    computed: &HashMap<String, ComputedMetric>,
    cache: &mut ComputedCache,
) -> Result<f64, String> {
    if let Some(cached) = cache.get(name) {
        return cached.clone();
    }
    let resolved = resolve_computed_uncached(name, families, computed);
    cache.insert(name.to_string(), resolved.clone());
    resolved
}

fn resolve_computed_uncached(
    name: &str,
    families: &MetricFamilies,
    computed: &HashMap<String, ComputedMetric>,
) -> Result<f64, String> {
    let spec = computed
        .get(name)
        .ok_or_else(|| format!("computed metric {name:?} not defined"))?;
    let expression = spec.expression.trim();
    if expression.is_empty() {
        return Err(format!("computed metric {name:?} missing expression"));
    }
    if spec.variables.is_empty() {
        return Err(format!("computed metric {name:?} has no variables"));
    }

    let mut context = HashMapContext::new();
    for (var_name, reference) in &spec.variables {
        if var_name.trim().is_empty() {
            return Err(format!("computed metric {name:?} has empty variable name"));
        }
        let value = resolve_reference(families, reference)
            .map_err(|e| format!("variable {var_name:?}: {e}"))?;
        context
            .set_value(var_name.clone(), EvalValue::Float(value))
            .map_err(|e| format!("bind variable {var_name:?}: {e}"))?;
    }

    let tree = evalexpr::build_operator_tree(expression)
        .map_err(|e| format!("parse expression: {e}"))?;
    let value = tree
        .eval_with_context(&context)
        .map_err(|e| format!("evaluate expression: {e}"))?;
    let value = value
        .as_number()
        .map_err(|_| "expression result is not a finite number".to_string())?;
    if !value.is_finite() {
        return Err("expression result is not a finite number".to_string());
    }
    Ok(value)
}

fn resolve_reference(
    families: &MetricFamilies,
    reference: &MetricReference,
) -> Result<f64, String> {
    if reference.metric_name.trim().is_empty() {
        return Err("metric name is required".to_string());
    }
    let Some(samples) = families.get(&reference.metric_name) else {
        if let Some(default) = reference.default {
            return Ok(default);
        }
        return Err(format!("metric {:?} not found", reference.metric_name));
    };
    match find_sample_value(samples, &reference.labels)? {
        Some(value) => Ok(value),
        None => {
            if let Some(default) = reference.default {
                Ok(default)
            } else {
                Err(format!(
                    "no series matched labels {}",
                    format_label_set(&reference.labels)
                ))
            }
        }
    }
}

/// Returns the first sample whose labels are a superset of `expected`.
fn find_sample_value(
    samples: &[Sample],
    expected: &HashMap<String, String>,
) -> Result<Option<f64>, String> {
    for sample in samples {
        let matches = expected
            .iter()
            .all(|(key, value)| sample.labels.get(key.as_str()) == Some(value.as_str()));
        if !matches {
            continue;
        }
        return match &sample.value {
            Value::Counter(v) | Value::Gauge(v) | Value::Untyped(v) => Ok(Some(*v)),
            Value::Histogram(_) => Err("unsupported metric type histogram".to_string()),
            Value::Summary(_) => Err("unsupported metric type summary".to_string()),
        };
    }
    Ok(None)
}

fn spec_labels_compatible(spec: &ComputedMetric, labels: &HashMap<String, String>) -> bool {
    spec.labels.is_empty() || spec.labels == *labels
}

fn format_label_set(labels: &HashMap<String, String>) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let mut keys: Vec<&String> = labels.keys().collect();
    keys.sort();
    let parts: Vec<String> = keys
        .iter()
        .map(|key| format!("{}=\"{}\"", key, labels[*key]))
        .collect();
    format!("{{{}}}", parts.join(","))
}
