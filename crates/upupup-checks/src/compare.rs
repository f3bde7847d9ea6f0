//! Comparison helpers shared by assertions and the metrics evaluator.

use serde_json::Value;

/// Binary float comparison. Equality is exact; thresholds that need slack
/// should express it in the configured value.
pub fn compare_floats(actual: f64, expected: f64, op: &str) -> bool {
    match op.to_ascii_lowercase().as_str() {
        "equals" | "equal" | "==" => actual == expected,
        "not_equals" | "!=" => actual != expected,
        "less_than" | "<" => actual < expected,
        "greater_than" | ">" => actual > expected,
        _ => false,
    }
}

/// Non-numeric comparison via string formatting; only equality is supported.
pub fn compare_strings(actual: &Value, expected: &Value, op: &str) -> bool {
    match op.to_ascii_lowercase().as_str() {
        "equals" | "equal" | "==" => format_value(actual) == format_value(expected),
        _ => false,
    }
}

/// Renders a JSON value the way operators write it in config: bare scalars,
/// JSON syntax for everything else.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Coerces a configured assertion value into a float.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Coerces a configured assertion value into a string list.
pub fn value_as_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(format_value).collect(),
        Value::Null => Vec::new(),
        other => vec![format_value(other)],
    }
}

pub fn value_is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
