//! Maintenance window evaluation.
//!
//! Two kinds: a closed-open timestamp range parsed in the service timezone
//! at minute resolution, and a cron expression whose most recent firing
//! opens a window of `duration`.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use upupup_common::{MaintenanceKind, MaintenanceSpec};

const RANGE_LAYOUT: &str = "%Y-%m-%dT%H:%M";

#[derive(Debug, Clone)]
pub enum MaintenanceWindow {
    Range {
        start: DateTime<Tz>,
        end: DateTime<Tz>,
    },
    Cron {
        schedule: cron::Schedule,
        duration: Duration,
    },
}

impl MaintenanceWindow {
    pub fn contains(&self, t: DateTime<Tz>) -> bool {
        match self {
            MaintenanceWindow::Range { start, end } => t >= *start && t < *end,
            MaintenanceWindow::Cron { schedule, duration } => {
                let Ok(span) = chrono::Duration::from_std(*duration) else {
                    return false;
                };
                match schedule.after(&(t - span)).next() {
                    Some(prev) => prev <= t && t - prev <= span,
                    None => false,
                }
            }
        }
    }
}

/// Parses configured maintenance specs. The cron window duration defaults to
/// the service interval, or one hour when that is zero.
pub fn parse_windows(
    specs: &[MaintenanceSpec],
    tz: Tz,
    default_duration: Duration,
) -> Result<Vec<MaintenanceWindow>> {
    let duration = if default_duration.is_zero() {
        Duration::from_secs(3600)
    } else {
        default_duration
    };
    specs
        .iter()
        .map(|spec| match spec.kind {
            MaintenanceKind::Range => parse_range(&spec.expr, tz),
            MaintenanceKind::Cron => {
                let schedule = cron::Schedule::from_str(&with_seconds_field(&spec.expr))
                    .with_context(|| format!("parse cron {:?}", spec.expr))?;
                Ok(MaintenanceWindow::Cron { schedule, duration })
            }
        })
        .collect()
}

/// The cron crate wants a seconds field; operators write the standard five.
fn with_seconds_field(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

fn parse_range(expr: &str, tz: Tz) -> Result<MaintenanceWindow> {
    let (start, end) = split_range(expr).ok_or_else(|| anyhow!("invalid range {expr:?}"))?;
    let start = parse_local(&start, tz).context("parse range start")?;
    let end = parse_local(&end, tz).context("parse range end")?;
    Ok(MaintenanceWindow::Range { start, end })
}

/// Splits `YYYY-MM-DDTHH:MM-YYYY-MM-DDTHH:MM` on the separating dash, which
/// is the fourth one.
fn split_range(expr: &str) -> Option<(String, String)> {
    let chunks: Vec<&str> = expr.splitn(6, '-').collect();
    if chunks.len() < 6 {
        return None;
    }
    Some((chunks[..3].join("-"), chunks[3..].join("-")))
}

fn parse_local(raw: &str, tz: Tz) -> Result<DateTime<Tz>> {
    let naive = NaiveDateTime::parse_from_str(raw, RANGE_LAYOUT)?;
    tz.from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| bail_time(raw))
}

fn bail_time(raw: &str) -> anyhow::Error {
    anyhow!("timestamp {raw:?} does not exist in the configured timezone")
}
