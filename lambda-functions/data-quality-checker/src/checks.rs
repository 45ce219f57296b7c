//! The five warehouse checks and how their outcomes roll up into one
//! health verdict.

use anyhow::{anyhow, Context};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// One result row from the warehouse. SQL NULL is `None`.
pub type Row = Vec<Option<String>>;

pub const RECORD_COUNT_SQL: &str = "SELECT COUNT(*) AS record_count \
FROM events WHERE processed_at >= CURRENT_TIMESTAMP - INTERVAL '1 hour'";

pub const FRESHNESS_SQL: &str = "SELECT MAX(processed_at) AS latest_processed FROM events";

pub const COMPLETENESS_SQL: &str = "SELECT \
COUNT(*) AS total_records, \
COUNT(CASE WHEN user_id IS NULL THEN 1 END) AS null_user_ids, \
COUNT(CASE WHEN event_type IS NULL THEN 1 END) AS null_event_types, \
COUNT(CASE WHEN timestamp IS NULL THEN 1 END) AS null_timestamps \
FROM events WHERE processed_at >= CURRENT_TIMESTAMP - INTERVAL '1 hour'";

pub const CONSISTENCY_SQL: &str = "SELECT COUNT(*) AS duplicate_groups FROM (\
SELECT user_id, event_type, timestamp FROM events \
WHERE processed_at >= CURRENT_TIMESTAMP - INTERVAL '1 hour' \
GROUP BY user_id, event_type, timestamp HAVING COUNT(*) > 1) duplicates";

pub const ANOMALY_SQL: &str = "SELECT DATE_TRUNC('minute', processed_at) AS minute, \
COUNT(*) AS event_count FROM events \
WHERE processed_at >= CURRENT_TIMESTAMP - INTERVAL '1 hour' \
GROUP BY DATE_TRUNC('minute', processed_at) ORDER BY minute";

pub const SPIKE_FACTOR: f64 = 2.0;
pub const DROP_FACTOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckName {
    RecordCount,
    DataFreshness,
    DataCompleteness,
    DataConsistency,
    AnomalyDetection,
}

impl CheckName {
    pub const ALL: [CheckName; 5] = [
        Self::RecordCount,
        Self::DataFreshness,
        Self::DataCompleteness,
        Self::DataConsistency,
        Self::AnomalyDetection,
    ];

    pub fn sql(&self) -> &'static str {
        match self {
            Self::RecordCount => RECORD_COUNT_SQL,
            Self::DataFreshness => FRESHNESS_SQL,
            Self::DataCompleteness => COMPLETENESS_SQL,
            Self::DataConsistency => CONSISTENCY_SQL,
            Self::AnomalyDetection => ANOMALY_SQL,
        }
    }
}

impl fmt::Display for CheckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecordCount => write!(f, "record_count_check"),
            Self::DataFreshness => write!(f, "data_freshness_check"),
            Self::DataCompleteness => write!(f, "data_completeness_check"),
            Self::DataConsistency => write!(f, "data_consistency_check"),
            Self::AnomalyDetection => write!(f, "anomaly_detection"),
        }
    }
}

impl Serialize for CheckName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Fail,
    Error,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub check_name: CheckName,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    fn passed_if(
        check_name: CheckName,
        healthy: bool,
        value: Value,
        threshold: Option<String>,
        message: String,
    ) -> Self {
        Self {
            check_name,
            status: if healthy {
                CheckStatus::Pass
            } else {
                CheckStatus::Fail
            },
            value,
            threshold,
            message: Some(message),
            error: None,
        }
    }

    pub fn error(check_name: CheckName, error: &anyhow::Error) -> Self {
        Self {
            check_name,
            status: CheckStatus::Error,
            value: Value::Null,
            threshold: None,
            message: None,
            error: Some(format!("{:#}", error)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub min_hourly_records: u64,
    pub max_hourly_records: u64,
    pub freshness_seconds: i64,
    pub min_completeness_percent: f64,
    pub max_duplicate_groups: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_hourly_records: 500,
            max_hourly_records: 2000,
            freshness_seconds: 300,
            min_completeness_percent: 95.0,
            max_duplicate_groups: 5,
        }
    }
}

fn cell(rows: &[Row], column: usize) -> Option<&str> {
    rows.first()?.get(column)?.as_deref()
}

fn number<T: FromStr>(rows: &[Row], column: usize) -> anyhow::Result<T> {
    let raw = cell(rows, column).ok_or_else(|| anyhow!("column {} is missing", column))?;
    raw.trim()
        .parse()
        .map_err(|_| anyhow!("column {} is not a number: {}", column, raw))
}

/// Reads a warehouse timestamp, either RFC 3339 or `YYYY-MM-DD HH:MM:SS`
/// taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

impl Thresholds {
    pub fn evaluate(
        &self,
        check: CheckName,
        rows: &[Row],
        now: DateTime<Utc>,
    ) -> anyhow::Result<CheckResult> {
        match check {
            CheckName::RecordCount => self.record_count(rows),
            CheckName::DataFreshness => self.freshness(rows, now),
            CheckName::DataCompleteness => self.completeness(rows),
            CheckName::DataConsistency => self.consistency(rows),
            CheckName::AnomalyDetection => anomalies(rows),
        }
    }

    fn record_count(&self, rows: &[Row]) -> anyhow::Result<CheckResult> {
        let count: u64 = number(rows, 0)?;
        let range = format!("{}-{}", self.min_hourly_records, self.max_hourly_records);
        Ok(CheckResult::passed_if(
            CheckName::RecordCount,
            (self.min_hourly_records..=self.max_hourly_records).contains(&count),
            json!(count),
            Some(range.clone()),
            format!("Record count: {} (expected: {})", count, range),
        ))
    }

    fn freshness(&self, rows: &[Row], now: DateTime<Utc>) -> anyhow::Result<CheckResult> {
        let threshold = format!("{} seconds", self.freshness_seconds);
        let Some(raw) = cell(rows, 0) else {
            return Ok(CheckResult::passed_if(
                CheckName::DataFreshness,
                false,
                Value::Null,
                Some(threshold),
                "No processed events found".to_string(),
            ));
        };

        let latest = parse_timestamp(raw)
            .with_context(|| format!("unreadable latest processed_at: {}", raw))?;
        let age = now.signed_duration_since(latest).num_seconds();
        Ok(CheckResult::passed_if(
            CheckName::DataFreshness,
            age < self.freshness_seconds,
            json!(latest.to_rfc3339()),
            Some(threshold.clone()),
            format!(
                "Latest data: {} (threshold: {})",
                latest.to_rfc3339(),
                threshold
            ),
        ))
    }

    fn completeness(&self, rows: &[Row]) -> anyhow::Result<CheckResult> {
        let total: u64 = number(rows, 0)?;
        let null_user_ids: u64 = number(rows, 1)?;
        let null_event_types: u64 = number(rows, 2)?;
        let null_timestamps: u64 = number(rows, 3)?;

        let missing = null_user_ids + null_event_types + null_timestamps;
        let completeness = if total == 0 {
            100.0
        } else {
            total.saturating_sub(missing) as f64 / total as f64 * 100.0
        };
        let threshold = format!("{}%", self.min_completeness_percent);

        let mut result = CheckResult::passed_if(
            CheckName::DataCompleteness,
            completeness >= self.min_completeness_percent,
            json!({
                "completeness": format!("{:.2}%", completeness),
                "total_records": total,
                "null_user_ids": null_user_ids,
                "null_event_types": null_event_types,
                "null_timestamps": null_timestamps,
            }),
            Some(threshold.clone()),
            format!(
                "Data completeness: {:.2}% (threshold: {})",
                completeness, threshold
            ),
        );
        if total == 0 {
            result.message = Some("No events in the last hour".to_string());
        }
        Ok(result)
    }

    fn consistency(&self, rows: &[Row]) -> anyhow::Result<CheckResult> {
        let duplicates: u64 = number(rows, 0)?;
        Ok(CheckResult::passed_if(
            CheckName::DataConsistency,
            duplicates <= self.max_duplicate_groups,
            json!(duplicates),
            Some(self.max_duplicate_groups.to_string()),
            format!(
                "Duplicate records: {} (threshold: {})",
                duplicates, self.max_duplicate_groups
            ),
        ))
    }
}

/// Flags a minute whose volume is more than twice the hourly average, or
/// less than half of it.
fn anomalies(rows: &[Row]) -> anyhow::Result<CheckResult> {
    let counts = rows
        .iter()
        .map(|row| {
            let raw = row
                .get(1)
                .and_then(Option::as_deref)
                .ok_or_else(|| anyhow!("event_count is missing"))?;
            raw.trim()
                .parse::<f64>()
                .map_err(|_| anyhow!("event_count is not a number: {}", raw))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let (avg, max, min) = if counts.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        (
            counts.iter().sum::<f64>() / counts.len() as f64,
            counts.iter().copied().fold(f64::MIN, f64::max),
            counts.iter().copied().fold(f64::MAX, f64::min),
        )
    };
    let has_spike = max > avg * SPIKE_FACTOR;
    let has_drop = min < avg * DROP_FACTOR;

    Ok(CheckResult::passed_if(
        CheckName::AnomalyDetection,
        !(has_spike || has_drop),
        json!({
            "avg_events_per_minute": avg,
            "max_events_per_minute": max,
            "min_events_per_minute": min,
            "has_spike": has_spike,
            "has_drop": has_drop,
        }),
        None,
        format!("Anomaly detected: spike={}, drop={}", has_spike, has_drop),
    ))
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OverallStatus {
    Healthy,
    Unhealthy,
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Unhealthy => write!(f, "UNHEALTHY"),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct QualityResults {
    pub has_issues: bool,
    pub total_checks: usize,
    pub passed_checks: usize,
    pub failed_checks: usize,
    pub error_checks: usize,
    pub failed_check_details: Vec<CheckResult>,
    pub error_check_details: Vec<CheckResult>,
    pub overall_status: OverallStatus,
}

impl QualityResults {
    pub fn analyze(checks: Vec<CheckResult>) -> Self {
        let total_checks = checks.len();
        let (failed, rest): (Vec<_>, Vec<_>) = checks
            .into_iter()
            .partition(|check| check.status == CheckStatus::Fail);
        let errored = rest
            .into_iter()
            .filter(|check| check.status == CheckStatus::Error)
            .collect::<Vec<_>>();

        let has_issues = !failed.is_empty() || !errored.is_empty();
        Self {
            has_issues,
            total_checks,
            passed_checks: total_checks - failed.len() - errored.len(),
            failed_checks: failed.len(),
            error_checks: errored.len(),
            failed_check_details: failed,
            error_check_details: errored,
            overall_status: if has_issues {
                OverallStatus::Unhealthy
            } else {
                OverallStatus::Healthy
            },
        }
    }

    /// True when no check could reach the warehouse at all.
    pub fn all_errored(&self) -> bool {
        self.total_checks > 0 && self.error_checks == self.total_checks
    }

    pub fn alert_subject(&self) -> String {
        format!("Data Quality Alert - {}", self.overall_status)
    }

    pub fn alert_message(&self, timestamp: &str) -> String {
        let pretty = |checks: &[CheckResult]| {
            serde_json::to_string_pretty(checks).unwrap_or_else(|_| "[]".to_string())
        };
        format!(
            "Data Quality Alert - {}\n\n\
Overall Status: {}\n\
Failed Checks: {}\n\
Error Checks: {}\n\n\
Failed Check Details:\n{}\n\n\
Error Check Details:\n{}\n\n\
Please investigate these data quality issues.",
            timestamp,
            self.overall_status,
            self.failed_checks,
            self.error_checks,
            pretty(&self.failed_check_details),
            pretty(&self.error_check_details),
        )
    }
}

pub fn checker_error_message(error: &str, timestamp: &str) -> String {
    format!(
        "Data Quality Checker Error - {}\n\n\
Error: {}\n\n\
The data quality checker encountered an error and could not complete its checks.\n\
Please investigate the issue.",
        timestamp, error
    )
}
