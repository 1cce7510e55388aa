//! Error tracking: bucketing, resolution times and trend detection.

use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Timelike, Weekday};
use kbase_core::{ErrorSeverity, KbError};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{by_count_desc, csv, percent};

pub const ERROR_JSON: &str = "error-stats.json";
pub const ERROR_CSV: &str = "error-stats.csv";
pub const DAILY_ERRORS_CSV: &str = "daily-errors.csv";
pub const ERRORS_DETAIL_CSV: &str = "errors-detail.csv";

/// Minimum number of errors before a trend is reported.
const TREND_MIN_ERRORS: usize = 10;
/// Percentage change below which the trend counts as stable.
const TREND_THRESHOLD: f64 = 5.0;

const SIM_TYPES: [&str; 10] = [
    "TypeError",
    "ValueError",
    "AttributeError",
    "KeyError",
    "ImportError",
    "FileNotFoundError",
    "ConnectionError",
    "TimeoutError",
    "ConfigurationError",
    "ValidationError",
];
const SIM_CATEGORIES: [&str; 8] = [
    "configuration",
    "validation",
    "api",
    "database",
    "file-handling",
    "network",
    "auth",
    "data-processing",
];

/// One reported error. Fields beyond the known ones are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ErrorRecord {
    fn is_resolved(&self) -> bool {
        self.status.as_deref() == Some("resolved")
    }

    /// When the error happened: `timestamp`, else `reported_at`.
    fn occurred_at(&self) -> Option<DateTime<FixedOffset>> {
        self.timestamp
            .as_deref()
            .or(self.reported_at.as_deref())
            .and_then(parse_timestamp)
    }

    /// Hours from report to resolution, for resolved records with both times.
    fn resolution_hours(&self, reported_first: bool) -> Option<f64> {
        if !self.is_resolved() {
            return None;
        }
        let reported = if reported_first {
            self.reported_at.as_deref().or(self.timestamp.as_deref())
        } else {
            self.reported_at.as_deref()
        };
        let reported = parse_timestamp(reported?)?;
        let resolved = parse_timestamp(self.resolved_at.as_deref()?)?;
        Some((resolved - reported).num_seconds() as f64 / 3600.0)
    }
}

/// Parse ISO-8601 with `Z`, an explicit offset, or no offset (taken as UTC).
///
/// # Examples
///
/// ```
/// use kbase_metrics::errors::parse_timestamp;
///
/// assert!(parse_timestamp("2025-01-02T03:04:05Z").is_some());
/// assert!(parse_timestamp("2025-01-02T03:04:05+02:00").is_some());
/// assert!(parse_timestamp("2025-01-02T03:04:05.123456").is_some());
/// assert!(parse_timestamp("yesterday").is_none());
/// ```
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Direction of the error rate, recent half versus older half.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Decreasing,
    Increasing,
    Stable,
    Unknown,
    #[default]
    InsufficientData,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendDirection::Decreasing => write!(f, "decreasing"),
            TrendDirection::Increasing => write!(f, "increasing"),
            TrendDirection::Stable => write!(f, "stable"),
            TrendDirection::Unknown => write!(f, "unknown"),
            TrendDirection::InsufficientData => write!(f, "insufficient_data"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorMetrics {
    pub total_errors: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
    pub by_category: BTreeMap<String, u64>,
    pub avg_resolution_time_hours: f64,
    pub median_resolution_time_hours: f64,
    pub min_resolution_time_hours: f64,
    pub max_resolution_time_hours: f64,
    pub total_resolved: u64,
    pub resolution_rate: f64,
    pub first_error: Option<String>,
    pub last_error: Option<String>,
    pub date_range_days: i64,
    pub avg_errors_per_day: f64,
    pub error_trend_percentage: f64,
    pub trend_direction: TrendDirection,
}

/// Contents of `error-stats.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorReport {
    pub generated_at: String,
    pub metrics: ErrorMetrics,
    pub daily_errors: BTreeMap<String, u64>,
    pub errors: Vec<ErrorRecord>,
}

/// Error log input: a bare array or an object with an `errors` array.
#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorLog {
    List(Vec<ErrorRecord>),
    Wrapped { errors: Vec<ErrorRecord> },
}

/// Holds error records and derives statistics from them.
#[derive(Debug, Clone, Default)]
pub struct ErrorTracker {
    errors: Vec<ErrorRecord>,
}

impl ErrorTracker {
    pub fn new(errors: Vec<ErrorRecord>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    /// Load an error log. A missing file or an unexpected shape logs a
    /// warning and yields no errors.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Io`] on read failure and [`KbError::Serialization`]
    /// if the file is not JSON at all.
    pub fn from_log(path: &Path) -> Result<Self, KbError> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "error log not found");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&raw)?;
        match serde_json::from_value::<ErrorLog>(value) {
            Ok(ErrorLog::List(errors)) | Ok(ErrorLog::Wrapped { errors }) => {
                tracing::info!(count = errors.len(), "loaded error log");
                Ok(Self { errors })
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unexpected error log format");
                Ok(Self::default())
            }
        }
    }

    /// Generate `days` of errors ending at `now`.
    ///
    /// Weekdays get 2..=`errors_per_day` errors, weekends 1..=`errors_per_day / 2`.
    /// Resolution time grows as severity drops.
    pub fn simulate<R: Rng + ?Sized>(
        days: u32,
        errors_per_day: u32,
        now: NaiveDateTime,
        rng: &mut R,
    ) -> Self {
        let mut errors = Vec::new();
        let start = now - Duration::days(i64::from(days));
        let (Ok(severities), Ok(statuses)) = (
            WeightedIndex::new([5u32, 15, 40, 40]),
            WeightedIndex::new([70u32, 20, 10]),
        ) else {
            return Self::default();
        };

        for day in 0..days {
            let date = start + Duration::days(i64::from(day));
            let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
            let count = if weekend {
                rng.gen_range(1..=(errors_per_day / 2).max(1))
            } else {
                rng.gen_range(2..=errors_per_day.max(2))
            };

            for _ in 0..count {
                let at = date
                    .with_hour(rng.gen_range(8..=20))
                    .and_then(|d| d.with_minute(rng.gen_range(0..60)))
                    .unwrap_or(date);
                let severity = ErrorSeverity::ALL[severities.sample(rng)];
                let error_type = SIM_TYPES.choose(rng).copied().unwrap_or("Error");
                let category = SIM_CATEGORIES.choose(rng).copied().unwrap_or("api");
                let status = ["resolved", "open", "investigating"][statuses.sample(rng)];

                let resolved_at = (status == "resolved").then(|| {
                    let (lo, hi) = match severity {
                        ErrorSeverity::Critical => (0.5, 4.0),
                        ErrorSeverity::High => (2.0, 12.0),
                        ErrorSeverity::Medium => (4.0, 48.0),
                        ErrorSeverity::Low => (12.0, 168.0),
                    };
                    let hours: f64 = rng.gen_range(lo..hi);
                    let resolved = at + Duration::seconds((hours * 3600.0) as i64);
                    resolved.format("%Y-%m-%dT%H:%M:%S").to_string()
                });

                errors.push(ErrorRecord {
                    id: Some(Value::String(format!("error-{}", errors.len() + 1))),
                    error_type: Some(error_type.to_string()),
                    severity: Some(severity.as_str().to_string()),
                    category: Some(category.to_string()),
                    status: Some(status.to_string()),
                    reported_at: Some(at.format("%Y-%m-%dT%H:%M:%S").to_string()),
                    resolved_at,
                    message: Some(format!("Simulated {error_type} in {category}")),
                    ..ErrorRecord::default()
                });
            }
        }

        tracing::info!(count = errors.len(), days, "generated simulated errors");
        Self { errors }
    }

    /// Per-day counts keyed `YYYY-MM-DD`.
    pub fn daily_errors(&self) -> BTreeMap<String, u64> {
        let mut daily = BTreeMap::new();
        for error in &self.errors {
            if let Some(dt) = error.occurred_at() {
                *daily.entry(dt.format("%Y-%m-%d").to_string()).or_insert(0) += 1;
            }
        }
        daily
    }

    pub fn metrics(&self) -> ErrorMetrics {
        let total = self.errors.len();
        let mut m = ErrorMetrics {
            total_errors: total as u64,
            ..ErrorMetrics::default()
        };

        for e in &self.errors {
            bump(&mut m.by_type, e.error_type.as_deref().unwrap_or("unknown"));
            bump(&mut m.by_severity, e.severity.as_deref().unwrap_or("unknown"));
            bump(&mut m.by_status, e.status.as_deref().unwrap_or("open"));
            bump(&mut m.by_category, e.category.as_deref().unwrap_or("uncategorized"));
        }

        let mut hours: Vec<f64> = self
            .errors
            .iter()
            .filter_map(|e| e.resolution_hours(true))
            .collect();
        if !hours.is_empty() {
            hours.sort_by(|a, b| a.total_cmp(b));
            m.avg_resolution_time_hours = hours.iter().sum::<f64>() / hours.len() as f64;
            m.median_resolution_time_hours = hours[hours.len() / 2];
            m.min_resolution_time_hours = hours[0];
            m.max_resolution_time_hours = hours[hours.len() - 1];
            m.total_resolved = hours.len() as u64;
        }

        let resolved = m.by_status.get("resolved").copied().unwrap_or(0);
        m.resolution_rate = percent(resolved as f64, total as f64);

        let mut times: Vec<DateTime<FixedOffset>> =
            self.errors.iter().filter_map(|e| e.occurred_at()).collect();
        times.sort();
        if let (Some(first), Some(last)) = (times.first(), times.last()) {
            let range = (*last - *first).num_days() + 1;
            m.first_error = Some(first.to_rfc3339());
            m.last_error = Some(last.to_rfc3339());
            m.date_range_days = range;
            m.avg_errors_per_day = total as f64 / range.max(1) as f64;
        }

        let (pct, direction) = trend(total, &self.daily_errors());
        m.error_trend_percentage = pct;
        m.trend_direction = direction;
        m
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            generated_at: kbase_core::now_iso(),
            metrics: self.metrics(),
            daily_errors: self.daily_errors(),
            errors: self.errors.clone(),
        }
    }

    /// Write the JSON report and the three CSV files into `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Io`] if the directory or files cannot be written.
    pub fn write_outputs(&self, dir: &Path) -> Result<Vec<PathBuf>, KbError> {
        std::fs::create_dir_all(dir)?;
        let report = self.report();
        let m = &report.metrics;

        let json_path = dir.join(ERROR_JSON);
        std::fs::write(&json_path, serde_json::to_string_pretty(&report)?)?;

        let mut rows: Vec<Vec<String>> =
            vec![vec!["Category".into(), "Subcategory".into(), "Count".into()]];
        for (label, map) in [
            ("Type", &m.by_type),
            ("Severity", &m.by_severity),
            ("Status", &m.by_status),
            ("Category", &m.by_category),
        ] {
            for (name, count) in by_count_desc(map) {
                rows.push(vec![label.into(), name.clone(), count.to_string()]);
            }
        }
        let csv_path = dir.join(ERROR_CSV);
        csv::write_csv(&csv_path, rows)?;

        let daily_path = dir.join(DAILY_ERRORS_CSV);
        let daily = std::iter::once(vec!["Date".to_string(), "Error Count".to_string()]).chain(
            report
                .daily_errors
                .iter()
                .map(|(date, count)| vec![date.clone(), count.to_string()]),
        );
        csv::write_csv(&daily_path, daily)?;

        let detail_path = dir.join(ERRORS_DETAIL_CSV);
        let header = [
            "ID",
            "Type",
            "Severity",
            "Category",
            "Status",
            "Reported At",
            "Resolved At",
            "Resolution Time (hours)",
            "Message",
        ];
        let detail = std::iter::once(header.iter().map(|h| h.to_string()).collect::<Vec<String>>()).chain(
            self.errors.iter().map(|e| {
                vec![
                    e.id.as_ref().map(id_text).unwrap_or_default(),
                    e.error_type.clone().unwrap_or_default(),
                    e.severity.clone().unwrap_or_default(),
                    e.category.clone().unwrap_or_default(),
                    e.status.clone().unwrap_or_default(),
                    e.reported_at.clone().unwrap_or_default(),
                    e.resolved_at.clone().unwrap_or_default(),
                    e.resolution_hours(false)
                        .map(|h| format!("{h:.2}"))
                        .unwrap_or_default(),
                    e.message
                        .as_deref()
                        .unwrap_or("")
                        .chars()
                        .take(100)
                        .collect(),
                ]
            }),
        );
        csv::write_csv(&detail_path, detail)?;

        Ok(vec![json_path, csv_path, daily_path, detail_path])
    }

    pub fn render_summary(&self) -> String {
        let m = self.metrics();
        let total = m.total_errors as f64;
        let rule = "=".repeat(60);
        let mut out = String::new();

        let _ = writeln!(out, "{rule}\nERROR STATISTICS SUMMARY\n{rule}");
        let _ = writeln!(out, "\nTotal Errors: {}", m.total_errors);
        if let (Some(first), Some(last)) = (&m.first_error, &m.last_error) {
            let _ = writeln!(out, "Date Range: {} to {}", &first[..10], &last[..10]);
            let _ = writeln!(out, "Duration: {} days", m.date_range_days);
            let _ = writeln!(out, "Avg Errors/Day: {:.1}", m.avg_errors_per_day);
        }

        let _ = writeln!(out, "\n--- Error Trend ---");
        let _ = writeln!(out, "Trend: {}", m.trend_direction);
        if m.error_trend_percentage != 0.0 {
            let _ = writeln!(
                out,
                "Change: {:+.1}% (recent vs older period)",
                m.error_trend_percentage
            );
        }

        let _ = writeln!(out, "\n--- By Severity ---");
        for severity in ErrorSeverity::ALL {
            let count = m.by_severity.get(severity.as_str()).copied().unwrap_or(0);
            let _ = writeln!(
                out,
                "  {:12} {count:4} ({:5.1}%)",
                severity.label(),
                percent(count as f64, total)
            );
        }

        let _ = writeln!(out, "\n--- By Status ---");
        for (status, count) in by_count_desc(&m.by_status) {
            let _ = writeln!(
                out,
                "  {:12} {count:4} ({:5.1}%)",
                capitalize(status),
                percent(*count as f64, total)
            );
        }

        let _ = writeln!(out, "\n--- Resolution Metrics ---");
        let _ = writeln!(out, "Resolution Rate: {:.1}%", m.resolution_rate);
        let _ = writeln!(out, "Total Resolved: {}", m.total_resolved);
        if m.total_resolved > 0 {
            let _ = writeln!(out, "Avg Resolution Time: {:.1} hours", m.avg_resolution_time_hours);
            let _ = writeln!(out, "Median Resolution Time: {:.1} hours", m.median_resolution_time_hours);
            let _ = writeln!(out, "Min Resolution Time: {:.1} hours", m.min_resolution_time_hours);
            let _ = writeln!(out, "Max Resolution Time: {:.1} hours", m.max_resolution_time_hours);
        }

        let _ = writeln!(out, "\n--- By Type (Top 10) ---");
        for (name, count) in by_count_desc(&m.by_type).into_iter().take(10) {
            let _ = writeln!(out, "  {name:30} {count:4} ({:5.1}%)", percent(*count as f64, total));
        }

        let _ = writeln!(out, "\n--- By Category ---");
        for (name, count) in by_count_desc(&m.by_category) {
            let _ = writeln!(out, "  {name:30} {count:4} ({:5.1}%)", percent(*count as f64, total));
        }

        let _ = writeln!(out, "\n{rule}");
        out
    }
}

/// Compare the per-day average of the later half of active days with the earlier half.
fn trend(total: usize, daily: &BTreeMap<String, u64>) -> (f64, TrendDirection) {
    if total < TREND_MIN_ERRORS || daily.is_empty() {
        return (0.0, TrendDirection::InsufficientData);
    }
    let counts: Vec<u64> = daily.values().copied().collect();
    let (older, recent) = counts.split_at(counts.len() / 2);

    let avg = |s: &[u64]| {
        if s.is_empty() {
            0.0
        } else {
            s.iter().sum::<u64>() as f64 / s.len() as f64
        }
    };
    let (older_avg, recent_avg) = (avg(older), avg(recent));
    if older_avg <= 0.0 {
        return (0.0, TrendDirection::Unknown);
    }

    let pct = (recent_avg - older_avg) / older_avg * 100.0;
    let direction = if pct < -TREND_THRESHOLD {
        TrendDirection::Decreasing
    } else if pct > TREND_THRESHOLD {
        TrendDirection::Increasing
    } else {
        TrendDirection::Stable
    };
    (pct, direction)
}

fn bump(map: &mut BTreeMap<String, u64>, key: &str) {
    *map.entry(key.to_string()).or_insert(0) += 1;
}

fn id_text(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;

    fn record(ts: &str, status: &str) -> ErrorRecord {
        ErrorRecord {
            reported_at: Some(ts.to_string()),
            status: Some(status.to_string()),
            ..ErrorRecord::default()
        }
    }

    #[test]
    fn defaults_fill_missing_buckets() {
        let tracker = ErrorTracker::new(vec![ErrorRecord::default()]);
        let m = tracker.metrics();
        assert_eq!(m.by_type["unknown"], 1);
        assert_eq!(m.by_severity["unknown"], 1);
        assert_eq!(m.by_status["open"], 1);
        assert_eq!(m.by_category["uncategorized"], 1);
        assert_eq!(m.trend_direction, TrendDirection::InsufficientData);
    }

    #[test]
    fn resolution_stats_use_upper_median() {
        let mut errors = Vec::new();
        for hours in [1, 3, 5, 7] {
            let mut e = record("2025-01-01T00:00:00Z", "resolved");
            e.resolved_at = Some(format!("2025-01-01T{hours:02}:00:00Z"));
            errors.push(e);
        }
        errors.push(record("2025-01-01T00:00:00Z", "open"));

        let m = ErrorTracker::new(errors).metrics();
        assert_eq!(m.total_resolved, 4);
        assert!((m.avg_resolution_time_hours - 4.0).abs() < 1e-9);
        assert!((m.median_resolution_time_hours - 5.0).abs() < 1e-9);
        assert!((m.min_resolution_time_hours - 1.0).abs() < 1e-9);
        assert!((m.max_resolution_time_hours - 7.0).abs() < 1e-9);
        assert!((m.resolution_rate - 80.0).abs() < 1e-9);
    }

    #[test]
    fn timestamp_formats() {
        let z = parse_timestamp("2025-01-02T03:04:05Z").unwrap();
        let naive = parse_timestamp("2025-01-02T03:04:05").unwrap();
        assert_eq!(z, naive);
        let offset = parse_timestamp("2025-01-02T05:04:05+02:00").unwrap();
        assert_eq!(offset, z);
        assert!(parse_timestamp("2025-01-02").is_some());
    }

    #[test]
    fn decreasing_trend_detected() {
        let mut errors = Vec::new();
        for day in 1..=4 {
            for _ in 0..4 {
                errors.push(record(&format!("2025-01-0{day}T10:00:00"), "open"));
            }
        }
        for day in 5..=8 {
            errors.push(record(&format!("2025-01-0{day}T10:00:00"), "open"));
        }
        let m = ErrorTracker::new(errors).metrics();
        assert_eq!(m.trend_direction, TrendDirection::Decreasing);
        assert!((m.error_trend_percentage + 75.0).abs() < 1e-9);
    }

    #[test]
    fn stable_and_unknown_trends() {
        let daily: BTreeMap<String, u64> = (1..=4).map(|d| (format!("2025-01-0{d}"), 3)).collect();
        assert_eq!(trend(12, &daily).1, TrendDirection::Stable);

        let single: BTreeMap<String, u64> = [("2025-01-01".to_string(), 12)].into();
        assert_eq!(trend(12, &single).1, TrendDirection::Unknown);
        assert_eq!(trend(9, &daily).1, TrendDirection::InsufficientData);
    }

    #[test]
    fn log_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("list.json");
        std::fs::write(&list, r#"[{"id": 1, "type": "KeyError", "custom": true}]"#).unwrap();
        let wrapped = dir.path().join("wrapped.json");
        std::fs::write(&wrapped, r#"{"errors": [{"id": "e1"}, {"id": "e2"}]}"#).unwrap();
        let odd = dir.path().join("odd.json");
        std::fs::write(&odd, r#"{"items": []}"#).unwrap();

        let t = ErrorTracker::from_log(&list).unwrap();
        assert_eq!(t.errors().len(), 1);
        assert_eq!(t.errors()[0].extra["custom"], Value::Bool(true));
        assert_eq!(ErrorTracker::from_log(&wrapped).unwrap().errors().len(), 2);
        assert!(ErrorTracker::from_log(&odd).unwrap().errors().is_empty());
        assert!(ErrorTracker::from_log(&dir.path().join("missing.json"))
            .unwrap()
            .errors()
            .is_empty());
    }

    #[test]
    fn simulation_shapes_records() {
        let mut rng = StdRng::seed_from_u64(42);
        let now = NaiveDate::from_ymd_opt(2025, 3, 31)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let t = ErrorTracker::simulate(30, 5, now, &mut rng);
        assert!(!t.errors().is_empty());
        for e in t.errors() {
            let at = parse_timestamp(e.reported_at.as_deref().unwrap()).unwrap();
            assert!((8..=20).contains(&at.hour()));
            assert_eq!(e.is_resolved(), e.resolved_at.is_some());
            if let Some(h) = e.resolution_hours(false) {
                assert!(h > 0.0 && h <= 168.0);
            }
        }
        assert!(t.metrics().total_errors >= 30);
    }

    #[test]
    fn outputs_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolved = record("2025-01-01T00:00:00Z", "resolved");
        resolved.resolved_at = Some("2025-01-01T02:30:00Z".into());
        resolved.id = Some(Value::from(7));
        resolved.message = Some("x".repeat(150));
        let tracker = ErrorTracker::new(vec![resolved, record("2025-01-02T00:00:00Z", "open")]);

        tracker.write_outputs(dir.path()).unwrap();

        let detail = std::fs::read_to_string(dir.path().join(ERRORS_DETAIL_CSV)).unwrap();
        let row = detail.lines().nth(1).unwrap();
        assert!(row.starts_with("7,,,,resolved,"));
        assert!(row.contains(",2.50,"));
        assert!(row.ends_with(&"x".repeat(100)));

        let daily = std::fs::read_to_string(dir.path().join(DAILY_ERRORS_CSV)).unwrap();
        assert_eq!(daily, "Date,Error Count\r\n2025-01-01,1\r\n2025-01-02,1\r\n");

        let report: ErrorReport =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(ERROR_JSON)).unwrap())
                .unwrap();
        assert_eq!(report.metrics.total_errors, 2);
        assert_eq!(report.errors.len(), 2);
    }
}
