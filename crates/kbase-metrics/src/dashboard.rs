//! KPI calculation and terminal rendering for the metrics dashboard.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use kbase_core::{ErrorSeverity, KbError, MetricTargets};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::{ErrorMetrics, ErrorRecord, ErrorReport, TrendDirection, ERROR_JSON};
use crate::triage::{TriageStats, TRIAGE_JSON};
use crate::usage::{UsageMetrics, UsageReport, USAGE_JSON};
use crate::{by_count_desc, percent};

/// Everything the dashboard can show; each source is optional.
#[derive(Debug, Clone, Default)]
pub struct MetricsBundle {
    pub usage: Option<UsageReport>,
    pub errors: Option<ErrorReport>,
    pub triage: Option<TriageStats>,
}

impl MetricsBundle {
    /// Load whichever of the three stats files exist in `dir`.
    ///
    /// A file that exists but does not parse is skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Io`] if an existing file cannot be read.
    pub fn load(dir: &Path) -> Result<Self, KbError> {
        Ok(Self {
            usage: load_optional(&dir.join(USAGE_JSON))?,
            errors: load_optional(&dir.join(ERROR_JSON))?,
            triage: load_optional(&dir.join(TRIAGE_JSON))?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.usage.is_none() && self.errors.is_none() && self.triage.is_none()
    }

    /// Fixed sample figures for demos, with a random error list behind them.
    pub fn simulated<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let now = kbase_core::now_iso();

        let plugins: BTreeMap<String, u64> = [
            ("component-developer", 85),
            ("error-reporter", 45),
            ("triage", 35),
            ("knowledge-base", 15),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let usage = UsageReport {
            generated_at: now.clone(),
            metrics: UsageMetrics {
                total_events: 450,
                total_plugins: 180,
                total_skills: 120,
                total_commands: 140,
                error_reports: 10,
                date_range_days: 30,
                avg_events_per_day: 15.0,
                ..UsageMetrics::default()
            },
            plugins,
            ..UsageReport::default()
        };

        let mut errors = Vec::with_capacity(50);
        if let (Ok(severities), Ok(statuses)) = (
            WeightedIndex::new([5u32, 15, 40, 40]),
            WeightedIndex::new([75u32, 15, 10]),
        ) {
            for i in 0..50 {
                let severity = ErrorSeverity::ALL[severities.sample(rng)];
                let status = ["resolved", "open", "investigating"][statuses.sample(rng)];
                let mut extra = serde_json::Map::new();
                if status == "resolved" {
                    let (lo, hi) = match severity {
                        ErrorSeverity::Critical => (0.5, 4.0),
                        ErrorSeverity::High => (2.0, 12.0),
                        _ => (4.0, 48.0),
                    };
                    let hours: f64 = rng.gen_range(lo..hi);
                    extra.insert("resolution_time".into(), Value::from(hours));
                }
                errors.push(ErrorRecord {
                    id: Some(Value::String(format!("error-{}", i + 1))),
                    severity: Some(severity.as_str().to_string()),
                    status: Some(status.to_string()),
                    extra,
                    ..ErrorRecord::default()
                });
            }
        }

        let by_severity: BTreeMap<String, u64> = [("critical", 3), ("high", 8), ("medium", 20), ("low", 19)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let error_report = ErrorReport {
            generated_at: now.clone(),
            metrics: ErrorMetrics {
                total_errors: 50,
                total_resolved: 38,
                resolution_rate: 76.0,
                avg_resolution_time_hours: 18.5,
                date_range_days: 30,
                avg_errors_per_day: 1.67,
                by_severity,
                trend_direction: TrendDirection::Decreasing,
                error_trend_percentage: -15.5,
                ..ErrorMetrics::default()
            },
            errors,
            ..ErrorReport::default()
        };

        let triage = TriageStats {
            generated_at: now,
            total_issues: 120,
            triaged_issues: 95,
            high_confidence_issues: 62,
            triage_accuracy: 84.2,
            avg_confidence_score: 0.73,
            prs_created: 45,
            prs_merged: 34,
            pr_merge_rate: 75.6,
            time_saved_hours: 18.5,
            ..TriageStats::default()
        };

        Self {
            usage: Some(usage),
            errors: Some(error_report),
            triage: Some(triage),
        }
    }
}

fn load_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, KbError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    match serde_json::from_str(&raw) {
        Ok(v) => {
            tracing::debug!(path = %path.display(), "loaded metrics file");
            Ok(Some(v))
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable metrics file");
            Ok(None)
        }
    }
}

/// Key performance indicators derived from a bundle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Kpis {
    pub triage_accuracy: f64,
    pub high_confidence_rate: f64,
    pub pr_merge_rate: f64,
    pub time_saved_monthly: f64,
    pub error_resolution_rate: f64,
    pub error_trend: String,
    pub total_events: u64,
    pub plugin_usage: u64,
    pub total_errors: u64,
    pub avg_resolution_time: f64,
}

impl Kpis {
    /// Rates are recomputed from raw counts; zero denominators give 0.
    pub fn from_bundle(bundle: &MetricsBundle) -> Self {
        let mut kpis = Kpis {
            error_trend: TrendDirection::Unknown.to_string(),
            ..Kpis::default()
        };

        if let Some(t) = &bundle.triage {
            kpis.triage_accuracy = t.triage_accuracy;
            kpis.high_confidence_rate =
                percent(t.high_confidence_issues as f64, t.total_issues as f64);
            kpis.pr_merge_rate = percent(t.prs_merged as f64, t.prs_created as f64);
            kpis.time_saved_monthly = t.time_saved_hours;
        }
        if let Some(e) = &bundle.errors {
            kpis.error_resolution_rate = e.metrics.resolution_rate;
            kpis.error_trend = e.metrics.trend_direction.to_string();
            kpis.total_errors = e.metrics.total_errors;
            kpis.avg_resolution_time = e.metrics.avg_resolution_time_hours;
        }
        if let Some(u) = &bundle.usage {
            kpis.total_events = u.metrics.total_events;
            kpis.plugin_usage = u.metrics.total_plugins;
        }
        kpis
    }
}

/// How a value compares to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Good,
    Warn,
    Bad,
}

/// Good at or past target, warn within 20% of it, bad beyond.
///
/// # Examples
///
/// ```
/// use kbase_metrics::dashboard::status_level;
/// use kbase_metrics::StatusLevel;
///
/// assert_eq!(status_level(80.0, 80.0, true), StatusLevel::Good);
/// assert_eq!(status_level(64.0, 80.0, true), StatusLevel::Warn);
/// assert_eq!(status_level(63.9, 80.0, true), StatusLevel::Bad);
/// assert_eq!(status_level(11.0, 10.0, false), StatusLevel::Warn);
/// ```
pub fn status_level(value: f64, target: f64, higher_is_better: bool) -> StatusLevel {
    if higher_is_better {
        if value >= target {
            StatusLevel::Good
        } else if value >= target * 0.8 {
            StatusLevel::Warn
        } else {
            StatusLevel::Bad
        }
    } else if value <= target {
        StatusLevel::Good
    } else if value <= target * 1.2 {
        StatusLevel::Warn
    } else {
        StatusLevel::Bad
    }
}

/// Text bar of `width` cells filled in proportion to `value / target`, capped at full.
///
/// # Examples
///
/// ```
/// use kbase_metrics::dashboard::progress_bar;
///
/// assert_eq!(progress_bar(50.0, 100.0, 4), "██░░");
/// assert_eq!(progress_bar(500.0, 100.0, 4), "████");
/// assert_eq!(progress_bar(5.0, 0.0, 4), "░░░░");
/// ```
pub fn progress_bar(value: f64, target: f64, width: usize) -> String {
    let ratio = if target > 0.0 {
        (value / target).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let filled = (width as f64 * ratio).floor() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

struct Palette {
    reset: &'static str,
    bold: &'static str,
    green: &'static str,
    yellow: &'static str,
    red: &'static str,
    blue: &'static str,
    cyan: &'static str,
}

impl Palette {
    fn new(color: bool) -> Self {
        if color {
            Self {
                reset: "\x1b[0m",
                bold: "\x1b[1m",
                green: "\x1b[92m",
                yellow: "\x1b[93m",
                red: "\x1b[91m",
                blue: "\x1b[94m",
                cyan: "\x1b[96m",
            }
        } else {
            Self {
                reset: "",
                bold: "",
                green: "",
                yellow: "",
                red: "",
                blue: "",
                cyan: "",
            }
        }
    }

    fn status(&self, level: StatusLevel) -> &'static str {
        match level {
            StatusLevel::Good => self.green,
            StatusLevel::Warn => self.yellow,
            StatusLevel::Bad => self.red,
        }
    }
}

/// Render the dashboard for a terminal. ANSI colours only when `color` is set.
pub fn render_terminal(bundle: &MetricsBundle, targets: &MetricTargets, color: bool) -> String {
    let kpis = Kpis::from_bundle(bundle);
    let p = Palette::new(color);
    let wide = "=".repeat(80);
    let thin = "-".repeat(80);
    let mut out = String::new();

    let _ = writeln!(out, "{}{}{wide}", p.bold, p.cyan);
    let _ = writeln!(out, "SELF-HEALING KNOWLEDGE BASE DASHBOARD");
    let _ = writeln!(out, "{wide}{}", p.reset);
    let _ = writeln!(
        out,
        "\n{}Generated:{} {}",
        p.bold,
        p.reset,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(u) = &bundle.usage {
        let _ = writeln!(
            out,
            "{}Data Period:{} Last {} days",
            p.bold, p.reset, u.metrics.date_range_days
        );
    }

    let _ = writeln!(out, "\n{}{}KEY PERFORMANCE INDICATORS{}", p.bold, p.blue, p.reset);
    let _ = writeln!(out, "{thin}");

    let rows = [
        ("Triage Accuracy", kpis.triage_accuracy, targets.triage_accuracy, "%"),
        ("High-Confidence Issues", kpis.high_confidence_rate, targets.high_confidence_rate, "%"),
        ("PR Merge Rate", kpis.pr_merge_rate, targets.pr_merge_rate, "%"),
        ("Time Saved (Monthly)", kpis.time_saved_monthly, targets.time_saved_monthly, " hours"),
    ];
    for (label, value, target, unit) in rows {
        let c = p.status(status_level(value, target, true));
        let _ = writeln!(out, "\n{}{label}:{}", p.bold, p.reset);
        if unit == "%" {
            let _ = writeln!(out, "  {c}{value:5.1}%{} (Target: {target:.0}%+)", p.reset);
        } else {
            let _ = writeln!(out, "  {c}{value:5.1}{unit}{} (Target: {target:.0}+{unit})", p.reset);
        }
        let _ = writeln!(out, "  [{}]", progress_bar(value, target, 40));
    }

    let _ = writeln!(out, "\n{}{}ADDITIONAL METRICS{}", p.bold, p.blue, p.reset);
    let _ = writeln!(out, "{thin}");
    let _ = writeln!(
        out,
        "\n{}Error Resolution Rate:{} {:.1}%",
        p.bold, p.reset, kpis.error_resolution_rate
    );
    let (trend_color, icon) = match kpis.error_trend.as_str() {
        "decreasing" => (p.green, "↓"),
        "increasing" => (p.red, "↑"),
        _ => (p.yellow, "→"),
    };
    let _ = writeln!(
        out,
        "{}Error Trend:{} {trend_color}{icon} {}{}",
        p.bold, p.reset, kpis.error_trend, p.reset
    );
    if kpis.avg_resolution_time > 0.0 {
        let _ = writeln!(
            out,
            "{}Avg Resolution Time:{} {:.1} hours",
            p.bold, p.reset, kpis.avg_resolution_time
        );
    }
    let _ = writeln!(out, "\n{}Total Events:{} {}", p.bold, p.reset, kpis.total_events);
    let _ = writeln!(out, "{}Plugin Usage:{} {} invocations", p.bold, p.reset, kpis.plugin_usage);
    let _ = writeln!(out, "{}Total Errors:{} {}", p.bold, p.reset, kpis.total_errors);

    if let Some(u) = bundle.usage.as_ref().filter(|u| !u.plugins.is_empty()) {
        let _ = writeln!(out, "\n{}{}PLUGIN USAGE{}", p.bold, p.blue, p.reset);
        let _ = writeln!(out, "{thin}");
        let total: u64 = u.plugins.values().sum();
        let max = u.plugins.values().copied().max().unwrap_or(0);
        for (name, count) in by_count_desc(&u.plugins).into_iter().take(5) {
            let _ = writeln!(
                out,
                "  {name:30} {count:4} [{}] {:5.1}%",
                progress_bar(*count as f64, max as f64, 30),
                percent(*count as f64, total as f64)
            );
        }
    }

    if let Some(e) = bundle.errors.as_ref().filter(|e| !e.metrics.by_severity.is_empty()) {
        let by_severity = &e.metrics.by_severity;
        let _ = writeln!(out, "\n{}{}ERROR SEVERITY{}", p.bold, p.blue, p.reset);
        let _ = writeln!(out, "{thin}");
        let total: u64 = by_severity.values().sum();
        let max = by_severity.values().copied().max().unwrap_or(0);
        for severity in ErrorSeverity::ALL {
            let count = by_severity.get(severity.as_str()).copied().unwrap_or(0);
            let c = match severity {
                ErrorSeverity::Critical => p.red,
                ErrorSeverity::High => p.yellow,
                ErrorSeverity::Medium => p.blue,
                ErrorSeverity::Low => p.green,
            };
            let _ = writeln!(
                out,
                "  {c}{:12}{} {count:4} [{}] {:5.1}%",
                severity.label(),
                p.reset,
                progress_bar(count as f64, max as f64, 30),
                percent(count as f64, total as f64)
            );
        }
    }

    let _ = writeln!(out, "\n{}{}{wide}{}", p.bold, p.cyan, p.reset);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;

    fn targets() -> MetricTargets {
        MetricTargets {
            triage_accuracy: 80.0,
            high_confidence_rate: 50.0,
            pr_merge_rate: 70.0,
            time_saved_monthly: 15.0,
        }
    }

    #[test]
    fn kpis_from_simulated_bundle() {
        let bundle = MetricsBundle::simulated(&mut StdRng::seed_from_u64(1));
        let kpis = Kpis::from_bundle(&bundle);
        assert!((kpis.triage_accuracy - 84.2).abs() < 1e-9);
        assert!((kpis.high_confidence_rate - 62.0 / 120.0 * 100.0).abs() < 1e-9);
        assert!((kpis.pr_merge_rate - 34.0 / 45.0 * 100.0).abs() < 1e-9);
        assert_eq!(kpis.error_trend, "decreasing");
        assert_eq!(kpis.total_events, 450);
        assert_eq!(kpis.plugin_usage, 180);
        assert_eq!(kpis.total_errors, 50);
        assert_eq!(bundle.errors.as_ref().unwrap().errors.len(), 50);
    }

    #[test]
    fn empty_bundle_has_zero_kpis() {
        let kpis = Kpis::from_bundle(&MetricsBundle::default());
        assert_eq!(kpis.high_confidence_rate, 0.0);
        assert_eq!(kpis.pr_merge_rate, 0.0);
        assert_eq!(kpis.error_trend, "unknown");
    }

    #[test]
    fn zero_denominators_do_not_divide() {
        let bundle = MetricsBundle {
            triage: Some(TriageStats::default()),
            ..MetricsBundle::default()
        };
        let kpis = Kpis::from_bundle(&bundle);
        assert_eq!(kpis.high_confidence_rate, 0.0);
        assert_eq!(kpis.pr_merge_rate, 0.0);
    }

    #[test]
    fn lower_is_better_levels() {
        assert_eq!(status_level(10.0, 10.0, false), StatusLevel::Good);
        assert_eq!(status_level(12.0, 10.0, false), StatusLevel::Warn);
        assert_eq!(status_level(12.1, 10.0, false), StatusLevel::Bad);
    }

    #[test]
    fn plain_terminal_has_sections_in_order() {
        let bundle = MetricsBundle::simulated(&mut StdRng::seed_from_u64(3));
        let text = render_terminal(&bundle, &targets(), false);
        assert!(!text.contains('\x1b'));

        let kpi = text.find("KEY PERFORMANCE INDICATORS").unwrap();
        let plugins = text.find("PLUGIN USAGE").unwrap();
        let severity = text.find("ERROR SEVERITY").unwrap();
        assert!(kpi < plugins && plugins < severity);

        let crit = text.find("Critical").unwrap();
        let high = text.find("High ").unwrap();
        let low = text.rfind("Low").unwrap();
        assert!(crit < high && high < low);
        assert!(text.contains("component-developer"));
        assert!(text.contains("↓ decreasing"));
    }

    #[test]
    fn colored_terminal_uses_ansi() {
        let bundle = MetricsBundle::simulated(&mut StdRng::seed_from_u64(3));
        assert!(render_terminal(&bundle, &targets(), true).contains("\x1b[92m"));
    }

    #[test]
    fn load_skips_missing_and_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(USAGE_JSON), "{ not json").unwrap();
        std::fs::write(
            dir.path().join(TRIAGE_JSON),
            r#"{"total_issues": 10, "high_confidence_issues": 4}"#,
        )
        .unwrap();

        let bundle = MetricsBundle::load(dir.path()).unwrap();
        assert!(bundle.usage.is_none());
        assert!(bundle.errors.is_none());
        let kpis = Kpis::from_bundle(&bundle);
        assert!((kpis.high_confidence_rate - 40.0).abs() < 1e-9);
    }
}
