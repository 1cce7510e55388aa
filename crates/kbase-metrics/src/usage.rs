//! Usage tracking from assistant session logs.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDateTime, Timelike, Weekday};
use kbase_core::KbError;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{by_count_desc, csv, percent};

pub const USAGE_JSON: &str = "usage-stats.json";
pub const USAGE_CSV: &str = "usage-stats.csv";
pub const DAILY_USAGE_CSV: &str = "daily-usage.csv";

static PLUGIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"plugin:(\w+)@([\w-]+)").expect("valid plugin regex"));
static SKILL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"skill:\s*"(\w+)""#).expect("valid skill regex"));
static COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(\w+(?:-\w+)*)").expect("valid command regex"));
static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4}-\d{2}-\d{2}[T\s]\d{2}:\d{2}:\d{2})").expect("valid timestamp regex")
});

const SIM_PLUGINS: [&str; 4] = ["component-developer", "error-reporter", "knowledge-base", "triage"];
const SIM_SKILLS: [&str; 4] = ["review", "fix", "analyze", "debug"];
const SIM_COMMANDS: [&str; 4] = ["review", "fix", "triage", "report-error"];

/// Summary figures derived from the raw counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageMetrics {
    pub total_events: u64,
    pub total_plugins: u64,
    pub total_skills: u64,
    pub total_commands: u64,
    pub error_reports: u64,
    pub unique_plugins: usize,
    pub unique_skills: usize,
    pub unique_commands: usize,
    pub first_event: Option<String>,
    pub last_event: Option<String>,
    pub date_range_days: i64,
    pub avg_events_per_day: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_used_plugin: Option<(String, u64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_used_skill: Option<(String, u64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_used_command: Option<(String, u64)>,
}

/// Contents of `usage-stats.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageReport {
    pub generated_at: String,
    pub metrics: UsageMetrics,
    pub plugins: BTreeMap<String, u64>,
    pub skills: BTreeMap<String, u64>,
    pub slash_commands: BTreeMap<String, u64>,
    pub daily_usage: BTreeMap<String, u64>,
    pub hourly_usage: BTreeMap<String, u64>,
}

/// Accumulates usage events from log lines or simulation.
///
/// # Examples
///
/// ```
/// use kbase_metrics::UsageTracker;
///
/// let mut tracker = UsageTracker::default();
/// tracker.parse_line(r#"2025-03-01 10:15:00 invoked plugin:triage@kbase-tools"#);
/// let metrics = tracker.metrics();
/// assert_eq!(metrics.total_plugins, 1);
/// assert_eq!(metrics.total_events, 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    plugins: BTreeMap<String, u64>,
    skills: BTreeMap<String, u64>,
    slash_commands: BTreeMap<String, u64>,
    error_reports: u64,
    timestamps: Vec<NaiveDateTime>,
    daily_usage: BTreeMap<String, u64>,
    hourly_usage: BTreeMap<String, u64>,
}

impl UsageTracker {
    /// Parse a log file. A missing file logs a warning and yields no events.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Io`] if the file exists but cannot be read.
    pub fn from_log(path: &Path) -> Result<Self, KbError> {
        let mut tracker = Self::default();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "log file not found");
            return Ok(tracker);
        }
        let content = std::fs::read_to_string(path)?;
        for line in content.lines() {
            tracker.parse_line(line);
        }
        tracing::info!(events = tracker.timestamps.len(), "parsed usage log");
        Ok(tracker)
    }

    /// Record every kind of event the line mentions.
    ///
    /// One line can count as a plugin call, a skill, a command and an error
    /// report at once; each match records the line's timestamp.
    pub fn parse_line(&mut self, line: &str) {
        if let Some(caps) = PLUGIN.captures(line) {
            *self.plugins.entry(caps[1].to_string()).or_insert(0) += 1;
            self.record_timestamp(line);
        }
        if let Some(caps) = SKILL.captures(line) {
            *self.skills.entry(caps[1].to_string()).or_insert(0) += 1;
            self.record_timestamp(line);
        }
        if let Some(caps) = COMMAND.captures(line) {
            *self.slash_commands.entry(caps[1].to_string()).or_insert(0) += 1;
            self.record_timestamp(line);
        }
        let lower = line.to_lowercase();
        if lower.contains("error-reporter") || lower.contains("report-error") {
            self.error_reports += 1;
            self.record_timestamp(line);
        }
    }

    fn record_timestamp(&mut self, line: &str) {
        let Some(caps) = TIMESTAMP.captures(line) else {
            return;
        };
        let raw = caps[1].replace('T', " ");
        if let Ok(dt) = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S") {
            self.record_event_time(dt);
        }
    }

    fn record_event_time(&mut self, dt: NaiveDateTime) {
        self.timestamps.push(dt);
        *self
            .daily_usage
            .entry(dt.format("%Y-%m-%d").to_string())
            .or_insert(0) += 1;
        *self
            .hourly_usage
            .entry(dt.format("%H:00").to_string())
            .or_insert(0) += 1;
    }

    /// Generate `days` of plausible usage ending at `now`.
    ///
    /// Weekdays get 5-15 events, weekends 1-5; working hours are weighted
    /// heavier than evenings and nights.
    pub fn simulate<R: Rng + ?Sized>(days: u32, now: NaiveDateTime, rng: &mut R) -> Self {
        let mut tracker = Self::default();
        let start = now - Duration::days(i64::from(days));

        let hour_weights: Vec<u32> = (0..24)
            .map(|h| match h {
                0..=7 => 1,
                8..=15 => 5,
                _ => 2,
            })
            .collect();
        let hours = WeightedIndex::new(&hour_weights).ok();
        let kinds = WeightedIndex::new([40u32, 30, 25, 5]).ok();
        let (Some(hours), Some(kinds)) = (hours, kinds) else {
            return tracker;
        };

        for day in 0..days {
            let date = start + Duration::days(i64::from(day));
            let weekend = matches!(date.weekday(), Weekday::Sat | Weekday::Sun);
            let events = if weekend {
                rng.gen_range(1..=5)
            } else {
                rng.gen_range(5..=15)
            };

            for _ in 0..events {
                let hour = hours.sample(rng) as u32;
                let minute = rng.gen_range(0..60);
                let at = date
                    .with_hour(hour)
                    .and_then(|d| d.with_minute(minute))
                    .unwrap_or(date);

                match kinds.sample(rng) {
                    0 => bump(&mut tracker.plugins, pick(&SIM_PLUGINS, rng)),
                    1 => bump(&mut tracker.skills, pick(&SIM_SKILLS, rng)),
                    2 => bump(&mut tracker.slash_commands, pick(&SIM_COMMANDS, rng)),
                    _ => tracker.error_reports += 1,
                }
                tracker.record_event_time(at);
            }
        }

        tracing::info!(events = tracker.timestamps.len(), days, "generated simulated usage");
        tracker
    }

    pub fn metrics(&self) -> UsageMetrics {
        let total_events = self.timestamps.len() as u64;
        let mut metrics = UsageMetrics {
            total_events,
            total_plugins: self.plugins.values().sum(),
            total_skills: self.skills.values().sum(),
            total_commands: self.slash_commands.values().sum(),
            error_reports: self.error_reports,
            unique_plugins: self.plugins.len(),
            unique_skills: self.skills.len(),
            unique_commands: self.slash_commands.len(),
            most_used_plugin: most_used(&self.plugins),
            most_used_skill: most_used(&self.skills),
            most_used_command: most_used(&self.slash_commands),
            ..UsageMetrics::default()
        };

        let first = self.timestamps.iter().min();
        let last = self.timestamps.iter().max();
        if let (Some(first), Some(last)) = (first, last) {
            let range = (*last - *first).num_days() + 1;
            metrics.first_event = Some(first.format("%Y-%m-%dT%H:%M:%S").to_string());
            metrics.last_event = Some(last.format("%Y-%m-%dT%H:%M:%S").to_string());
            metrics.date_range_days = range;
            metrics.avg_events_per_day = total_events as f64 / range.max(1) as f64;
        }
        metrics
    }

    pub fn report(&self) -> UsageReport {
        UsageReport {
            generated_at: kbase_core::now_iso(),
            metrics: self.metrics(),
            plugins: self.plugins.clone(),
            skills: self.skills.clone(),
            slash_commands: self.slash_commands.clone(),
            daily_usage: self.daily_usage.clone(),
            hourly_usage: self.hourly_usage.clone(),
        }
    }

    /// Write the JSON report and both CSV files into `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Io`] if the directory or files cannot be written.
    pub fn write_outputs(&self, dir: &Path) -> Result<Vec<PathBuf>, KbError> {
        std::fs::create_dir_all(dir)?;

        let json_path = dir.join(USAGE_JSON);
        std::fs::write(&json_path, serde_json::to_string_pretty(&self.report())?)?;

        let mut rows: Vec<Vec<String>> = vec![vec!["Category".into(), "Name".into(), "Count".into()]];
        for (label, map) in [
            ("Plugin", &self.plugins),
            ("Skill", &self.skills),
            ("Command", &self.slash_commands),
        ] {
            for (name, count) in by_count_desc(map) {
                rows.push(vec![label.into(), name.clone(), count.to_string()]);
            }
        }
        rows.push(vec![
            "Error Reports".into(),
            "Total".into(),
            self.error_reports.to_string(),
        ]);
        let csv_path = dir.join(USAGE_CSV);
        csv::write_csv(&csv_path, rows)?;

        let daily_path = dir.join(DAILY_USAGE_CSV);
        let daily = std::iter::once(vec!["Date".to_string(), "Events".to_string()]).chain(
            self.daily_usage
                .iter()
                .map(|(date, count)| vec![date.clone(), count.to_string()]),
        );
        csv::write_csv(&daily_path, daily)?;

        Ok(vec![json_path, csv_path, daily_path])
    }

    /// Human-readable summary with per-item shares.
    pub fn render_summary(&self) -> String {
        let m = self.metrics();
        let rule = "=".repeat(60);
        let mut out = String::new();

        let _ = writeln!(out, "{rule}\nUSAGE STATISTICS SUMMARY\n{rule}");
        let _ = writeln!(out, "\nTotal Events: {}", m.total_events);
        if let (Some(first), Some(last)) = (&m.first_event, &m.last_event) {
            let _ = writeln!(out, "Date Range: {} to {}", &first[..10], &last[..10]);
            let _ = writeln!(out, "Duration: {} days", m.date_range_days);
            let _ = writeln!(out, "Avg Events/Day: {:.1}", m.avg_events_per_day);
        }

        for (title, noun, total, unique, map) in [
            ("Plugins", "Plugin Invocations", m.total_plugins, m.unique_plugins, &self.plugins),
            ("Skills", "Skill Triggers", m.total_skills, m.unique_skills, &self.skills),
            ("Slash Commands", "Command Invocations", m.total_commands, m.unique_commands, &self.slash_commands),
        ] {
            let _ = writeln!(out, "\n--- {title} ---");
            let _ = writeln!(out, "Total {noun}: {total}");
            let _ = writeln!(out, "Unique {title}: {unique}");
            for (name, count) in by_count_desc(map) {
                let share = percent(*count as f64, total as f64);
                let _ = writeln!(out, "  {name:30} {count:4} ({share:5.1}%)");
            }
        }

        let _ = writeln!(out, "\n--- Error Reports ---");
        let _ = writeln!(out, "Total Error Reports: {}", m.error_reports);
        let _ = writeln!(out, "\n{rule}");
        out
    }
}

fn bump(map: &mut BTreeMap<String, u64>, key: &str) {
    *map.entry(key.to_string()).or_insert(0) += 1;
}

fn pick<'a, R: Rng + ?Sized>(items: &[&'a str], rng: &mut R) -> &'a str {
    items.choose(rng).copied().unwrap_or("unknown")
}

/// Highest count; ties go to the lexicographically smallest name.
fn most_used(map: &BTreeMap<String, u64>) -> Option<(String, u64)> {
    let mut best: Option<(&String, u64)> = None;
    for (name, &count) in map {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((name, count));
        }
    }
    best.map(|(n, c)| (n.clone(), c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand::rngs::StdRng;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn one_line_can_match_several_patterns() {
        let mut t = UsageTracker::default();
        t.parse_line("2025-03-01T09:30:00 plugin:errors@kbase /report-error called");
        let m = t.metrics();
        assert_eq!(m.total_plugins, 1);
        assert_eq!(m.total_commands, 1);
        assert_eq!(m.error_reports, 1);
        assert_eq!(m.total_events, 3);
        assert_eq!(t.daily_usage["2025-03-01"], 3);
        assert_eq!(t.hourly_usage["09:00"], 3);
    }

    #[test]
    fn lines_without_timestamp_count_but_are_not_events() {
        let mut t = UsageTracker::default();
        t.parse_line(r#"using skill: "review" now"#);
        let m = t.metrics();
        assert_eq!(m.total_skills, 1);
        assert_eq!(m.total_events, 0);
        assert!(m.first_event.is_none());
        assert_eq!(m.date_range_days, 0);
    }

    #[test]
    fn date_range_and_average() {
        let mut t = UsageTracker::default();
        t.parse_line("2025-03-01 10:00:00 plugin:a@x");
        t.parse_line("2025-03-01 11:00:00 plugin:a@x");
        t.parse_line("2025-03-04 10:00:00 plugin:b@x");
        let m = t.metrics();
        assert_eq!(m.date_range_days, 4);
        assert!((m.avg_events_per_day - 0.75).abs() < 1e-9);
        assert_eq!(m.first_event.as_deref(), Some("2025-03-01T10:00:00"));
        assert_eq!(m.most_used_plugin, Some(("a".to_string(), 2)));
    }

    #[test]
    fn most_used_ties_pick_smallest_name() {
        let mut map = BTreeMap::new();
        map.insert("zeta".to_string(), 3);
        map.insert("alpha".to_string(), 3);
        map.insert("mid".to_string(), 1);
        assert_eq!(most_used(&map), Some(("alpha".to_string(), 3)));
        assert_eq!(most_used(&BTreeMap::new()), None);
    }

    #[test]
    fn missing_log_is_empty_not_error() {
        let t = UsageTracker::from_log(Path::new("/no/such/usage.log")).unwrap();
        assert_eq!(t.metrics().total_events, 0);
    }

    #[test]
    fn simulation_respects_daily_bounds_and_invariant() {
        let mut rng = StdRng::seed_from_u64(7);
        // 2025-03-31 is a Monday; the window starts on Monday 2025-03-03.
        let now = at(2025, 3, 31, 12);
        let t = UsageTracker::simulate(28, now, &mut rng);

        for (date, count) in &t.daily_usage {
            let d = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
            if matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
                assert!((1..=5).contains(count), "{date}: {count}");
            } else {
                assert!((5..=15).contains(count), "{date}: {count}");
            }
        }
        let m = t.metrics();
        let daily_sum: u64 = t.daily_usage.values().sum();
        assert_eq!(daily_sum, m.total_events);
        assert_eq!(
            m.total_plugins + m.total_skills + m.total_commands + m.error_reports,
            m.total_events
        );
    }

    #[test]
    fn outputs_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = UsageTracker::default();
        t.parse_line("2025-03-01 10:00:00 plugin:triage@x");
        t.parse_line("2025-03-01 10:05:00 plugin:triage@x");
        t.parse_line("2025-03-02 10:00:00 plugin:docs@x");
        t.parse_line("2025-03-02 11:00:00 error-reporter fired");

        let written = t.write_outputs(dir.path()).unwrap();
        assert_eq!(written.len(), 3);

        let csv = std::fs::read_to_string(dir.path().join(USAGE_CSV)).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "Category,Name,Count");
        assert_eq!(lines[1], "Plugin,triage,2");
        assert_eq!(lines[2], "Plugin,docs,1");
        assert_eq!(*lines.last().unwrap(), "Error Reports,Total,1");

        let daily = std::fs::read_to_string(dir.path().join(DAILY_USAGE_CSV)).unwrap();
        assert_eq!(daily, "Date,Events\r\n2025-03-01,2\r\n2025-03-02,2\r\n");

        let report: UsageReport =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(USAGE_JSON)).unwrap())
                .unwrap();
        assert_eq!(report.metrics.total_events, 4);
        assert_eq!(report.plugins["triage"], 2);
    }

    #[test]
    fn summary_lists_shares() {
        let mut t = UsageTracker::default();
        t.parse_line("2025-03-01 10:00:00 plugin:triage@x");
        let summary = t.render_summary();
        assert!(summary.contains("USAGE STATISTICS SUMMARY"));
        assert!(summary.contains("100.0%"));
    }
}
