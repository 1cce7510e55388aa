//! Persistent triage statistics, read by the dashboard.

use std::path::Path;

use kbase_core::KbError;
use serde::{Deserialize, Serialize};

use crate::percent;

pub const TRIAGE_JSON: &str = "triage-stats.json";

/// Hours credited per successfully triaged issue.
const HOURS_PER_TRIAGE: f64 = 0.25;
/// Hours credited per merged automated fix.
const HOURS_PER_MERGED_FIX: f64 = 1.0;

/// Running totals of the self-healing loop.
///
/// The derived fields (`triage_accuracy`, `avg_confidence_score`,
/// `pr_merge_rate`, `time_saved_hours`) are recomputed on every update.
///
/// # Examples
///
/// ```
/// use kbase_metrics::TriageStats;
///
/// let mut stats = TriageStats::default();
/// stats.record_triage(Some(0.9), true);
/// stats.record_pr_created();
/// stats.record_pr_merged();
/// assert_eq!(stats.triaged_issues, 1);
/// assert_eq!(stats.pr_merge_rate, 100.0);
/// assert_eq!(stats.time_saved_hours, 1.25);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageStats {
    pub generated_at: String,
    pub total_issues: u64,
    pub triaged_issues: u64,
    pub high_confidence_issues: u64,
    pub triage_accuracy: f64,
    pub avg_confidence_score: f64,
    pub prs_created: u64,
    pub prs_merged: u64,
    pub pr_merge_rate: f64,
    pub time_saved_hours: f64,
    pub verdicts_correct: u64,
    pub verdicts_incorrect: u64,
    pub confidence_sum: f64,
}

impl TriageStats {
    /// Load from `path`; a missing file gives zeroed stats.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Io`] or [`KbError::Serialization`] if the file
    /// exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, KbError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write to `path` as pretty JSON, creating parent directories.
    pub fn save(&mut self, path: &Path) -> Result<(), KbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.generated_at = kbase_core::now_iso();
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Count a triage attempt. `confidence` is `None` when the model output
    /// could not be used; such issues count toward the total only.
    pub fn record_triage(&mut self, confidence: Option<f64>, high_band: bool) {
        self.total_issues += 1;
        if let Some(c) = confidence {
            self.triaged_issues += 1;
            self.confidence_sum += c;
            if high_band {
                self.high_confidence_issues += 1;
            }
        }
        self.recompute();
    }

    pub fn record_pr_created(&mut self) {
        self.prs_created += 1;
        self.recompute();
    }

    pub fn record_pr_merged(&mut self) {
        self.prs_merged += 1;
        self.recompute();
    }

    /// Record a maintainer's judgement of a triage decision.
    pub fn record_verdict(&mut self, correct: bool) {
        if correct {
            self.verdicts_correct += 1;
        } else {
            self.verdicts_incorrect += 1;
        }
        self.recompute();
    }

    fn recompute(&mut self) {
        let verdicts = self.verdicts_correct + self.verdicts_incorrect;
        self.triage_accuracy = percent(self.verdicts_correct as f64, verdicts as f64);
        self.avg_confidence_score = if self.triaged_issues > 0 {
            self.confidence_sum / self.triaged_issues as f64
        } else {
            0.0
        };
        self.pr_merge_rate = percent(self.prs_merged as f64, self.prs_created as f64);
        self.time_saved_hours = self.triaged_issues as f64 * HOURS_PER_TRIAGE
            + self.prs_merged as f64 * HOURS_PER_MERGED_FIX;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_triage_counts_toward_total_only() {
        let mut stats = TriageStats::default();
        stats.record_triage(None, false);
        stats.record_triage(Some(0.6), false);
        assert_eq!(stats.total_issues, 2);
        assert_eq!(stats.triaged_issues, 1);
        assert_eq!(stats.high_confidence_issues, 0);
        assert!((stats.avg_confidence_score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn accuracy_comes_from_verdicts() {
        let mut stats = TriageStats::default();
        assert_eq!(stats.triage_accuracy, 0.0);
        stats.record_verdict(true);
        stats.record_verdict(true);
        stats.record_verdict(true);
        stats.record_verdict(false);
        assert!((stats.triage_accuracy - 75.0).abs() < 1e-9);
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/triage-stats.json");
        assert_eq!(TriageStats::load(&path).unwrap(), TriageStats::default());

        let mut stats = TriageStats::default();
        stats.record_triage(Some(0.95), true);
        stats.save(&path).unwrap();

        let loaded = TriageStats::load(&path).unwrap();
        assert_eq!(loaded.high_confidence_issues, 1);
        assert!(!loaded.generated_at.is_empty());
    }

    #[test]
    fn older_files_without_verdict_fields_load() {
        let json = r#"{"total_issues": 120, "triaged_issues": 95, "triage_accuracy": 84.2}"#;
        let stats: TriageStats = serde_json::from_str(json).unwrap();
        assert_eq!(stats.total_issues, 120);
        assert_eq!(stats.verdicts_correct, 0);
        assert!((stats.triage_accuracy - 84.2).abs() < 1e-9);
    }
}
