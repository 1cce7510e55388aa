use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Current UTC time as an RFC 3339 string with a `Z` suffix.
///
/// Used for every `generated_at` / `exported_at` field.
///
/// # Examples
///
/// ```
/// let ts = kbase_core::now_iso();
/// assert!(ts.ends_with('Z'));
/// ```
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Category an issue report is classified into during triage.
///
/// # Examples
///
/// ```
/// use kbase_core::IssueCategory;
///
/// assert_eq!(IssueCategory::lenient("Docs"), IssueCategory::Documentation);
/// assert_eq!(IssueCategory::lenient("whatever"), IssueCategory::Other);
/// assert_eq!(IssueCategory::FeatureRequest.to_string(), "feature-request");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueCategory {
    /// Documentation is wrong, unclear or incomplete.
    Documentation,
    /// Documentation describes behavior that has since changed.
    Outdated,
    /// A code example or tool is broken.
    Bug,
    /// The reporter is asking for help rather than reporting a defect.
    Question,
    /// Request for new content or tooling.
    FeatureRequest,
    /// Anything else.
    Other,
}

impl IssueCategory {
    /// Parse the loose spellings an LLM tends to produce; unknown input maps to `Other`.
    pub fn lenient(s: &str) -> Self {
        s.parse().unwrap_or(IssueCategory::Other)
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueCategory::Documentation => write!(f, "documentation"),
            IssueCategory::Outdated => write!(f, "outdated"),
            IssueCategory::Bug => write!(f, "bug"),
            IssueCategory::Question => write!(f, "question"),
            IssueCategory::FeatureRequest => write!(f, "feature-request"),
            IssueCategory::Other => write!(f, "other"),
        }
    }
}

impl FromStr for IssueCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "documentation" | "docs" | "doc" | "documentation-error" => {
                Ok(IssueCategory::Documentation)
            }
            "outdated" | "stale" | "deprecated" => Ok(IssueCategory::Outdated),
            "bug" | "broken-example" | "error" => Ok(IssueCategory::Bug),
            "question" | "help" | "support" => Ok(IssueCategory::Question),
            "feature-request" | "feature" | "enhancement" => Ok(IssueCategory::FeatureRequest),
            "other" => Ok(IssueCategory::Other),
            other => Err(format!("unknown issue category: {other}")),
        }
    }
}

/// Issue priority assigned during triage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" | "p0" | "urgent" => Ok(Priority::Critical),
            "high" | "p1" => Ok(Priority::High),
            "medium" | "p2" | "normal" => Ok(Priority::Medium),
            "low" | "p3" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Coarse bucket for a triage confidence score.
///
/// # Examples
///
/// ```
/// use kbase_core::ConfidenceBand;
///
/// assert_eq!(ConfidenceBand::classify(0.8, 0.8, 0.5), ConfidenceBand::High);
/// assert_eq!(ConfidenceBand::classify(0.5, 0.8, 0.5), ConfidenceBand::Medium);
/// assert_eq!(ConfidenceBand::classify(0.49, 0.8, 0.5), ConfidenceBand::Low);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    High,
    Medium,
    Low,
}

impl ConfidenceBand {
    /// High iff `score >= high`, low iff `score < low`, medium otherwise.
    pub fn classify(score: f64, high: f64, low: f64) -> Self {
        if score >= high {
            ConfidenceBand::High
        } else if score < low {
            ConfidenceBand::Low
        } else {
            ConfidenceBand::Medium
        }
    }
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceBand::High => write!(f, "high"),
            ConfidenceBand::Medium => write!(f, "medium"),
            ConfidenceBand::Low => write!(f, "low"),
        }
    }
}

/// Severity of a reported runtime error, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl ErrorSeverity {
    /// All severities, most severe first.
    pub const ALL: [ErrorSeverity; 4] = [
        ErrorSeverity::Critical,
        ErrorSeverity::High,
        ErrorSeverity::Medium,
        ErrorSeverity::Low,
    ];

    /// Lower-case key used in JSON maps.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorSeverity::Critical => "critical",
            ErrorSeverity::High => "high",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::Low => "low",
        }
    }

    /// Capitalized label for reports.
    pub fn label(self) -> &'static str {
        match self {
            ErrorSeverity::Critical => "Critical",
            ErrorSeverity::High => "High",
            ErrorSeverity::Medium => "Medium",
            ErrorSeverity::Low => "Low",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format for CLI results.
///
/// # Examples
///
/// ```
/// use kbase_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
    /// GitHub-flavored Markdown.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn category_accepts_llm_spellings() {
        assert_eq!(
            "Feature Request".parse::<IssueCategory>().unwrap(),
            IssueCategory::FeatureRequest
        );
        assert_eq!(
            "feature_request".parse::<IssueCategory>().unwrap(),
            IssueCategory::FeatureRequest
        );
        assert_eq!(IssueCategory::lenient("DOCS"), IssueCategory::Documentation);
        assert_eq!(IssueCategory::lenient("deprecated"), IssueCategory::Outdated);
        assert!("nonsense".parse::<IssueCategory>().is_err());
    }

    #[test]
    fn category_serializes_kebab_case() {
        let json = serde_json::to_string(&IssueCategory::FeatureRequest).unwrap();
        assert_eq!(json, "\"feature-request\"");
    }

    #[test]
    fn priority_orders_most_urgent_first() {
        assert!(Priority::Critical < Priority::Low);
        assert_eq!("P1".parse::<Priority>().unwrap(), Priority::High);
        assert!("someday".parse::<Priority>().is_err());
    }

    #[test]
    fn confidence_band_boundaries() {
        assert_eq!(ConfidenceBand::classify(1.0, 0.8, 0.5), ConfidenceBand::High);
        assert_eq!(ConfidenceBand::classify(0.79, 0.8, 0.5), ConfidenceBand::Medium);
        assert_eq!(ConfidenceBand::classify(0.0, 0.8, 0.5), ConfidenceBand::Low);
    }

    #[test]
    fn severity_order_and_labels() {
        let keys: Vec<&str> = ErrorSeverity::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(keys, vec!["critical", "high", "medium", "low"]);
        assert_eq!(ErrorSeverity::Medium.label(), "Medium");
    }

    #[test]
    fn now_iso_is_utc_rfc3339() {
        let ts = now_iso();
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
        assert!(ts.ends_with('Z'));
    }
}
