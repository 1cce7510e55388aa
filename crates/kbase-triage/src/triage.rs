use std::fmt::Write;

use kbase_core::{ConfidenceBand, IssueCategory, KbError, Priority, TriageConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::{ChatMessage, LlmClient};
use crate::prompt;

/// Label applied when the model's answer could not be used.
pub const TRIAGE_FAILED_LABEL: &str = "triage-failed";

/// An issue as submitted for triage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueReport {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Structured classification returned by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageResult {
    pub category: IssueCategory,
    /// Normalized to `[0, 1]`.
    pub confidence: f64,
    pub band: ConfidenceBand,
    pub priority: Priority,
    pub summary: String,
    pub affected_files: Vec<String>,
    pub suggested_labels: Vec<String>,
}

/// What happens next to a triaged issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageDecision {
    /// Confident enough to draft a fix automatically.
    ProposeFix,
    NeedsReview,
    /// The report is too vague to act on.
    NeedsInfo,
}

impl TriageDecision {
    pub fn label(self) -> &'static str {
        match self {
            TriageDecision::ProposeFix => "auto-fix",
            TriageDecision::NeedsReview => "needs-review",
            TriageDecision::NeedsInfo => "needs-info",
        }
    }
}

/// Result of one triage attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TriageOutcome {
    Triaged {
        result: TriageResult,
        decision: TriageDecision,
        labels: Vec<String>,
    },
    Failed {
        reason: String,
    },
}

impl TriageOutcome {
    /// Labels to apply to the issue.
    pub fn labels(&self) -> Vec<String> {
        match self {
            TriageOutcome::Triaged { labels, .. } => labels.clone(),
            TriageOutcome::Failed { .. } => vec![TRIAGE_FAILED_LABEL.to_string()],
        }
    }

    pub fn result(&self) -> Option<&TriageResult> {
        match self {
            TriageOutcome::Triaged { result, .. } => Some(result),
            TriageOutcome::Failed { .. } => None,
        }
    }

    pub fn decision(&self) -> Option<TriageDecision> {
        match self {
            TriageOutcome::Triaged { decision, .. } => Some(*decision),
            TriageOutcome::Failed { .. } => None,
        }
    }
}

/// Route a classified issue.
///
/// # Examples
///
/// ```
/// use kbase_core::{ConfidenceBand, IssueCategory, Priority, TriageConfig};
/// use kbase_triage::triage::{decide, TriageDecision, TriageResult};
///
/// let result = TriageResult {
///     category: IssueCategory::Documentation,
///     confidence: 0.92,
///     band: ConfidenceBand::High,
///     priority: Priority::Medium,
///     summary: "Typo".into(),
///     affected_files: vec![],
///     suggested_labels: vec![],
/// };
/// assert_eq!(decide(&result, &TriageConfig::default()), TriageDecision::ProposeFix);
/// ```
pub fn decide(result: &TriageResult, config: &TriageConfig) -> TriageDecision {
    // Entries accept the same spellings as the model's answer.
    let auto_fixable = config
        .auto_fix_categories
        .iter()
        .any(|c| c.parse::<IssueCategory>().is_ok_and(|c| c == result.category));
    match result.band {
        ConfidenceBand::High if auto_fixable => TriageDecision::ProposeFix,
        ConfidenceBand::High | ConfidenceBand::Medium => TriageDecision::NeedsReview,
        ConfidenceBand::Low => TriageDecision::NeedsInfo,
    }
}

/// Labels for a triaged issue, including the model's suggestions.
pub fn labels_for(result: &TriageResult, decision: TriageDecision) -> Vec<String> {
    let mut labels = vec![
        "triaged".to_string(),
        format!("category:{}", result.category),
        format!("priority:{}", result.priority),
        format!("confidence:{}", result.band),
        decision.label().to_string(),
    ];
    for label in &result.suggested_labels {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }
    labels
}

/// Parse the model's triage answer.
///
/// Unknown categories become `Other`, unknown priorities `Medium`. A
/// missing or non-numeric confidence is an error.
pub fn parse_triage_response(response: &str, config: &TriageConfig) -> Result<TriageResult, String> {
    let value: Value = prompt::parse_json_object(response)?;
    let Value::Object(obj) = value else {
        return Err("response is not a JSON object".into());
    };

    let confidence = obj
        .get("confidence")
        .and_then(prompt::confidence_from)
        .ok_or_else(|| "missing or invalid confidence".to_string())?;
    let category = obj
        .get("category")
        .and_then(Value::as_str)
        .map(IssueCategory::lenient)
        .ok_or_else(|| "missing category".to_string())?;
    let priority = obj
        .get("priority")
        .and_then(Value::as_str)
        .and_then(|p| p.parse().ok())
        .unwrap_or(Priority::Medium);
    let summary = obj
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    Ok(TriageResult {
        category,
        confidence,
        band: ConfidenceBand::classify(confidence, config.high_confidence, config.low_confidence),
        priority,
        summary,
        affected_files: prompt::string_list(obj.get("affected_files")),
        suggested_labels: prompt::string_list(obj.get("suggested_labels")),
    })
}

/// Turn a raw model answer into an outcome.
pub fn outcome_from_response(response: &str, config: &TriageConfig) -> TriageOutcome {
    match parse_triage_response(response, config) {
        Ok(result) => {
            let decision = decide(&result, config);
            let labels = labels_for(&result, decision);
            TriageOutcome::Triaged {
                result,
                decision,
                labels,
            }
        }
        Err(reason) => {
            tracing::warn!(%reason, "unusable triage response");
            TriageOutcome::Failed { reason }
        }
    }
}

/// Classify an issue with the LLM.
///
/// # Errors
///
/// Returns [`KbError::Llm`] when the model cannot be reached. An answer
/// that cannot be parsed is not an error; it yields [`TriageOutcome::Failed`].
pub async fn triage_issue(
    llm: &LlmClient,
    issue: &IssueReport,
    config: &TriageConfig,
) -> Result<TriageOutcome, KbError> {
    let messages = vec![
        ChatMessage::system(prompt::TRIAGE_SYSTEM_PROMPT),
        ChatMessage::user(prompt::build_triage_prompt(issue)),
    ];
    let response = llm.chat(messages).await?;
    let outcome = outcome_from_response(&response, config);
    tracing::info!(
        issue = issue.number,
        decision = ?outcome.decision(),
        "issue triaged"
    );
    Ok(outcome)
}

/// Markdown comment summarizing the triage for the issue thread.
pub fn render_comment(outcome: &TriageOutcome) -> String {
    let mut out = String::from("## Automated triage\n\n");
    match outcome {
        TriageOutcome::Triaged {
            result, decision, ..
        } => {
            let _ = writeln!(out, "| | |\n|---|---|");
            let _ = writeln!(out, "| Category | `{}` |", result.category);
            let _ = writeln!(out, "| Priority | `{}` |", result.priority);
            let _ = writeln!(
                out,
                "| Confidence | {:.0}% ({}) |",
                result.confidence * 100.0,
                result.band
            );
            if !result.summary.is_empty() {
                let _ = write!(out, "\n{}\n", result.summary);
            }
            if !result.affected_files.is_empty() {
                out.push_str("\n**Affected files:**\n");
                for file in &result.affected_files {
                    let _ = writeln!(out, "- `{file}`");
                }
            }
            let next = match decision {
                TriageDecision::ProposeFix => "A fix will be proposed automatically.",
                TriageDecision::NeedsReview => "A maintainer will review this issue.",
                TriageDecision::NeedsInfo => {
                    "Could you add more detail, such as the page and the exact text that is wrong?"
                }
            };
            let _ = write!(out, "\n{next}\n");
        }
        TriageOutcome::Failed { reason } => {
            let _ = write!(
                out,
                "Automatic triage failed ({reason}). A maintainer will look at this issue.\n"
            );
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TriageConfig {
        TriageConfig::default()
    }

    fn result(category: IssueCategory, confidence: f64) -> TriageResult {
        TriageResult {
            category,
            confidence,
            band: ConfidenceBand::classify(confidence, 0.8, 0.5),
            priority: Priority::High,
            summary: "Storage page has wrong header".into(),
            affected_files: vec!["docs/02-storage.md".into()],
            suggested_labels: vec!["storage".into()],
        }
    }

    #[test]
    fn decision_table() {
        let cfg = config();
        assert_eq!(decide(&result(IssueCategory::Outdated, 0.9), &cfg), TriageDecision::ProposeFix);
        assert_eq!(decide(&result(IssueCategory::Bug, 0.9), &cfg), TriageDecision::NeedsReview);
        assert_eq!(
            decide(&result(IssueCategory::Documentation, 0.6), &cfg),
            TriageDecision::NeedsReview
        );
        assert_eq!(
            decide(&result(IssueCategory::Documentation, 0.3), &cfg),
            TriageDecision::NeedsInfo
        );
    }

    #[test]
    fn auto_fix_categories_accept_loose_spellings() {
        let cfg = TriageConfig {
            auto_fix_categories: vec!["Documentation".into(), "feature_request".into()],
            ..config()
        };
        assert_eq!(
            decide(&result(IssueCategory::Documentation, 0.9), &cfg),
            TriageDecision::ProposeFix
        );
        assert_eq!(
            decide(&result(IssueCategory::FeatureRequest, 0.9), &cfg),
            TriageDecision::ProposeFix
        );

        let cfg = TriageConfig {
            auto_fix_categories: vec!["docs".into(), "typos".into()],
            ..config()
        };
        assert_eq!(
            decide(&result(IssueCategory::Documentation, 0.9), &cfg),
            TriageDecision::ProposeFix
        );
        // An unrecognised entry does not turn on fixes for `Other`.
        assert_eq!(decide(&result(IssueCategory::Other, 0.9), &cfg), TriageDecision::NeedsReview);
    }

    #[test]
    fn labels_include_band_and_decision() {
        let r = result(IssueCategory::FeatureRequest, 0.55);
        let labels = labels_for(&r, TriageDecision::NeedsReview);
        assert_eq!(
            labels,
            vec![
                "triaged",
                "category:feature-request",
                "priority:high",
                "confidence:medium",
                "needs-review",
                "storage"
            ]
        );
    }

    #[test]
    fn parses_fenced_percentage_response() {
        let response = "```json\n{\"category\": \"Docs\", \"confidence\": \"85%\", \"priority\": \"P1\", \
                        \"summary\": \" Typo \", \"affected_files\": [\"docs/a.md\"]}\n```";
        let r = parse_triage_response(response, &config()).unwrap();
        assert_eq!(r.category, IssueCategory::Documentation);
        assert!((r.confidence - 0.85).abs() < 1e-9);
        assert_eq!(r.band, ConfidenceBand::High);
        assert_eq!(r.priority, Priority::High);
        assert_eq!(r.summary, "Typo");
        assert!(r.suggested_labels.is_empty());
    }

    #[test]
    fn unknown_priority_defaults_to_medium() {
        let r = parse_triage_response(
            "{\"category\": \"bug\", \"confidence\": 0.4, \"priority\": \"whenever\"}",
            &config(),
        )
        .unwrap();
        assert_eq!(r.priority, Priority::Medium);
        assert_eq!(r.band, ConfidenceBand::Low);
    }

    #[test]
    fn malformed_response_fails_with_label() {
        let outcome = outcome_from_response("I think this is a docs issue.", &config());
        assert!(matches!(outcome, TriageOutcome::Failed { .. }));
        assert_eq!(outcome.labels(), vec![TRIAGE_FAILED_LABEL]);

        let outcome = outcome_from_response("{\"category\": \"bug\"}", &config());
        assert!(matches!(outcome, TriageOutcome::Failed { ref reason } if reason.contains("confidence")));
    }

    #[test]
    fn comment_asks_for_detail_on_low_confidence() {
        let outcome = outcome_from_response(
            "{\"category\": \"question\", \"confidence\": 0.2, \"priority\": \"low\"}",
            &config(),
        );
        let comment = render_comment(&outcome);
        assert!(comment.contains("| Confidence | 20% (low) |"));
        assert!(comment.contains("more detail"));
    }

    #[test]
    fn issue_report_defaults() {
        let issue: IssueReport = serde_json::from_str("{\"number\": 9, \"title\": \"x\"}").unwrap();
        assert!(issue.body.is_empty());
        assert!(issue.labels.is_empty());
    }
}
