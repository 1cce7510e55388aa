use kbase_core::{ConfidenceBand, KbError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fix::FixProposal;
use crate::llm::{ChatMessage, LlmClient};
use crate::prompt;
use crate::triage::IssueReport;

/// Review scores below this reject a fix the reviewer did not approve.
const REJECT_BELOW: u8 = 4;

/// The model's review of a proposed fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    /// 0 to 10.
    pub score: u8,
    pub approve: bool,
    pub concerns: Vec<String>,
}

/// Whether a reviewed fix may merge without a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeDecision {
    AutoMerge,
    HumanReview,
    Reject,
}

impl std::fmt::Display for MergeDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeDecision::AutoMerge => write!(f, "auto-merge"),
            MergeDecision::HumanReview => write!(f, "human review"),
            MergeDecision::Reject => write!(f, "reject"),
        }
    }
}

/// Decide what happens to a reviewed fix.
///
/// # Examples
///
/// ```
/// use kbase_core::ConfidenceBand;
/// use kbase_triage::review::{decide_merge, MergeDecision, ReviewVerdict};
///
/// let verdict = ReviewVerdict { score: 9, approve: true, concerns: vec![] };
/// assert_eq!(decide_merge(&verdict, ConfidenceBand::High, 7), MergeDecision::AutoMerge);
/// assert_eq!(decide_merge(&verdict, ConfidenceBand::Medium, 7), MergeDecision::HumanReview);
/// ```
pub fn decide_merge(verdict: &ReviewVerdict, band: ConfidenceBand, min_score: u8) -> MergeDecision {
    if verdict.approve && verdict.score >= min_score && band == ConfidenceBand::High {
        MergeDecision::AutoMerge
    } else if !verdict.approve && verdict.score < REJECT_BELOW {
        MergeDecision::Reject
    } else {
        MergeDecision::HumanReview
    }
}

/// Parse the reviewer's answer. A missing `approve` counts as not approved.
pub fn parse_review_response(response: &str) -> Result<ReviewVerdict, String> {
    let value: Value = prompt::parse_json_object(response)?;
    let score = value
        .get("score")
        .and_then(prompt::loose_number)
        .filter(|n| n.is_finite())
        .ok_or_else(|| "missing or invalid score".to_string())?;
    let approve = match value.get("approve") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes"),
        _ => false,
    };
    Ok(ReviewVerdict {
        score: score.round().clamp(0.0, 10.0) as u8,
        approve,
        concerns: prompt::string_list(value.get("concerns")),
    })
}

/// Ask the model to review a proposal.
///
/// # Errors
///
/// Returns [`KbError::Llm`] when the model cannot be reached or its answer
/// cannot be parsed.
pub async fn review_fix(
    llm: &LlmClient,
    issue: &IssueReport,
    proposal: &FixProposal,
) -> Result<ReviewVerdict, KbError> {
    let messages = vec![
        ChatMessage::system(prompt::REVIEW_SYSTEM_PROMPT),
        ChatMessage::user(prompt::build_review_prompt(issue, proposal)),
    ];
    let response = llm.chat(messages).await?;
    let verdict = parse_review_response(&response)
        .map_err(|e| KbError::Llm(format!("unusable review: {e}")))?;
    tracing::info!(
        issue = issue.number,
        score = verdict.score,
        approve = verdict.approve,
        "fix reviewed"
    );
    Ok(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(score: u8, approve: bool) -> ReviewVerdict {
        ReviewVerdict {
            score,
            approve,
            concerns: vec![],
        }
    }

    #[test]
    fn merge_decision_table() {
        use ConfidenceBand::*;
        assert_eq!(decide_merge(&verdict(7, true), High, 7), MergeDecision::AutoMerge);
        assert_eq!(decide_merge(&verdict(6, true), High, 7), MergeDecision::HumanReview);
        assert_eq!(decide_merge(&verdict(10, true), Low, 7), MergeDecision::HumanReview);
        assert_eq!(decide_merge(&verdict(3, false), High, 7), MergeDecision::Reject);
        assert_eq!(decide_merge(&verdict(4, false), High, 7), MergeDecision::HumanReview);
        assert_eq!(decide_merge(&verdict(9, false), High, 7), MergeDecision::HumanReview);
    }

    #[test]
    fn parses_lenient_review() {
        let v = parse_review_response("```\n{\"score\": \"8.6\", \"approve\": \"yes\", \"concerns\": \"tone\"}\n```")
            .unwrap();
        assert_eq!(v, ReviewVerdict { score: 9, approve: true, concerns: vec!["tone".into()] });
    }

    #[test]
    fn score_is_clamped() {
        let v = parse_review_response("{\"score\": 42}").unwrap();
        assert_eq!(v.score, 10);
        assert!(!v.approve);
        let v = parse_review_response("{\"score\": -3, \"approve\": false}").unwrap();
        assert_eq!(v.score, 0);
    }

    #[test]
    fn missing_score_is_an_error() {
        assert!(parse_review_response("{\"approve\": true}").is_err());
    }
}
