//! Prompts for the triage, fix and review stages, and tolerant parsing of
//! the JSON the model sends back.

use std::fmt::Write;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::fix::FixProposal;
use crate::triage::IssueReport;

pub const TRIAGE_SYSTEM_PROMPT: &str = "\
You triage issues filed against a product documentation knowledge base.
Classify the issue and estimate how confident you are.

Respond with a JSON object:
{
  \"category\": \"documentation\" | \"outdated\" | \"bug\" | \"question\" | \"feature-request\" | \"other\",
  \"confidence\": 0.0-1.0,
  \"priority\": \"critical\" | \"high\" | \"medium\" | \"low\",
  \"summary\": \"One sentence describing the problem\",
  \"affected_files\": [\"docs/path/to/file.md\"],
  \"suggested_labels\": [\"label\"]
}

Only list files you can identify from the issue text.";

pub const FIX_SYSTEM_PROMPT: &str = "\
You fix documentation problems. You receive an issue, its triage summary and
the current content of the affected files. Propose minimal, exact edits.

Rules:
- \"original\" must be copied verbatim from the file and occur exactly once
- Keep changes as small as possible
- Do not touch files you were not given

Respond with a JSON object:
{
  \"changes\": [
    {\"file\": \"docs/path.md\", \"original\": \"exact text\", \"replacement\": \"new text\", \"rationale\": \"why\"}
  ],
  \"pr_title\": \"Short title\",
  \"pr_body\": \"What changed and why\",
  \"confidence\": 0.0-1.0
}";

pub const REVIEW_SYSTEM_PROMPT: &str = "\
You review proposed documentation changes before they are merged.
Check that each change addresses the issue, is technically accurate and does
not remove useful information.

Respond with a JSON object:
{
  \"score\": 0-10,
  \"approve\": true | false,
  \"concerns\": [\"concern\"]
}";

/// User prompt for triage.
///
/// # Examples
///
/// ```
/// use kbase_triage::prompt::build_triage_prompt;
/// use kbase_triage::IssueReport;
///
/// let issue = IssueReport {
///     number: 7,
///     title: "Broken link".into(),
///     body: "The storage page 404s".into(),
///     labels: vec![],
/// };
/// assert!(build_triage_prompt(&issue).contains("#7: Broken link"));
/// ```
pub fn build_triage_prompt(issue: &IssueReport) -> String {
    let mut prompt = format!("Issue #{}: {}\n", issue.number, issue.title);
    if !issue.labels.is_empty() {
        let _ = writeln!(prompt, "Labels: {}", issue.labels.join(", "));
    }
    let _ = write!(prompt, "\n{}\n", issue.body.trim());
    prompt
}

/// User prompt for a fix proposal, with the contents of the affected files.
pub fn build_fix_prompt(issue: &IssueReport, summary: &str, files: &[(String, String)]) -> String {
    let mut prompt = build_triage_prompt(issue);
    let _ = write!(prompt, "\nTriage summary: {summary}\n");
    if files.is_empty() {
        prompt.push_str("\nNo affected files could be read.\n");
    }
    for (path, content) in files {
        let _ = write!(prompt, "\n--- {path} ---\n{content}\n--- end of {path} ---\n");
    }
    prompt
}

/// User prompt for reviewing a proposal.
pub fn build_review_prompt(issue: &IssueReport, proposal: &FixProposal) -> String {
    let mut prompt = build_triage_prompt(issue);
    let _ = write!(prompt, "\nProposed PR: {}\n", proposal.pr_title);
    for (i, change) in proposal.changes.iter().enumerate() {
        let _ = write!(
            prompt,
            "\nChange {} in {}:\nRationale: {}\n<<<<<<< original\n{}\n=======\n{}\n>>>>>>> replacement\n",
            i + 1,
            change.file,
            change.rationale,
            change.original,
            change.replacement
        );
    }
    prompt
}

/// Strip surrounding Markdown code fences from a model response.
///
/// # Examples
///
/// ```
/// use kbase_triage::prompt::strip_code_fences;
///
/// assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
/// assert_eq!(strip_code_fences("  {} "), "{}");
/// ```
pub fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    for opener in ["```json", "```JSON", "```"] {
        if let Some(rest) = trimmed.strip_prefix(opener) {
            if let Some(inner) = rest.strip_suffix("```") {
                return inner.trim();
            }
        }
    }
    trimmed
}

/// Parse a JSON object out of a model response.
///
/// Falls back to the outermost `{...}` span when the model wraps the JSON
/// in prose.
pub fn parse_json_object<T: DeserializeOwned>(response: &str) -> Result<T, String> {
    let cleaned = strip_code_fences(response);
    match serde_json::from_str(cleaned) {
        Ok(v) => Ok(v),
        Err(first) => {
            let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) else {
                return Err(format!("response is not JSON: {first}"));
            };
            if end <= start {
                return Err(format!("response is not JSON: {first}"));
            }
            serde_json::from_str(&cleaned[start..=end])
                .map_err(|e| format!("response is not valid JSON: {e}"))
        }
    }
}

/// Read a number the model may have sent as a number, a numeric string or a percentage.
pub fn loose_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            let (digits, percent) = match s.strip_suffix('%') {
                Some(d) => (d.trim(), true),
                None => (s, false),
            };
            let n: f64 = digits.parse().ok()?;
            Some(if percent { n / 100.0 } else { n })
        }
        _ => None,
    }
}

/// Normalize a confidence to `[0, 1]`; values above 1 are read as percentages.
///
/// # Examples
///
/// ```
/// use kbase_triage::prompt::confidence_from;
/// use serde_json::json;
///
/// assert_eq!(confidence_from(&json!(0.9)), Some(0.9));
/// assert_eq!(confidence_from(&json!(85)), Some(0.85));
/// assert_eq!(confidence_from(&json!("70%")), Some(0.7));
/// assert_eq!(confidence_from(&json!(-2)), Some(0.0));
/// assert_eq!(confidence_from(&json!("high")), None);
/// ```
pub fn confidence_from(value: &Value) -> Option<f64> {
    let n = loose_number(value)?;
    if !n.is_finite() {
        return None;
    }
    let n = if n > 1.0 { n / 100.0 } else { n };
    Some(n.clamp(0.0, 1.0))
}

/// A list of strings, skipping non-string entries. A single string becomes a one-item list.
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_embedded_in_prose_is_recovered() {
        let v: Value = parse_json_object("Sure! Here it is: {\"a\": 1} Hope that helps.").unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_json_object::<Value>("no json here").is_err());
        assert!(parse_json_object::<Value>("} {").is_err());
    }

    #[test]
    fn loose_numbers() {
        assert_eq!(loose_number(&json!("7")), Some(7.0));
        assert_eq!(loose_number(&json!(" 8.5 ")), Some(8.5));
        assert_eq!(loose_number(&json!(null)), None);
    }

    #[test]
    fn confidence_boundaries() {
        assert_eq!(confidence_from(&json!(1)), Some(1.0));
        assert_eq!(confidence_from(&json!(100)), Some(1.0));
        assert_eq!(confidence_from(&json!(250)), Some(1.0));
        assert_eq!(confidence_from(&json!("0.5")), Some(0.5));
    }

    #[test]
    fn string_lists_are_lenient() {
        assert_eq!(string_list(Some(&json!(["a", 1, " b ", ""]))), vec!["a", "b"]);
        assert_eq!(string_list(Some(&json!("docs/a.md"))), vec!["docs/a.md"]);
        assert!(string_list(None).is_empty());
    }

    #[test]
    fn fix_prompt_includes_files() {
        let issue = IssueReport {
            number: 3,
            title: "Typo".into(),
            body: "teh".into(),
            labels: vec!["docs".into()],
        };
        let prompt = build_fix_prompt(&issue, "typo in intro", &[("docs/a.md".into(), "teh text".into())]);
        assert!(prompt.contains("Labels: docs"));
        assert!(prompt.contains("--- docs/a.md ---\nteh text"));
        assert!(prompt.contains("Triage summary: typo in intro"));
    }
}
