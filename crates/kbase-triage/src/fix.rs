//! Fix proposals: gather the affected files, ask the model for exact
//! edits and apply them to the working tree.

use std::fmt::Write;
use std::path::{Component, Path, PathBuf};

use kbase_core::KbError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::{ChatMessage, LlmClient};
use crate::prompt;
use crate::triage::{IssueReport, TriageResult};

/// Files larger than this are not sent to the model.
const MAX_CONTEXT_BYTES: u64 = 100_000;

/// One exact text replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub file: String,
    pub original: String,
    pub replacement: String,
    #[serde(default)]
    pub rationale: String,
}

/// The model's proposed fix for an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixProposal {
    pub changes: Vec<FileChange>,
    pub pr_title: String,
    pub pr_body: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedChange {
    pub file: String,
    pub reason: String,
}

/// What [`apply_changes`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub applied: Vec<FileChange>,
    pub skipped: Vec<SkippedChange>,
}

impl ApplyReport {
    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }
}

/// Resolve `relative` under `root`, refusing absolute paths and `..`.
fn resolve_inside(root: &Path, relative: &str) -> Option<PathBuf> {
    let rel = Path::new(relative);
    if rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return None;
    }
    Some(root.join(rel))
}

/// Read the affected files that exist under `root`.
///
/// Missing, oversized and out-of-tree paths are skipped with a debug log.
pub fn gather_context(root: &Path, files: &[String]) -> Vec<(String, String)> {
    let mut context = Vec::new();
    for file in files {
        let Some(path) = resolve_inside(root, file) else {
            tracing::debug!(file = %file, "skipping path outside repository");
            continue;
        };
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() <= MAX_CONTEXT_BYTES => {}
            Ok(_) => {
                tracing::debug!(file = %file, "skipping directory or oversized file");
                continue;
            }
            Err(_) => {
                tracing::debug!(file = %file, "affected file not found");
                continue;
            }
        }
        match std::fs::read_to_string(&path) {
            Ok(content) => context.push((file.clone(), content)),
            Err(e) => tracing::debug!(file = %file, error = %e, "failed to read affected file"),
        }
    }
    context
}

/// Parse the model's fix answer. Changes missing `file` or `original` are dropped.
pub fn parse_fix_response(response: &str) -> Result<FixProposal, String> {
    let value: Value = prompt::parse_json_object(response)?;
    let Value::Object(obj) = value else {
        return Err("response is not a JSON object".into());
    };
    let Some(Value::Array(raw_changes)) = obj.get("changes") else {
        return Err("missing changes array".into());
    };

    let text = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(str::to_string);
    let changes = raw_changes
        .iter()
        .filter_map(|c| {
            let file = text(c, "file")?;
            let original = text(c, "original")?;
            if file.trim().is_empty() || original.is_empty() {
                return None;
            }
            Some(FileChange {
                file,
                original,
                replacement: text(c, "replacement").unwrap_or_default(),
                rationale: text(c, "rationale").unwrap_or_default(),
            })
        })
        .collect();

    Ok(FixProposal {
        changes,
        pr_title: obj
            .get("pr_title")
            .and_then(Value::as_str)
            .unwrap_or("Documentation fix")
            .to_string(),
        pr_body: obj
            .get("pr_body")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        confidence: obj
            .get("confidence")
            .and_then(prompt::confidence_from)
            .unwrap_or(0.0),
    })
}

/// Ask the model for a fix.
///
/// # Errors
///
/// Returns [`KbError::Llm`] when the model cannot be reached or its answer
/// cannot be parsed.
pub async fn propose_fix(
    llm: &LlmClient,
    root: &Path,
    issue: &IssueReport,
    triage: &TriageResult,
) -> Result<FixProposal, KbError> {
    let files = gather_context(root, &triage.affected_files);
    tracing::debug!(issue = issue.number, files = files.len(), "requesting fix proposal");
    let messages = vec![
        ChatMessage::system(prompt::FIX_SYSTEM_PROMPT),
        ChatMessage::user(prompt::build_fix_prompt(issue, &triage.summary, &files)),
    ];
    let response = llm.chat(messages).await?;
    parse_fix_response(&response).map_err(|e| KbError::Llm(format!("unusable fix proposal: {e}")))
}

/// Apply each change if its original text occurs exactly once in the file,
/// overlapping occurrences included.
///
/// Changes are applied in order, so a later change sees the result of an
/// earlier one in the same file. Nothing is written for skipped changes.
///
/// # Errors
///
/// Returns [`KbError::Io`] if a matched file cannot be written back.
pub fn apply_changes(root: &Path, changes: &[FileChange]) -> Result<ApplyReport, KbError> {
    let mut report = ApplyReport::default();
    for change in changes {
        let skip = |reason: &str| SkippedChange {
            file: change.file.clone(),
            reason: reason.to_string(),
        };
        let Some(path) = resolve_inside(root, &change.file) else {
            report.skipped.push(skip("path is outside the repository"));
            continue;
        };
        let Ok(content) = std::fs::read_to_string(&path) else {
            report.skipped.push(skip("file not found"));
            continue;
        };
        if change.original.is_empty() {
            report.skipped.push(skip("original text is empty"));
            continue;
        }
        match occurrences(&content, &change.original) {
            0 => report.skipped.push(skip("original text not found")),
            1 => {
                let updated = content.replacen(&change.original, &change.replacement, 1);
                std::fs::write(&path, updated)?;
                tracing::info!(file = %change.file, "applied change");
                report.applied.push(change.clone());
            }
            n => report
                .skipped
                .push(skip(&format!("original text is ambiguous ({n} matches)"))),
        }
    }
    Ok(report)
}

/// Occurrences of `needle` in `haystack`, overlapping ones included.
fn occurrences(haystack: &str, needle: &str) -> usize {
    haystack
        .char_indices()
        .filter(|(i, _)| haystack[*i..].starts_with(needle))
        .count()
}

/// Pull request description for an applied fix.
///
/// # Examples
///
/// ```
/// use kbase_triage::fix::{pr_description, ApplyReport, FileChange, FixProposal};
///
/// let change = FileChange {
///     file: "docs/a.md".into(),
///     original: "teh".into(),
///     replacement: "the".into(),
///     rationale: "Typo".into(),
/// };
/// let proposal = FixProposal {
///     changes: vec![change.clone()],
///     pr_title: "Fix typo".into(),
///     pr_body: String::new(),
///     confidence: 0.9,
/// };
/// let report = ApplyReport { applied: vec![change], skipped: vec![] };
/// assert!(pr_description(12, &proposal, &report).starts_with("Fixes #12"));
/// ```
pub fn pr_description(issue_number: u64, proposal: &FixProposal, report: &ApplyReport) -> String {
    let mut out = format!("Fixes #{issue_number}\n\n");
    if !proposal.pr_body.trim().is_empty() {
        let _ = write!(out, "{}\n\n", proposal.pr_body.trim());
    }
    out.push_str("## Changes\n\n");
    for change in &report.applied {
        let rationale = if change.rationale.is_empty() {
            "no rationale given"
        } else {
            change.rationale.as_str()
        };
        let _ = writeln!(out, "- `{}`: {rationale}", change.file);
    }
    if !report.skipped.is_empty() {
        out.push_str("\n## Not applied\n\n");
        for skipped in &report.skipped {
            let _ = writeln!(out, "- `{}`: {}", skipped.file, skipped.reason);
        }
    }
    let _ = write!(
        out,
        "\n---\nProposed automatically with {:.0}% confidence.\n",
        proposal.confidence * 100.0
    );
    out
}
