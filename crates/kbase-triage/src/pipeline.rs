use std::path::PathBuf;

use kbase_core::{KbError, TriageConfig};
use kbase_metrics::TriageStats;
use serde::{Deserialize, Serialize};

use crate::fix::{self, ApplyReport, FixProposal};
use crate::llm::LlmClient;
use crate::review::{self, MergeDecision, ReviewVerdict};
use crate::triage::{self, IssueReport, TriageDecision, TriageOutcome, TriageResult};

/// Everything needed to review a fix later, saved by `kbase fix --proposal-out`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixRecord {
    pub issue: IssueReport,
    pub triage: TriageResult,
    pub proposal: FixProposal,
    pub applied: ApplyReport,
    /// Set once the merge has been counted in [`TriageStats`].
    #[serde(default)]
    pub merged: bool,
}

/// What one pass of the loop did for an issue.
#[derive(Debug, Clone, Serialize)]
pub struct LoopReport {
    pub issue: IssueReport,
    pub outcome: TriageOutcome,
    pub fix: Option<FixProposal>,
    pub applied: Option<ApplyReport>,
    pub review: Option<ReviewVerdict>,
    pub merge: Option<MergeDecision>,
    pub pr_description: Option<String>,
}

impl LoopReport {
    /// The record to persist for a later review, if a fix was proposed.
    pub fn fix_record(&self) -> Option<FixRecord> {
        Some(FixRecord {
            issue: self.issue.clone(),
            triage: self.outcome.result()?.clone(),
            proposal: self.fix.clone()?,
            applied: self.applied.clone().unwrap_or_default(),
            merged: self.merge == Some(MergeDecision::AutoMerge)
                && self.applied.as_ref().is_some_and(|a| !a.is_empty()),
        })
    }
}

/// Triage, fix, review, decide.
///
/// A fix is proposed only when triage decides [`TriageDecision::ProposeFix`].
/// The review runs when the proposal has at least one change. Counters in
/// [`TriageStats`] are updated as each stage completes; the caller saves them.
pub struct SelfHealingLoop {
    llm: LlmClient,
    config: TriageConfig,
    root: PathBuf,
}

impl SelfHealingLoop {
    pub fn new(llm: LlmClient, config: TriageConfig, root: impl Into<PathBuf>) -> Self {
        Self {
            llm,
            config,
            root: root.into(),
        }
    }

    /// Triage only.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Llm`] when the model cannot be reached.
    pub async fn triage(
        &self,
        issue: &IssueReport,
        stats: &mut TriageStats,
    ) -> Result<TriageOutcome, KbError> {
        let outcome = triage::triage_issue(&self.llm, issue, &self.config).await?;
        let result = outcome.result();
        stats.record_triage(
            result.map(|r| r.confidence),
            result.is_some_and(|r| r.band == kbase_core::ConfidenceBand::High),
        );
        Ok(outcome)
    }

    /// Run the whole loop. With `apply == false` the proposal is reviewed
    /// but nothing is written to the working tree. A rejected proposal is
    /// never written.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Llm`] when a stage cannot reach the model, or
    /// [`KbError::Io`] if applying a change fails.
    pub async fn run(
        &self,
        issue: &IssueReport,
        apply: bool,
        stats: &mut TriageStats,
    ) -> Result<LoopReport, KbError> {
        let outcome = self.triage(issue, stats).await?;
        let mut report = LoopReport {
            issue: issue.clone(),
            outcome,
            fix: None,
            applied: None,
            review: None,
            merge: None,
            pr_description: None,
        };

        let Some(result) = report.outcome.result().cloned() else {
            return Ok(report);
        };
        if report.outcome.decision() != Some(TriageDecision::ProposeFix) {
            tracing::info!(issue = issue.number, "no automatic fix for this decision");
            return Ok(report);
        }

        let proposal = fix::propose_fix(&self.llm, &self.root, issue, &result).await?;
        if proposal.changes.is_empty() {
            tracing::info!(issue = issue.number, "model proposed no changes");
            report.fix = Some(proposal);
            return Ok(report);
        }

        let verdict = review::review_fix(&self.llm, issue, &proposal).await?;
        let decision = review::decide_merge(&verdict, result.band, self.config.review_min_score);

        if apply && decision == MergeDecision::Reject {
            tracing::info!(issue = issue.number, "review rejected the fix, leaving files untouched");
        } else if apply {
            let applied = fix::apply_changes(&self.root, &proposal.changes)?;
            if !applied.is_empty() {
                stats.record_pr_created();
                report.pr_description = Some(fix::pr_description(issue.number, &proposal, &applied));
                if decision == MergeDecision::AutoMerge {
                    stats.record_pr_merged();
                }
            }
            report.applied = Some(applied);
        }

        tracing::info!(issue = issue.number, decision = %decision, "fix reviewed");
        report.fix = Some(proposal);
        report.review = Some(verdict);
        report.merge = Some(decision);
        Ok(report)
    }

    /// Review a previously saved fix.
    ///
    /// An auto-merge of an applied fix is counted once: the record is marked
    /// `merged` and later reviews of it leave the counters alone. The caller
    /// persists the updated record.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Llm`] when the model cannot be reached.
    pub async fn review_record(
        &self,
        record: &mut FixRecord,
        stats: &mut TriageStats,
    ) -> Result<(ReviewVerdict, MergeDecision), KbError> {
        let verdict = review::review_fix(&self.llm, &record.issue, &record.proposal).await?;
        let decision =
            review::decide_merge(&verdict, record.triage.band, self.config.review_min_score);
        if decision == MergeDecision::AutoMerge && !record.applied.is_empty() && !record.merged {
            stats.record_pr_merged();
            record.merged = true;
        }
        Ok((verdict, decision))
    }
}
