//! The self-healing loop: triage an issue, propose a documentation fix,
//! review it and decide whether it can merge.

pub mod fix;
pub mod github;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod review;
pub mod triage;

pub use fix::{ApplyReport, FileChange, FixProposal};
pub use github::GitHubClient;
pub use llm::LlmClient;
pub use pipeline::{FixRecord, LoopReport, SelfHealingLoop};
pub use review::{MergeDecision, ReviewVerdict};
pub use triage::{IssueReport, TriageDecision, TriageOutcome, TriageResult};
