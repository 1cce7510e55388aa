//! Learning capture: record assistant interactions, find documentation
//! gaps in them and track the issues opened for each gap.

pub mod analyzer;
pub mod export;
pub mod store;

pub use analyzer::{analyze, GapAnalysis};
pub use export::{export_learnings, write_export, LearningExport};
pub use store::{Interaction, Learning, LearningStore};
