//! Documentation validators.
//!
//! Checks the fenced code blocks in Markdown files for syntax errors and the
//! external links for reachability, and reports both as findings.

pub mod fences;
pub mod links;
pub mod report;
pub mod syntax;

pub use report::{validate_docs, Finding, FindingKind, ValidationReport};
