//! Core types, configuration, and error handling for kbase.
//!
//! This crate provides the shared foundation used by all other kbase crates:
//! - [`KbError`]: unified error type using `thiserror`
//! - [`KbConfig`]: configuration loaded from `.kbase.toml`
//! - Shared vocabulary: [`IssueCategory`], [`Priority`], [`ConfidenceBand`],
//!   [`ErrorSeverity`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{
    GitHubConfig, KbConfig, LlmConfig, CONFIG_FILE, MetricTargets, MetricsConfig, PathsConfig, SkillConfig,
    TriageConfig, ValidateConfig,
};
pub use error::KbError;
pub use types::{now_iso, ConfidenceBand, ErrorSeverity, IssueCategory, OutputFormat, Priority};

/// A convenience `Result` type for kbase operations.
pub type Result<T> = std::result::Result<T, KbError>;
