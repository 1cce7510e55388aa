use std::path::PathBuf;

/// Errors that can occur across kbase.
///
/// Each variant wraps a specific error domain. Library crates use this type
/// directly; the binary converts to `miette::Report` at the boundary.
///
/// # Examples
///
/// ```
/// use kbase_core::KbError;
///
/// let err = KbError::Config("missing API key".into());
/// assert!(err.to_string().contains("missing API key"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum KbError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Git operation failure.
    #[error("git error: {0}")]
    Git(String),

    /// Source or document parsing failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// LLM API or response error.
    #[error("LLM error: {0}")]
    Llm(String),

    /// GitHub API failure.
    #[error("GitHub error: {0}")]
    GitHub(String),

    /// Generic HTTP failure outside the LLM and GitHub clients.
    #[error("HTTP error: {0}")]
    Http(String),

    /// SQLite failure.
    #[error("database error: {0}")]
    Database(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML serialization failure.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// A stored record (graph node, interaction, learning) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Input was readable but not acceptable.
    #[error("validation error: {0}")]
    Validation(String),
}
