use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::KbError;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE: &str = ".kbase.toml";

/// Top-level configuration loaded from `.kbase.toml`.
///
/// Supports layered resolution: CLI flags > env vars > local config > defaults.
///
/// # Examples
///
/// ```
/// use kbase_core::KbConfig;
///
/// let config = KbConfig::default();
/// assert_eq!(config.triage.high_confidence, 0.8);
/// assert_eq!(config.metrics.targets.pr_merge_rate, 70.0);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KbConfig {
    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// GitHub API settings.
    #[serde(default)]
    pub github: GitHubConfig,
    /// Triage thresholds and fix policy.
    #[serde(default)]
    pub triage: TriageConfig,
    /// Metrics output and KPI targets.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Documentation validator settings.
    #[serde(default)]
    pub validate: ValidateConfig,
    /// Well-known file locations.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Skill file presentation.
    #[serde(default)]
    pub skill: SkillConfig,
}

impl KbConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Io`] if the file cannot be read, or
    /// [`KbError::Toml`] if the content is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self, KbError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use kbase_core::KbConfig;
    ///
    /// let toml = r#"
    /// [triage]
    /// high_confidence = 0.9
    /// "#;
    /// let config = KbConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.triage.high_confidence, 0.9);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, KbError> {
        let config: Self = toml::from_str(content)?;
        config.check()?;
        Ok(config)
    }

    /// Load from an explicit path, else `.kbase.toml` in the working
    /// directory, else defaults.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::FileNotFound`] if an explicit path does not exist.
    pub fn load(explicit: Option<&Path>) -> Result<Self, KbError> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(KbError::FileNotFound(path.to_path_buf()));
                }
                Self::from_file(path)
            }
            None => {
                let default_path = Path::new(CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Resolve the GitHub token: config first, then `GITHUB_TOKEN`, then `GH_TOKEN`.
    pub fn github_token(&self) -> Option<String> {
        self.github
            .token
            .clone()
            .or_else(|| std::env::var("GITHUB_TOKEN").ok())
            .or_else(|| std::env::var("GH_TOKEN").ok())
    }

    fn check(&self) -> Result<(), KbError> {
        let t = &self.triage;
        if !(0.0..=1.0).contains(&t.high_confidence) || !(0.0..=1.0).contains(&t.low_confidence) {
            return Err(KbError::Config(
                "triage confidence thresholds must be within 0.0..=1.0".into(),
            ));
        }
        if t.low_confidence > t.high_confidence {
            return Err(KbError::Config(format!(
                "triage.low_confidence ({}) exceeds triage.high_confidence ({})",
                t.low_confidence, t.high_confidence
            )));
        }
        Ok(())
    }
}

/// LLM provider configuration.
///
/// # Examples
///
/// ```
/// use kbase_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.model, "gpt-4o");
/// assert_eq!(config.max_retries, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name (e.g. `"openai"`, `"anthropic"`, `"ollama"`).
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Custom base URL for API requests.
    pub base_url: Option<String>,
    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff, in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-4o".into()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    120
}

impl LlmConfig {
    /// Environment variable consulted for the API key of this provider.
    pub fn api_key_env_var(&self) -> &'static str {
        match self.provider.as_str() {
            "anthropic" => "ANTHROPIC_API_KEY",
            "gemini" => "GEMINI_API_KEY",
            _ => "OPENAI_API_KEY",
        }
    }

    /// API key from config, falling back to the provider's env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(self.api_key_env_var()).ok())
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// GitHub API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Personal access token; `GITHUB_TOKEN` / `GH_TOKEN` are used when absent.
    pub token: Option<String>,
    /// REST API root (default: `https://api.github.com`).
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String {
    "https://api.github.com".into()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_base: default_api_base(),
        }
    }
}

/// Triage thresholds and automated-fix policy.
///
/// # Examples
///
/// ```
/// use kbase_core::TriageConfig;
///
/// let config = TriageConfig::default();
/// assert_eq!(config.low_confidence, 0.5);
/// assert!(config.auto_fix_categories.contains(&"documentation".to_string()));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Confidence at or above which an issue counts as high confidence.
    #[serde(default = "default_high_confidence")]
    pub high_confidence: f64,
    /// Confidence below which an issue counts as low confidence.
    #[serde(default = "default_low_confidence")]
    pub low_confidence: f64,
    /// Categories eligible for automatic fix proposals.
    #[serde(default = "default_auto_fix_categories")]
    pub auto_fix_categories: Vec<String>,
    /// Minimum review score (0-10) for an automatic merge.
    #[serde(default = "default_review_min_score")]
    pub review_min_score: u8,
    /// Where triage counters are persisted for the dashboard.
    #[serde(default = "default_stats_path")]
    pub stats_path: PathBuf,
}

fn default_high_confidence() -> f64 {
    0.8
}

fn default_low_confidence() -> f64 {
    0.5
}

fn default_auto_fix_categories() -> Vec<String> {
    vec!["documentation".into(), "outdated".into()]
}

fn default_review_min_score() -> u8 {
    7
}

fn default_stats_path() -> PathBuf {
    PathBuf::from("metrics-output/triage-stats.json")
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            high_confidence: default_high_confidence(),
            low_confidence: default_low_confidence(),
            auto_fix_categories: default_auto_fix_categories(),
            review_min_score: default_review_min_score(),
            stats_path: default_stats_path(),
        }
    }
}

/// Metrics output location and dashboard targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Directory for JSON/CSV metric artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// KPI targets shown on the dashboard.
    #[serde(default)]
    pub targets: MetricTargets,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./metrics-output")
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            targets: MetricTargets::default(),
        }
    }
}

/// KPI targets. Percentages except `time_saved_monthly`, which is hours.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricTargets {
    #[serde(default = "default_triage_accuracy")]
    pub triage_accuracy: f64,
    #[serde(default = "default_high_confidence_rate")]
    pub high_confidence_rate: f64,
    #[serde(default = "default_pr_merge_rate")]
    pub pr_merge_rate: f64,
    #[serde(default = "default_time_saved_monthly")]
    pub time_saved_monthly: f64,
}

fn default_triage_accuracy() -> f64 {
    80.0
}

fn default_high_confidence_rate() -> f64 {
    50.0
}

fn default_pr_merge_rate() -> f64 {
    70.0
}

fn default_time_saved_monthly() -> f64 {
    15.0
}

impl Default for MetricTargets {
    fn default() -> Self {
        Self {
            triage_accuracy: default_triage_accuracy(),
            high_confidence_rate: default_high_confidence_rate(),
            pr_merge_rate: default_pr_merge_rate(),
            time_saved_monthly: default_time_saved_monthly(),
        }
    }
}

/// Documentation validator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateConfig {
    /// Check external links over HTTP.
    #[serde(default = "default_true")]
    pub check_links: bool,
    /// Per-request timeout for link checks.
    #[serde(default = "default_link_timeout_secs")]
    pub link_timeout_secs: u64,
    /// Retries after the first attempt for transient link failures.
    #[serde(default = "default_link_retries")]
    pub link_retries: u32,
    /// Fixed delay between link retries, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Hosts never contacted (e.g. rate-limited or auth-walled sites).
    #[serde(default)]
    pub skip_hosts: Vec<String>,
    /// Glob patterns of Markdown files to leave out.
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_link_timeout_secs() -> u64 {
    10
}

fn default_link_retries() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for ValidateConfig {
    fn default() -> Self {
        Self {
            check_links: true,
            link_timeout_secs: default_link_timeout_secs(),
            link_retries: default_link_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            skip_hosts: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// File locations used by the CLI when flags are omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_docs")]
    pub docs: PathBuf,
    #[serde(default = "default_graph_db")]
    pub graph_db: PathBuf,
    #[serde(default = "default_memory_db")]
    pub memory_db: PathBuf,
    #[serde(default = "default_skills_out")]
    pub skills_out: PathBuf,
}

fn default_docs() -> PathBuf {
    PathBuf::from("docs")
}

fn default_graph_db() -> PathBuf {
    PathBuf::from(".kbase/graph.db")
}

fn default_memory_db() -> PathBuf {
    PathBuf::from(".kbase/memory.db")
}

fn default_skills_out() -> PathBuf {
    PathBuf::from("claude/kbase-core/SKILL.md")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            docs: default_docs(),
            graph_db: default_graph_db(),
            memory_db: default_memory_db(),
            skills_out: default_skills_out(),
        }
    }
}

/// Presentation of generated skill files.
///
/// # Examples
///
/// ```
/// use kbase_core::SkillConfig;
///
/// let config = SkillConfig::default();
/// assert_eq!(config.name, "kbase-core");
/// assert!(!config.activation.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillConfig {
    /// Machine name of the skill (Gemini `name`, Skill graph node key).
    #[serde(default = "default_skill_name")]
    pub name: String,
    /// Heading of the Claude skill file.
    #[serde(default = "default_skill_title")]
    pub title: String,
    /// One-paragraph overview.
    #[serde(default = "default_skill_overview")]
    pub overview: String,
    /// "When to activate" bullets.
    #[serde(default = "default_activation")]
    pub activation: Vec<String>,
    /// Version written into the Gemini skill.
    #[serde(default = "default_skill_version")]
    pub version: String,
}

fn default_skill_name() -> String {
    "kbase-core".into()
}

fn default_skill_title() -> String {
    "Platform Knowledge for AI Coding Assistants".into()
}

fn default_skill_overview() -> String {
    "This skill provides knowledge about the data platform, including API usage, \
     best practices, and common pitfalls."
        .into()
}

fn default_activation() -> Vec<String> {
    vec![
        "User asks about the Storage API".into(),
        "User needs help with the Jobs API".into(),
        "User asks about regional stacks or Stack URLs".into(),
        "User encounters platform-related errors".into(),
    ]
}

fn default_skill_version() -> String {
    "1.0.0".into()
}

impl Default for SkillConfig {
    fn default() -> Self {
        Self {
            name: default_skill_name(),
            title: default_skill_title(),
            overview: default_skill_overview(),
            activation: default_activation(),
            version: default_skill_version(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = KbConfig::default();
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.retry_base_delay_ms, 1000);
        assert_eq!(config.github.api_base, "https://api.github.com");
        assert_eq!(config.triage.high_confidence, 0.8);
        assert_eq!(config.triage.review_min_score, 7);
        assert_eq!(config.metrics.output_dir, PathBuf::from("./metrics-output"));
        assert_eq!(config.metrics.targets.triage_accuracy, 80.0);
        assert_eq!(config.metrics.targets.time_saved_monthly, 15.0);
        assert!(config.validate.check_links);
        assert_eq!(config.validate.link_retries, 2);
        assert_eq!(config.paths.graph_db, PathBuf::from(".kbase/graph.db"));
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = KbConfig::from_toml("").unwrap();
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.triage.low_confidence, 0.5);
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[llm]
provider = "anthropic"
model = "claude-sonnet-4-20250514"
max_retries = 5

[triage]
high_confidence = 0.9
low_confidence = 0.4
auto_fix_categories = ["documentation"]

[metrics.targets]
pr_merge_rate = 60.0

[validate]
check_links = false
skip_hosts = ["localhost"]
exclude = ["drafts/**"]

[skill]
name = "acme-core"
activation = ["User asks about Acme"]
"#;
        let config = KbConfig::from_toml(toml).unwrap();
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.llm.max_retries, 5);
        assert_eq!(config.llm.api_key_env_var(), "ANTHROPIC_API_KEY");
        assert_eq!(config.triage.high_confidence, 0.9);
        assert_eq!(config.triage.auto_fix_categories, vec!["documentation"]);
        assert_eq!(config.metrics.targets.pr_merge_rate, 60.0);
        assert_eq!(config.metrics.targets.triage_accuracy, 80.0);
        assert!(!config.validate.check_links);
        assert_eq!(config.validate.exclude, vec!["drafts/**"]);
        assert_eq!(config.skill.name, "acme-core");
        assert_eq!(config.skill.activation.len(), 1);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let toml = r#"
[triage]
high_confidence = 0.3
low_confidence = 0.6
"#;
        assert!(KbConfig::from_toml(toml).is_err());
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let toml = r#"
[triage]
high_confidence = 80.0
"#;
        assert!(KbConfig::from_toml(toml).is_err());
    }

    #[test]
    fn invalid_toml_returns_error() {
        assert!(KbConfig::from_toml("{{invalid}}").is_err());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let result = KbConfig::load(Some(Path::new("/nonexistent/.kbase.toml")));
        assert!(matches!(result, Err(KbError::FileNotFound(_))));
    }

    #[test]
    fn config_token_wins_over_env() {
        let config = KbConfig {
            github: GitHubConfig {
                token: Some("from-config".into()),
                ..GitHubConfig::default()
            },
            ..KbConfig::default()
        };
        assert_eq!(config.github_token().as_deref(), Some("from-config"));
    }
}
