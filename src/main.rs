use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use miette::{Context, IntoDiagnostic, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use kbase_core::{KbConfig, OutputFormat};
use kbase_graph::events::{IssueEvent, PullRequestEvent};
use kbase_graph::{EventHandler, KnowledgeGraph, NodeType};
use kbase_learning::LearningStore;
use kbase_metrics::{ErrorTracker, MetricsBundle, TriageStats, UsageTracker};
use kbase_skills::generator::{SkillTarget, METADATA_FILE};
use kbase_triage::github::{parse_issue_reference, GitHubClient};
use kbase_triage::{
    FixRecord, IssueReport, LlmClient, LoopReport, SelfHealingLoop, TriageDecision, TriageOutcome,
};

#[derive(Parser)]
#[command(
    name = "kbase",
    version,
    about = "Self-healing documentation knowledge base toolkit",
    long_about = "kbase keeps a product documentation knowledge base healthy for AI coding assistants.\n\n\
                   It turns Markdown docs into assistant skill files, validates code samples and links,\n\
                   tracks usage and errors, and runs an LLM triage -> fix -> review loop on issues.\n\n\
                   Examples:\n  \
                     kbase skill generate --graph     Rebuild the skill file from docs/\n  \
                     kbase validate                   Check code blocks and links in docs/\n  \
                     kbase dashboard --simulate       Show the metrics dashboard with sample data\n  \
                     kbase triage acme/docs#21        Classify a GitHub issue\n  \
                     kbase fix acme/docs#21 --dry-run Propose a fix without touching files"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .kbase.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable summaries (default)\n  \
                         json      Machine-readable JSON\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    verbose: bool,

    /// When to use colors
    #[arg(long, global = true, default_value = "auto")]
    color: ColorChoice,
}

#[derive(Subcommand)]
enum Command {
    /// Create a default .kbase.toml in the current directory
    #[command(long_about = "Create a default .kbase.toml in the current directory.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .kbase.toml already exists.")]
    Init,
    /// Generate or check assistant skill files
    Skill {
        #[command(subcommand)]
        action: SkillAction,
    },
    /// Export documentation
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },
    /// Validate code blocks and links in Markdown docs
    #[command(long_about = "Validate code blocks and links in Markdown docs.\n\n\
        Code blocks in python, javascript, typescript, rust, go and java are parsed with\n\
        tree-sitter; json, yaml and toml blocks with their own parsers. External links are\n\
        checked with HEAD (falling back to GET). Exits with status 1 on any finding.\n\n\
        Examples:\n  kbase validate\n  kbase validate docs/ --no-links --format json")]
    Validate {
        /// Directory to validate (default: paths.docs)
        path: Option<PathBuf>,
        /// Skip external link checks
        #[arg(long)]
        no_links: bool,
    },
    /// Compute usage and error metrics
    Metrics {
        #[command(subcommand)]
        action: MetricsAction,
    },
    /// Show the KPI dashboard
    #[command(long_about = "Show the KPI dashboard.\n\n\
        Reads usage-stats.json, error-stats.json and triage-stats.json from the metrics\n\
        output directory. Prints an ANSI dashboard, or writes a self-contained HTML page\n\
        with --html.\n\n\
        Examples:\n  kbase dashboard\n  kbase dashboard --html metrics-output/dashboard.html\n  kbase dashboard --simulate")]
    Dashboard {
        /// Directory holding the metrics JSON files (default: metrics.output_dir)
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Write an HTML dashboard to this file instead of printing
        #[arg(long)]
        html: Option<PathBuf>,
        /// Use built-in sample data
        #[arg(long)]
        simulate: bool,
    },
    /// Inspect and export the knowledge graph
    Graph {
        #[command(subcommand)]
        action: GraphAction,
    },
    /// Record GitHub issue and pull request events in the knowledge graph
    Event {
        #[command(subcommand)]
        kind: EventKind,
    },
    /// Capture assistant interactions and find documentation gaps
    Learn {
        #[command(subcommand)]
        action: LearnAction,
    },
    /// Classify an issue with the LLM
    #[command(
        args_conflicts_with_subcommands = true,
        long_about = "Classify an issue with the LLM.\n\n\
        ISSUE is either owner/repo#number (fetched from GitHub) or a JSON file with\n\
        {number, title, body, labels}. Unusable model output yields the triage-failed label.\n\n\
        Examples:\n  kbase triage acme/docs#21 --label --comment\n  kbase triage issue.json --format json\n  kbase triage verdict --correct"
    )]
    Triage {
        #[command(subcommand)]
        action: Option<TriageAction>,
        #[command(flatten)]
        args: TriageArgs,
    },
    /// Run the full triage, fix and review loop on an issue
    #[command(long_about = "Run the full triage, fix and review loop on an issue.\n\n\
        A fix is proposed only for confident issues in an auto-fix category. Changes are\n\
        exact text replacements applied to the working tree under --root.\n\n\
        Examples:\n  kbase fix acme/docs#21 --dry-run\n  kbase fix issue.json --pr-body pr.md --proposal-out fix.json")]
    Fix {
        /// owner/repo#number or a JSON issue file
        issue: String,
        /// Repository root the changes apply to
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Review the proposal but do not modify files
        #[arg(long)]
        dry_run: bool,
        /// Write the pull request description to this file
        #[arg(long)]
        pr_body: Option<PathBuf>,
        /// Save the proposal for `kbase review-fix`
        #[arg(long)]
        proposal_out: Option<PathBuf>,
    },
    /// Review a saved fix proposal and decide whether it can merge
    ReviewFix {
        /// Fix record written by `kbase fix --proposal-out`
        record: PathBuf,
    },
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum SkillAction {
    /// Concatenate the docs into skill files
    Generate {
        /// Docs directory (default: paths.docs)
        #[arg(long)]
        docs: Option<PathBuf>,
        /// Claude skill output (default: paths.skills_out)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Gemini skill output (default: gemini/<skill name>/skill.yaml)
        #[arg(long)]
        gemini_output: Option<PathBuf>,
        /// Which skill format(s) to write
        #[arg(long, default_value = "claude")]
        target: TargetChoice,
        /// Record the skill and its source documents in the knowledge graph
        #[arg(long)]
        graph: bool,
    },
    /// Exit with status 1 if the docs changed since the skill was generated
    Check {
        /// Docs directory (default: paths.docs)
        #[arg(long)]
        docs: Option<PathBuf>,
        /// Metadata sidecar (default: next to paths.skills_out)
        #[arg(long)]
        metadata: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum DocsAction {
    /// Export docs with their git history as JSON
    Export {
        /// Docs directory (default: paths.docs)
        #[arg(long)]
        docs: Option<PathBuf>,
        /// Output file
        #[arg(long, default_value = "web/data/docs.json")]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum MetricsAction {
    /// Plugin, skill and command usage from a log file
    Usage {
        /// Log file to parse
        #[arg(long, required_unless_present = "simulate")]
        log: Option<PathBuf>,
        /// Generate this many days of sample data instead of reading a log
        #[arg(long, conflicts_with = "log")]
        simulate: Option<u32>,
        /// Output directory (default: metrics.output_dir)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Error counts, resolution times and trend from an error log
    Errors {
        /// JSON error log to read
        #[arg(long, required_unless_present = "simulate")]
        log: Option<PathBuf>,
        /// Generate this many days of sample data instead of reading a log
        #[arg(long, conflicts_with = "log")]
        simulate: Option<u32>,
        /// Upper bound of simulated errors per weekday
        #[arg(long, default_value = "10")]
        errors_per_day: u32,
        /// Output directory (default: metrics.output_dir)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum GraphAction {
    /// Node and edge counts
    Stats,
    /// List nodes, optionally of one type
    List {
        /// Document, Concept, Skill, Issue or PullRequest
        #[arg(long = "type", value_parser = parse_node_type)]
        node_type: Option<NodeType>,
    },
    /// Export the graph as vis.js JSON
    Export {
        #[arg(long, default_value = "web/data/graph.json")]
        output: PathBuf,
    },
    /// Nodes that depend on a node, following edges backwards
    Dependents {
        /// Node id, e.g. Document:docs/02-storage.md
        id: String,
        #[arg(long, default_value = "3")]
        depth: usize,
    },
}

#[derive(Subcommand)]
enum EventKind {
    /// Issue events
    Issue {
        #[command(subcommand)]
        action: IssueEventAction,
    },
    /// Pull request events
    Pr {
        #[command(subcommand)]
        action: PrEventAction,
    },
}

#[derive(Subcommand)]
enum IssueEventAction {
    /// An issue was opened
    Created(EventPayload),
    /// An issue was closed
    Closed {
        #[arg(long)]
        number: u64,
    },
}

#[derive(Subcommand)]
enum PrEventAction {
    /// A pull request was opened
    Created(EventPayload),
    /// A pull request was merged
    Merged {
        #[arg(long)]
        number: u64,
    },
}

#[derive(Args)]
struct EventPayload {
    /// GitHub JSON payload (the object itself, or a webhook body wrapping it)
    #[arg(long)]
    payload: PathBuf,
    /// Number, if the payload does not carry one
    #[arg(long)]
    number: Option<u64>,
}

#[derive(Subcommand)]
enum LearnAction {
    /// Record an interaction
    Capture {
        #[arg(long)]
        context: String,
        #[arg(long)]
        response: String,
        #[arg(long)]
        feedback: Option<String>,
    },
    /// Rate an interaction from 1 to 5
    Feedback {
        id: i64,
        #[arg(long)]
        rating: u8,
        #[arg(long, default_value = "")]
        comment: String,
    },
    /// Ask the LLM whether an interaction reveals a documentation gap
    Analyze {
        id: i64,
        /// Store the gap as a pending learning
        #[arg(long)]
        store: bool,
    },
    /// Learnings waiting for an issue
    Pending,
    /// Record the issue opened for a learning
    Issued {
        learning_id: i64,
        #[arg(long)]
        issue: u64,
    },
    /// Export interactions and learnings as JSON
    Export {
        #[arg(long, default_value = "web/data/learnings.json")]
        output: PathBuf,
    },
}

#[derive(Args)]
struct TriageArgs {
    /// owner/repo#number or a JSON issue file
    issue: Option<String>,
    /// Apply the triage labels on GitHub
    #[arg(long)]
    label: bool,
    /// Post the triage summary as an issue comment
    #[arg(long)]
    comment: bool,
}

#[derive(Subcommand)]
enum TriageAction {
    /// Record whether a triage decision was right
    Verdict {
        #[arg(long, conflicts_with = "incorrect")]
        correct: bool,
        #[arg(long)]
        incorrect: bool,
    },
}

fn parse_node_type(s: &str) -> Result<NodeType, String> {
    s.parse().map_err(|e: kbase_core::KbError| e.to_string())
}

#[derive(Clone, Copy, ValueEnum)]
enum TargetChoice {
    Claude,
    Gemini,
    Both,
}

impl From<TargetChoice> for SkillTarget {
    fn from(choice: TargetChoice) -> Self {
        match choice {
            TargetChoice::Claude => SkillTarget::Claude,
            TargetChoice::Gemini => SkillTarget::Gemini,
            TargetChoice::Both => SkillTarget::Both,
        }
    }
}

#[derive(Clone, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    /// Auto-detect based on terminal
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

fn print_welcome(use_color: bool) {
    let version = env!("CARGO_PKG_VERSION");
    let (bold, cyan, green, reset) = if use_color {
        ("\x1b[1m", "\x1b[36m", "\x1b[32m", "\x1b[0m")
    } else {
        ("", "", "", "")
    };

    println!("{bold}kbase{reset} v{version}: keep your documentation knowledge base healthy\n");
    println!("Quick start:");
    println!("  {cyan}kbase init{reset}               Create a .kbase.toml config file");
    println!("  {cyan}kbase skill generate{reset}     Build the assistant skill from docs/");
    println!("  {cyan}kbase validate{reset}           Check code blocks and links\n");
    println!("All commands:");
    println!("  {green}skill{reset}       Generate or check skill files");
    println!("  {green}docs{reset}        Export docs with git history");
    println!("  {green}validate{reset}    Validate code blocks and links");
    println!("  {green}metrics{reset}     Usage and error metrics");
    println!("  {green}dashboard{reset}   KPI dashboard (terminal or HTML)");
    println!("  {green}graph{reset}       Knowledge graph queries and export");
    println!("  {green}event{reset}       Record issue and PR events");
    println!("  {green}learn{reset}       Interaction capture and gap analysis");
    println!("  {green}triage{reset}      Classify an issue with the LLM");
    println!("  {green}fix{reset}         Triage, fix and review an issue");
    println!("  {green}review-fix{reset}  Review a saved fix proposal");
    println!("\nRun 'kbase <command> --help' for details.");
}

const DEFAULT_CONFIG: &str = r#"# kbase configuration
# Values shown are the defaults.

[llm]
# provider = "openai"
# model = "gpt-4o"
# base_url = "https://api.openai.com"
# max_retries = 3
# retry_base_delay_ms = 1000
# timeout_secs = 120

[github]
# token is read from GITHUB_TOKEN or GH_TOKEN when unset
# api_base = "https://api.github.com"

[triage]
# high_confidence = 0.8
# low_confidence = 0.5
# auto_fix_categories = ["documentation", "outdated"]
# review_min_score = 7
# stats_path = "metrics-output/triage-stats.json"

[metrics]
# output_dir = "./metrics-output"

[metrics.targets]
# triage_accuracy = 80.0
# high_confidence_rate = 50.0
# pr_merge_rate = 70.0
# time_saved_monthly = 15.0

[validate]
# check_links = true
# link_timeout_secs = 10
# link_retries = 2
# retry_delay_ms = 1000
# skip_hosts = []
# exclude = []

[paths]
# docs = "docs"
# graph_db = ".kbase/graph.db"
# memory_db = ".kbase/memory.db"
# skills_out = "claude/kbase-core/SKILL.md"

[skill]
# name = "kbase-core"
# title = "Platform Knowledge for AI Coding Assistants"
# activation = ["User asks about the Storage API"]
"#;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();
}

fn spinner(message: &str) -> Option<indicatif::ProgressBar> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    Some(pb)
}

fn finish(pb: &Option<indicatif::ProgressBar>, message: &'static str) {
    if let Some(pb) = pb {
        pb.finish_with_message(message);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to parse {}", path.display()))
}

/// Webhook bodies wrap the object under `key`; plain API objects do not.
fn unwrap_payload(mut value: serde_json::Value, key: &str) -> serde_json::Value {
    match value.get_mut(key).map(serde_json::Value::take) {
        Some(inner) if inner.is_object() => inner,
        _ => value,
    }
}

fn payload_number(value: &serde_json::Value, explicit: Option<u64>) -> Result<u64> {
    match explicit.or_else(|| value.get("number").and_then(serde_json::Value::as_u64)) {
        Some(n) => Ok(n),
        None => miette::bail!(help = "pass --number", "payload has no number"),
    }
}

fn write_text(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).into_diagnostic()?;
        }
    }
    std::fs::write(path, content)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to write {}", path.display()))
}

struct GitHubIssue {
    client: GitHubClient,
    owner: String,
    repo: String,
}

async fn load_issue(reference: &str, config: &KbConfig) -> Result<(IssueReport, Option<GitHubIssue>)> {
    let path = Path::new(reference);
    if path.is_file() {
        return Ok((read_json(path)?, None));
    }
    let (owner, repo, number) = parse_issue_reference(reference)?;
    let client = GitHubClient::new(config.github_token(), &config.github.api_base)?;
    let issue = client.get_issue(&owner, &repo, number).await?;
    Ok((issue, Some(GitHubIssue { client, owner, repo })))
}

fn llm_client(config: &KbConfig) -> Result<LlmClient> {
    let client = LlmClient::new(&config.llm)?;
    let local = config.llm.base_url.is_some() || config.llm.provider == "ollama";
    if !client.has_api_key() && !local {
        miette::bail!(
            help = format!("set {} or llm.api_key in .kbase.toml", config.llm.api_key_env_var()),
            "no LLM API key configured"
        );
    }
    Ok(client)
}

fn print_triage_text(issue: &IssueReport, outcome: &TriageOutcome) {
    println!("Issue #{}: {}", issue.number, issue.title);
    match outcome {
        TriageOutcome::Triaged {
            result,
            decision,
            labels,
        } => {
            println!("  Category:   {}", result.category);
            println!("  Priority:   {}", result.priority);
            println!(
                "  Confidence: {:.0}% ({})",
                result.confidence * 100.0,
                result.band
            );
            if !result.summary.is_empty() {
                println!("  Summary:    {}", result.summary);
            }
            for file in &result.affected_files {
                println!("  File:       {file}");
            }
            println!("  Decision:   {}", decision.label());
            println!("  Labels:     {}", labels.join(", "));
        }
        TriageOutcome::Failed { reason } => {
            println!("  Triage failed: {reason}");
            println!("  Labels:     {}", outcome.labels().join(", "));
        }
    }
}

fn print_loop_text(report: &LoopReport) {
    print_triage_text(&report.issue, &report.outcome);
    let Some(proposal) = &report.fix else {
        if report.outcome.decision() == Some(TriageDecision::ProposeFix) {
            println!("\nNo fix was proposed.");
        }
        return;
    };
    println!(
        "\nProposed fix: {} ({} change(s), {:.0}% confidence)",
        proposal.pr_title,
        proposal.changes.len(),
        proposal.confidence * 100.0
    );
    for change in &proposal.changes {
        println!("  - {}: {}", change.file, change.rationale);
    }
    match &report.applied {
        Some(applied) => {
            println!(
                "Applied {} change(s), skipped {}",
                applied.applied.len(),
                applied.skipped.len()
            );
            for skipped in &applied.skipped {
                println!("  skipped {}: {}", skipped.file, skipped.reason);
            }
        }
        None => println!("Dry run: no files changed"),
    }
    if let Some(review) = &report.review {
        println!(
            "Review: {}/10, {}",
            review.score,
            if review.approve { "approved" } else { "not approved" }
        );
        for concern in &review.concerns {
            println!("  concern: {concern}");
        }
    }
    if let Some(merge) = report.merge {
        println!("Decision: {merge}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = KbConfig::load(cli.config.as_deref())?;
    tracing::debug!(docs = %config.paths.docs.display(), model = %config.llm.model, "configuration loaded");

    let use_color = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    };

    match cli.command {
        None => {
            print_welcome(use_color);
        }
        Some(Command::Init) => {
            let path = Path::new(kbase_core::CONFIG_FILE);
            if path.exists() {
                miette::bail!(
                    help = "edit the existing file or remove it first",
                    "{} already exists",
                    kbase_core::CONFIG_FILE
                );
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {} with default configuration", kbase_core::CONFIG_FILE);
        }
        Some(Command::Skill { action }) => match action {
            SkillAction::Generate {
                docs,
                output,
                gemini_output,
                target,
                graph,
            } => {
                let docs = docs.unwrap_or_else(|| config.paths.docs.clone());
                let claude_out = output.unwrap_or_else(|| config.paths.skills_out.clone());
                let gemini_out = gemini_output.unwrap_or_else(|| {
                    PathBuf::from("gemini").join(&config.skill.name).join("skill.yaml")
                });
                let report = kbase_skills::generator::generate(
                    &docs,
                    target.into(),
                    Some(claude_out.as_path()),
                    Some(gemini_out.as_path()),
                    &config.skill,
                )?;
                eprintln!("Combined {} doc(s) from {}", report.section_count, docs.display());

                if graph {
                    let db = KnowledgeGraph::open(&config.paths.graph_db)?;
                    let sources: Vec<String> = report
                        .sources
                        .iter()
                        .map(|f| docs.join(f).to_string_lossy().replace('\\', "/"))
                        .collect();
                    let id = EventHandler::new(&db).skill_generated(&config.skill.name, &sources)?;
                    eprintln!("Recorded {id} in {}", config.paths.graph_db.display());
                }

                match cli.format {
                    OutputFormat::Json => print_json(&report)?,
                    _ => {
                        for path in &report.written {
                            println!("Wrote {}", path.display());
                        }
                        println!("Content hash: {}", report.content_hash);
                    }
                }
            }
            SkillAction::Check { docs, metadata } => {
                let docs = docs.unwrap_or_else(|| config.paths.docs.clone());
                let metadata = metadata.unwrap_or_else(|| {
                    config
                        .paths
                        .skills_out
                        .parent()
                        .unwrap_or(Path::new("."))
                        .join(METADATA_FILE)
                });
                if kbase_skills::generator::is_stale(&docs, &metadata)? {
                    println!("Skill is out of date. Run 'kbase skill generate'.");
                    std::process::exit(1);
                }
                println!("Skill is up to date");
            }
        },
        Some(Command::Docs {
            action: DocsAction::Export { docs, output },
        }) => {
            let docs = docs.unwrap_or_else(|| config.paths.docs.clone());
            let export = kbase_skills::export::export_docs(&docs)?;
            kbase_skills::export::write_export(&export, &output)?;
            eprintln!(
                "Exported {} doc(s) with {} commit(s) to {}",
                export.metadata.doc_count,
                export.metadata.total_commits,
                output.display()
            );
            if cli.format == OutputFormat::Json {
                print_json(&export.statistics)?;
            }
        }
        Some(Command::Validate { path, no_links }) => {
            let root = path.unwrap_or_else(|| config.paths.docs.clone());
            let check_links = config.validate.check_links && !no_links;
            let pb = if check_links {
                spinner("Checking code blocks and links...")
            } else {
                None
            };
            let report = kbase_validate::validate_docs(&root, &config.validate, check_links)
                .await
                .inspect_err(|_| finish(&pb, "Failed"))?;
            finish(&pb, "Done");
            print!("{}", report.render(cli.format)?);
            if !report.is_clean() {
                std::process::exit(1);
            }
        }
        Some(Command::Metrics { action }) => match action {
            MetricsAction::Usage {
                log,
                simulate,
                output_dir,
            } => {
                let tracker = match (simulate, log) {
                    (Some(days), _) => UsageTracker::simulate(
                        days,
                        chrono::Utc::now().naive_utc(),
                        &mut rand::thread_rng(),
                    ),
                    (None, Some(log)) => UsageTracker::from_log(&log)?,
                    (None, None) => miette::bail!(help = "pass --log FILE or --simulate DAYS", "no usage source"),
                };
                let dir = output_dir.unwrap_or_else(|| config.metrics.output_dir.clone());
                for path in tracker.write_outputs(&dir)? {
                    eprintln!("Wrote {}", path.display());
                }
                match cli.format {
                    OutputFormat::Json => print_json(&tracker.report())?,
                    _ => print!("{}", tracker.render_summary()),
                }
            }
            MetricsAction::Errors {
                log,
                simulate,
                errors_per_day,
                output_dir,
            } => {
                let tracker = match (simulate, log) {
                    (Some(days), _) => ErrorTracker::simulate(
                        days,
                        errors_per_day,
                        chrono::Utc::now().naive_utc(),
                        &mut rand::thread_rng(),
                    ),
                    (None, Some(log)) => ErrorTracker::from_log(&log)?,
                    (None, None) => miette::bail!(help = "pass --log FILE or --simulate DAYS", "no error source"),
                };
                let dir = output_dir.unwrap_or_else(|| config.metrics.output_dir.clone());
                for path in tracker.write_outputs(&dir)? {
                    eprintln!("Wrote {}", path.display());
                }
                match cli.format {
                    OutputFormat::Json => print_json(&tracker.report())?,
                    _ => print!("{}", tracker.render_summary()),
                }
            }
        },
        Some(Command::Dashboard {
            data_dir,
            html,
            simulate,
        }) => {
            let bundle = if simulate {
                MetricsBundle::simulated(&mut rand::thread_rng())
            } else {
                let dir = data_dir.unwrap_or_else(|| config.metrics.output_dir.clone());
                let bundle = MetricsBundle::load(&dir)?;
                if bundle.is_empty() {
                    miette::bail!(
                        help = "run 'kbase metrics usage' and 'kbase metrics errors' first, or pass --simulate",
                        "no metrics found in {}",
                        dir.display()
                    );
                }
                bundle
            };
            let targets = config.metrics.targets;
            match (html, cli.format) {
                (Some(path), _) => {
                    write_text(&path, &kbase_metrics::html::render_html(&bundle, &targets))?;
                    println!("Wrote dashboard to {}", path.display());
                }
                (None, OutputFormat::Json) => {
                    print_json(&kbase_metrics::Kpis::from_bundle(&bundle))?;
                }
                (None, _) => {
                    print!(
                        "{}",
                        kbase_metrics::dashboard::render_terminal(&bundle, &targets, use_color)
                    );
                }
            }
        }
        Some(Command::Graph { action }) => match action {
            GraphAction::Export { output } => {
                let vis = kbase_graph::export::export_graph(&config.paths.graph_db)?;
                kbase_graph::export::write_graph(&vis, &output)?;
                println!(
                    "Exported {} node(s) and {} edge(s) to {}",
                    vis.metadata.node_count,
                    vis.metadata.edge_count,
                    output.display()
                );
            }
            action => {
                let graph = KnowledgeGraph::open(&config.paths.graph_db)?;
                match action {
                    GraphAction::Stats => {
                        let stats = graph.stats()?;
                        match cli.format {
                            OutputFormat::Json => print_json(&stats)?,
                            _ => {
                                println!("Nodes: {}", stats.total_nodes);
                                for (kind, count) in &stats.nodes_by_type {
                                    println!("  {kind}: {count}");
                                }
                                println!("Edges: {}", stats.total_edges);
                            }
                        }
                    }
                    GraphAction::List { node_type } => {
                        let nodes = match node_type {
                            Some(t) => graph.query_by_type(t)?,
                            None => graph.all_nodes()?,
                        };
                        match cli.format {
                            OutputFormat::Json => print_json(&nodes)?,
                            _ => {
                                for node in &nodes {
                                    println!("{}  {}", node.id, node.display_name());
                                }
                            }
                        }
                    }
                    GraphAction::Dependents { id, depth } => {
                        let dependents = graph.find_dependents(&id, depth)?;
                        match cli.format {
                            OutputFormat::Json => print_json(&dependents)?,
                            _ if dependents.is_empty() => println!("Nothing depends on {id}"),
                            _ => {
                                for dependent in &dependents {
                                    println!("{dependent}");
                                }
                            }
                        }
                    }
                    GraphAction::Export { .. } => {}
                }
            }
        },
        Some(Command::Event { kind }) => {
            let graph = KnowledgeGraph::open(&config.paths.graph_db)?;
            let handler = EventHandler::new(&graph);
            match kind {
                EventKind::Issue {
                    action: IssueEventAction::Created(payload),
                } => {
                    let value = unwrap_payload(read_json(&payload.payload)?, "issue");
                    let number = payload_number(&value, payload.number)?;
                    let issue: IssueEvent = serde_json::from_value(value).into_diagnostic()?;
                    let links = handler.issue_created(number, &issue)?;
                    match cli.format {
                        OutputFormat::Json => print_json(&links)?,
                        _ => println!(
                            "Recorded {}: {} concept(s), {} document(s)",
                            links.node_id,
                            links.concepts.len(),
                            links.documents.len()
                        ),
                    }
                }
                EventKind::Issue {
                    action: IssueEventAction::Closed { number },
                } => {
                    handler.issue_closed(number)?;
                    println!("Closed Issue:{number}");
                }
                EventKind::Pr {
                    action: PrEventAction::Created(payload),
                } => {
                    let value = unwrap_payload(read_json(&payload.payload)?, "pull_request");
                    let number = payload_number(&value, payload.number)?;
                    let pr: PullRequestEvent = serde_json::from_value(value).into_diagnostic()?;
                    let links = handler.pr_created(number, &pr)?;
                    match cli.format {
                        OutputFormat::Json => print_json(&links)?,
                        _ => println!(
                            "Recorded {}: fixes {:?}, modifies {} document(s)",
                            links.node_id,
                            links.fixes,
                            links.modifies.len()
                        ),
                    }
                }
                EventKind::Pr {
                    action: PrEventAction::Merged { number },
                } => {
                    let outcome = handler.pr_merged(number)?;
                    match cli.format {
                        OutputFormat::Json => print_json(&outcome)?,
                        _ => {
                            println!(
                                "Merged PullRequest:{number}, closed {} issue(s)",
                                outcome.closed_issues.len()
                            );
                            for skill in &outcome.affected_skills {
                                println!("  regenerate {skill}");
                            }
                        }
                    }
                }
            }
        }
        Some(Command::Learn { action }) => {
            if let LearnAction::Export { output } = &action {
                let export = kbase_learning::export_learnings(&config.paths.memory_db)?;
                kbase_learning::write_export(&export, output)?;
                println!(
                    "Exported {} interaction(s) and {} learning(s) to {}",
                    export.metadata.interaction_count,
                    export.metadata.learning_count,
                    output.display()
                );
                return Ok(());
            }
            let store = LearningStore::open(&config.paths.memory_db)?;
            match action {
                LearnAction::Capture {
                    context,
                    response,
                    feedback,
                } => {
                    let id = store.capture(&context, &response, feedback.as_deref())?;
                    println!("Captured interaction #{id}");
                }
                LearnAction::Feedback {
                    id,
                    rating,
                    comment,
                } => {
                    store.add_feedback(id, rating, &comment)?;
                    println!("Recorded feedback for interaction #{id}");
                }
                LearnAction::Analyze { id, store: keep } => {
                    let interaction = store.get_interaction(id)?;
                    let llm = llm_client(&config)?;
                    let pb = spinner("Analyzing interaction...");
                    let analysis = kbase_learning::analyze(&llm, &interaction)
                        .await
                        .inspect_err(|_| finish(&pb, "Failed"))?;
                    finish(&pb, "Done");
                    let learning_id = if keep && analysis.has_gap {
                        Some(store.store_learning(id, &analysis)?)
                    } else {
                        None
                    };
                    match cli.format {
                        OutputFormat::Json => print_json(&analysis)?,
                        _ if analysis.has_gap => {
                            println!(
                                "Gap in {}: {}",
                                analysis.concept.as_deref().unwrap_or("unknown"),
                                analysis.proposed_fix.as_deref().unwrap_or("no fix proposed")
                            );
                            if let Some(lid) = learning_id {
                                println!("Stored learning #{lid}");
                            }
                        }
                        _ => println!("No gap identified"),
                    }
                }
                LearnAction::Pending => {
                    let pending = store.pending_learnings()?;
                    match cli.format {
                        OutputFormat::Json => print_json(&pending)?,
                        _ if pending.is_empty() => println!("No pending learnings"),
                        _ => {
                            for l in &pending {
                                println!(
                                    "#{} {} ({}): {}",
                                    l.id,
                                    l.concept,
                                    l.gap_type.as_deref().unwrap_or("gap"),
                                    l.proposed_fix.as_deref().unwrap_or("")
                                );
                            }
                        }
                    }
                }
                LearnAction::Issued { learning_id, issue } => {
                    store.mark_issued(learning_id, issue)?;
                    println!("Learning #{learning_id} linked to issue #{issue}");
                }
                LearnAction::Export { .. } => {}
            }
        }
        Some(Command::Triage { action, args }) => {
            let stats_path = config.triage.stats_path.clone();
            let mut stats = TriageStats::load(&stats_path)?;

            if let Some(TriageAction::Verdict { correct, incorrect }) = action {
                if !correct && !incorrect {
                    miette::bail!(help = "pass --correct or --incorrect", "no verdict given");
                }
                stats.record_verdict(correct);
                stats.save(&stats_path)?;
                println!("Triage accuracy: {:.1}%", stats.triage_accuracy);
                return Ok(());
            }

            let Some(reference) = args.issue else {
                miette::bail!(help = "kbase triage owner/repo#N", "no issue given");
            };
            let (issue, github) = load_issue(&reference, &config).await?;
            if (args.label || args.comment) && github.is_none() {
                miette::bail!(
                    help = "use an owner/repo#N reference to write back to GitHub",
                    "--label and --comment need a GitHub issue"
                );
            }

            let pipeline = SelfHealingLoop::new(llm_client(&config)?, config.triage.clone(), ".");
            let pb = spinner("Triaging issue...");
            let result = pipeline.triage(&issue, &mut stats).await;
            stats.save(&stats_path)?;
            let outcome = result.inspect_err(|_| finish(&pb, "Failed"))?;
            finish(&pb, "Done");

            if let Some(gh) = &github {
                if args.label {
                    gh.client
                        .add_labels(&gh.owner, &gh.repo, issue.number, &outcome.labels())
                        .await?;
                }
                if args.comment {
                    let body = kbase_triage::triage::render_comment(&outcome);
                    gh.client
                        .post_comment(&gh.owner, &gh.repo, issue.number, &body)
                        .await?;
                }
            }

            match cli.format {
                OutputFormat::Json => print_json(&outcome)?,
                OutputFormat::Markdown => print!("{}", kbase_triage::triage::render_comment(&outcome)),
                OutputFormat::Text => print_triage_text(&issue, &outcome),
            }
        }
        Some(Command::Fix {
            issue,
            root,
            dry_run,
            pr_body,
            proposal_out,
        }) => {
            let stats_path = config.triage.stats_path.clone();
            let mut stats = TriageStats::load(&stats_path)?;
            let (issue, _) = load_issue(&issue, &config).await?;

            let pipeline = SelfHealingLoop::new(llm_client(&config)?, config.triage.clone(), root);
            let pb = spinner("Running triage, fix and review...");
            // Stages that completed before a failure still count.
            let result = pipeline.run(&issue, !dry_run, &mut stats).await;
            stats.save(&stats_path)?;
            let report = result.inspect_err(|_| finish(&pb, "Failed"))?;
            finish(&pb, "Done");

            if let (Some(path), Some(body)) = (&pr_body, &report.pr_description) {
                write_text(path, body)?;
                eprintln!("Wrote PR description to {}", path.display());
            }
            if let Some(path) = &proposal_out {
                match report.fix_record() {
                    Some(record) => {
                        write_text(path, &serde_json::to_string_pretty(&record).into_diagnostic()?)?;
                        eprintln!("Saved fix record to {}", path.display());
                    }
                    None => eprintln!("No fix proposed, {} not written", path.display()),
                }
            }

            match cli.format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Markdown => match &report.pr_description {
                    Some(body) => print!("{body}"),
                    None => print!("{}", kbase_triage::triage::render_comment(&report.outcome)),
                },
                OutputFormat::Text => print_loop_text(&report),
            }
        }
        Some(Command::ReviewFix { record: record_path }) => {
            let mut record: FixRecord = read_json(&record_path)?;
            let stats_path = config.triage.stats_path.clone();
            let mut stats = TriageStats::load(&stats_path)?;

            let pipeline = SelfHealingLoop::new(llm_client(&config)?, config.triage.clone(), ".");
            let pb = spinner("Reviewing fix...");
            let (verdict, decision) = pipeline
                .review_record(&mut record, &mut stats)
                .await
                .inspect_err(|_| finish(&pb, "Failed"))?;
            finish(&pb, "Done");
            stats.save(&stats_path)?;
            write_text(
                &record_path,
                &serde_json::to_string_pretty(&record).into_diagnostic()?,
            )?;

            match cli.format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "review": verdict,
                    "decision": decision,
                }))?,
                _ => {
                    println!(
                        "Review of fix for #{}: {}/10, {}",
                        record.issue.number,
                        verdict.score,
                        if verdict.approve { "approved" } else { "not approved" }
                    );
                    for concern in &verdict.concerns {
                        println!("  concern: {concern}");
                    }
                    println!("Decision: {decision}");
                }
            }
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "kbase", &mut std::io::stdout());
        }
    }

    Ok(())
}
