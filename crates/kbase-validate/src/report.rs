use std::fmt::Write;
use std::path::{Path, PathBuf};

use kbase_core::{KbError, OutputFormat, ValidateConfig};
use serde::Serialize;

use crate::fences::extract_code_blocks;
use crate::links::{extract_links, LinkChecker, LinkStatus};
use crate::syntax::{check_syntax, SyntaxCheck};

/// What a finding is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingKind {
    Syntax,
    UnterminatedFence,
    BrokenLink,
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FindingKind::Syntax => write!(f, "syntax"),
            FindingKind::UnterminatedFence => write!(f, "unterminated-fence"),
            FindingKind::BrokenLink => write!(f, "broken-link"),
        }
    }
}

/// One problem found in a documentation file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub file: PathBuf,
    /// 1-based line in the Markdown file.
    pub line: usize,
    pub kind: FindingKind,
    pub message: String,
}

/// Summary of a validation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub files_checked: usize,
    pub blocks_checked: usize,
    pub blocks_skipped: usize,
    pub links_checked: usize,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Render in the requested output format.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Serialization`] if JSON encoding fails.
    pub fn render(&self, format: OutputFormat) -> Result<String, KbError> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Text => Ok(self.render_text()),
            OutputFormat::Markdown => Ok(self.render_markdown()),
        }
    }

    fn render_text(&self) -> String {
        let mut out = String::new();
        for f in &self.findings {
            let _ = writeln!(out, "{}:{}: [{}] {}", f.file.display(), f.line, f.kind, f.message);
        }
        if !self.findings.is_empty() {
            out.push('\n');
        }
        let _ = writeln!(
            out,
            "{} files, {} code blocks checked ({} skipped), {} links checked: {} finding(s)",
            self.files_checked,
            self.blocks_checked,
            self.blocks_skipped,
            self.links_checked,
            self.findings.len()
        );
        out
    }

    fn render_markdown(&self) -> String {
        let mut out = String::from("## Documentation validation\n\n");
        let _ = writeln!(out, "| Metric | Count |");
        let _ = writeln!(out, "|---|---|");
        let _ = writeln!(out, "| Files | {} |", self.files_checked);
        let _ = writeln!(out, "| Code blocks checked | {} |", self.blocks_checked);
        let _ = writeln!(out, "| Code blocks skipped | {} |", self.blocks_skipped);
        let _ = writeln!(out, "| Links checked | {} |", self.links_checked);
        let _ = writeln!(out, "| Findings | {} |", self.findings.len());

        if self.findings.is_empty() {
            out.push_str("\nNo problems found.\n");
            return out;
        }

        out.push_str("\n### Findings\n\n");
        for f in &self.findings {
            let _ = writeln!(
                out,
                "- `{}:{}` **{}**: {}",
                f.file.display(),
                f.line,
                f.kind,
                f.message.replace('\n', " ")
            );
        }
        out
    }
}

/// Validate every Markdown file under `root` (or `root` itself if it is a file).
///
/// Files matching a `config.exclude` glob are left out. Findings are ordered
/// by file, then line.
///
/// # Errors
///
/// Returns [`KbError::FileNotFound`] if `root` does not exist and
/// [`KbError::Config`] for an invalid exclude pattern.
pub async fn validate_docs(
    root: &Path,
    config: &ValidateConfig,
    check_links: bool,
) -> Result<ValidationReport, KbError> {
    if !root.exists() {
        return Err(KbError::FileNotFound(root.to_path_buf()));
    }

    let excludes = config
        .exclude
        .iter()
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| KbError::Config(format!("invalid exclude pattern '{p}': {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let files = markdown_files(root, &excludes);
    let mut checker = if check_links {
        Some(LinkChecker::new(config)?)
    } else {
        None
    };
    let mut report = ValidationReport::default();

    for path in files {
        let content = std::fs::read_to_string(&path)?;
        report.files_checked += 1;
        tracing::debug!(file = %path.display(), "validating");

        let scan = extract_code_blocks(&content);
        if let Some(line) = scan.unterminated {
            report.findings.push(Finding {
                file: path.clone(),
                line,
                kind: FindingKind::UnterminatedFence,
                message: "code fence is never closed".into(),
            });
        }

        for block in &scan.blocks {
            match check_syntax(block)? {
                SyntaxCheck::Skipped => report.blocks_skipped += 1,
                SyntaxCheck::Valid => report.blocks_checked += 1,
                SyntaxCheck::Invalid { line, message } => {
                    report.blocks_checked += 1;
                    report.findings.push(Finding {
                        file: path.clone(),
                        line,
                        kind: FindingKind::Syntax,
                        message,
                    });
                }
            }
        }

        if let Some(checker) = checker.as_mut() {
            for link in extract_links(&content, &scan) {
                let status = checker.check(&link.url).await;
                let message = match status {
                    LinkStatus::Broken(code) => format!("{} returned HTTP {code}", link.url),
                    LinkStatus::Unreachable(err) => format!("{} unreachable: {err}", link.url),
                    LinkStatus::Ok(_) | LinkStatus::Skipped => continue,
                };
                report.findings.push(Finding {
                    file: path.clone(),
                    line: link.line,
                    kind: FindingKind::BrokenLink,
                    message,
                });
            }
        }
    }

    report.links_checked = checker.map(|c| c.checked()).unwrap_or(0);
    report
        .findings
        .sort_by(|a, b| a.file.cmp(&b.file).then(a.line.cmp(&b.line)));
    Ok(report)
}

fn markdown_files(root: &Path, excludes: &[glob::Pattern]) -> Vec<PathBuf> {
    if root.is_file() {
        return vec![root.to_path_buf()];
    }

    let mut files = Vec::new();
    for entry in ignore::WalkBuilder::new(root).build() {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if path.extension().map_or(true, |ext| ext != "md") {
            continue;
        }
        let rel = path.strip_prefix(root).unwrap_or(path);
        if excludes
            .iter()
            .any(|p| p.matches_path(rel) || p.matches_path(path))
        {
            tracing::debug!(file = %path.display(), "excluded");
            continue;
        }
        files.push(path.to_path_buf());
    }
    files.sort();
    files
}
