//! Documentation export with git history, for the static docs viewer.

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use kbase_core::KbError;
use serde::Serialize;

use crate::history::{self, DocCommit};

/// Number of commits kept in `recent_changes`.
const RECENT_CHANGES: usize = 10;

/// One exported Markdown document.
#[derive(Debug, Clone, Serialize)]
pub struct ExportedDoc {
    /// Path relative to the repository root.
    pub path: String,
    /// Path relative to the docs directory.
    pub display_path: String,
    /// File name.
    pub name: String,
    pub content: String,
    pub history: Vec<DocCommit>,
    pub commit_count: usize,
    pub last_modified: Option<String>,
    pub last_author: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportMetadata {
    pub generated_at: String,
    pub doc_count: usize,
    /// Sum of per-document history lengths; a commit touching two docs counts twice.
    pub total_commits: usize,
    pub author_count: usize,
    pub docs_directory: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportStatistics {
    pub total_docs: usize,
    pub total_commits: usize,
    pub unique_authors: usize,
    pub authors: Vec<String>,
}

/// Full export document written as JSON.
#[derive(Debug, Clone, Serialize)]
pub struct DocsExport {
    pub docs: Vec<ExportedDoc>,
    pub metadata: ExportMetadata,
    pub recent_changes: Vec<DocCommit>,
    pub statistics: ExportStatistics,
}

/// Export every Markdown file under `docs_dir` (recursively) with its history.
///
/// # Errors
///
/// Returns [`KbError::FileNotFound`] if `docs_dir` is missing,
/// [`KbError::Validation`] if it is not a directory, and [`KbError::Git`]
/// if it is not inside a git work tree.
pub fn export_docs(docs_dir: &Path) -> Result<DocsExport, KbError> {
    if !docs_dir.exists() {
        return Err(KbError::FileNotFound(docs_dir.to_path_buf()));
    }
    if !docs_dir.is_dir() {
        return Err(KbError::Validation(format!(
            "docs path is not a directory: {}",
            docs_dir.display()
        )));
    }

    let docs_dir = docs_dir.canonicalize()?;
    let repo = history::discover(&docs_dir)?;
    let repo_root = repo
        .workdir()
        .ok_or_else(|| KbError::Git("bare repositories are not supported".into()))?
        .canonicalize()?;
    let docs_rel = docs_dir
        .strip_prefix(&repo_root)
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let files = find_markdown_files(&docs_dir, &repo_root);
    if files.is_empty() {
        tracing::warn!(dir = %docs_dir.display(), "no markdown files found");
    }

    let mut docs = Vec::with_capacity(files.len());
    let mut total_commits = 0;

    for rel in files {
        tracing::debug!(file = %rel.display(), "exporting");
        let content = match std::fs::read_to_string(repo_root.join(&rel)) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(file = %rel.display(), error = %e, "failed to read document");
                String::new()
            }
        };
        let history = history::file_history(&repo, &rel)?;
        let display = rel.strip_prefix(&docs_rel).unwrap_or(&rel);

        total_commits += history.len();
        docs.push(ExportedDoc {
            path: slash_path(&rel),
            display_path: slash_path(display),
            name: rel
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            content,
            commit_count: history.len(),
            last_modified: history.first().map(|c| c.date.clone()),
            last_author: history.first().map(|c| c.author.clone()),
            history,
        });
    }

    let mut seen = HashSet::new();
    let mut unique: Vec<DocCommit> = docs
        .iter()
        .flat_map(|d| d.history.iter())
        .filter(|c| seen.insert(c.hash.clone()))
        .cloned()
        .collect();
    unique.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let authors: BTreeSet<String> = unique.iter().map(|c| c.author.clone()).collect();
    let authors: Vec<String> = authors.into_iter().collect();
    unique.truncate(RECENT_CHANGES);

    Ok(DocsExport {
        metadata: ExportMetadata {
            generated_at: kbase_core::now_iso(),
            doc_count: docs.len(),
            total_commits,
            author_count: authors.len(),
            docs_directory: slash_path(&docs_rel),
        },
        statistics: ExportStatistics {
            total_docs: docs.len(),
            total_commits,
            unique_authors: authors.len(),
            authors,
        },
        recent_changes: unique,
        docs,
    })
}

/// Write the export as pretty JSON, creating parent directories.
pub fn write_export(export: &DocsExport, output: &Path) -> Result<(), KbError> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(output, serde_json::to_string_pretty(export)?)?;
    Ok(())
}

/// Markdown files under `docs_dir`, relative to `repo_root`, sorted.
pub fn find_markdown_files(docs_dir: &Path, repo_root: &Path) -> Vec<PathBuf> {
    let walker = ignore::WalkBuilder::new(docs_dir).build();
    let mut files = Vec::new();

    for entry in walker {
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
        if let Ok(rel) = path.strip_prefix(repo_root) {
            files.push(rel.to_path_buf());
        }
    }

    files.sort();
    files
}

fn slash_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
