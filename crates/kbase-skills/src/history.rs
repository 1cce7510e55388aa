//! Per-file git history via git2.
//!
//! Walks commits from HEAD and keeps the ones whose diff against their first
//! parent touches a given path, with line counts for that path only.

use std::path::Path;

use chrono::{DateTime, FixedOffset, SecondsFormat};
use git2::{DiffOptions, Repository, Sort};
use kbase_core::KbError;
use serde::Serialize;

/// Lines added and removed for one file in one commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeStats {
    pub insertions: u64,
    pub deletions: u64,
}

/// A commit that touched a documentation file.
///
/// # Examples
///
/// ```
/// use kbase_skills::history::{ChangeStats, DocCommit};
///
/// let c = DocCommit {
///     hash: "0123456789abcdef".into(),
///     short_hash: "0123456".into(),
///     author: "alice".into(),
///     email: "alice@example.com".into(),
///     date: "2025-01-01T12:00:00+00:00".into(),
///     timestamp: 1735732800,
///     message: "docs: storage".into(),
///     stats: ChangeStats::default(),
/// };
/// assert_eq!(c.short_hash.len(), 7);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocCommit {
    /// Full commit id.
    pub hash: String,
    /// First seven hex digits.
    pub short_hash: String,
    pub author: String,
    pub email: String,
    /// Author date, RFC 3339 in the author's offset.
    pub date: String,
    /// Unix seconds, used for ordering.
    #[serde(skip)]
    pub timestamp: i64,
    /// Subject line.
    pub message: String,
    pub stats: ChangeStats,
}

/// Open the repository containing `path`.
///
/// # Errors
///
/// Returns [`KbError::Git`] if `path` is not inside a git work tree.
pub fn discover(path: &Path) -> Result<Repository, KbError> {
    Repository::discover(path)
        .map_err(|e| KbError::Git(format!("not a git repository ({}): {e}", path.display())))
}

/// History for `rel_path` (relative to the repo work tree), newest first.
///
/// A repository without commits yields an empty history.
///
/// # Errors
///
/// Returns [`KbError::Git`] if walking or diffing fails.
pub fn file_history(repo: &Repository, rel_path: &Path) -> Result<Vec<DocCommit>, KbError> {
    let mut revwalk = repo
        .revwalk()
        .map_err(|e| KbError::Git(format!("failed to create revwalk: {e}")))?;
    revwalk.set_sorting(Sort::TIME).ok();

    if revwalk.push_head().is_err() {
        tracing::debug!("repository has no HEAD, history is empty");
        return Ok(Vec::new());
    }

    let pathspec = rel_path.to_string_lossy().replace('\\', "/");
    let mut history = Vec::new();

    for oid_result in revwalk {
        let oid = oid_result.map_err(|e| KbError::Git(format!("revwalk error: {e}")))?;
        let commit = repo
            .find_commit(oid)
            .map_err(|e| KbError::Git(format!("failed to find commit: {e}")))?;

        let Some(stats) = path_stats(repo, &commit, &pathspec)? else {
            continue;
        };

        let author = commit.author();
        let when = author.when();
        let hash = oid.to_string();

        history.push(DocCommit {
            short_hash: hash[..hash.len().min(7)].to_string(),
            hash,
            author: author.name().unwrap_or("unknown").to_string(),
            email: author.email().unwrap_or("unknown").to_string(),
            date: format_git_time(when.seconds(), when.offset_minutes()),
            timestamp: when.seconds(),
            message: commit.summary().unwrap_or("").to_string(),
            stats,
        });
    }

    Ok(history)
}

/// Line stats for `pathspec` in `commit`, or `None` if the commit does not touch it.
fn path_stats(
    repo: &Repository,
    commit: &git2::Commit,
    pathspec: &str,
) -> Result<Option<ChangeStats>, KbError> {
    let commit_tree = commit
        .tree()
        .map_err(|e| KbError::Git(format!("failed to get commit tree: {e}")))?;

    let parent_tree = if commit.parent_count() > 0 {
        let parent = commit
            .parent(0)
            .map_err(|e| KbError::Git(format!("failed to get parent: {e}")))?;
        Some(
            parent
                .tree()
                .map_err(|e| KbError::Git(format!("failed to get parent tree: {e}")))?,
        )
    } else {
        None
    };

    let mut diff_opts = DiffOptions::new();
    diff_opts.pathspec(pathspec).disable_pathspec_match(true);
    let diff = repo
        .diff_tree_to_tree(
            parent_tree.as_ref(),
            Some(&commit_tree),
            Some(&mut diff_opts),
        )
        .map_err(|e| KbError::Git(format!("failed to compute diff: {e}")))?;

    if diff.deltas().len() == 0 {
        return Ok(None);
    }

    let stats = diff
        .stats()
        .map_err(|e| KbError::Git(format!("failed to compute diff stats: {e}")))?;
    Ok(Some(ChangeStats {
        insertions: stats.insertions() as u64,
        deletions: stats.deletions() as u64,
    }))
}

fn format_git_time(seconds: i64, offset_minutes: i32) -> String {
    let offset = FixedOffset::east_opt(offset_minutes * 60).or_else(|| FixedOffset::east_opt(0));
    match (DateTime::from_timestamp(seconds, 0), offset) {
        (Some(utc), Some(offset)) => utc
            .with_timezone(&offset)
            .to_rfc3339_opts(SecondsFormat::Secs, false),
        _ => seconds.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod test_repo {
    use std::path::Path;

    use git2::{Repository, Signature, Time};

    /// Write `content` to `rel`, stage it and commit as `author` at `time`.
    pub fn commit_file(repo: &Repository, rel: &str, content: &str, author: &str, time: i64, msg: &str) {
        let workdir = repo.workdir().unwrap().to_path_buf();
        let full = workdir.join(rel);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(&full, content).unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new(rel)).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();

        let sig = Signature::new(author, &format!("{author}@example.com"), &Time::new(time, 0)).unwrap();
        let parents: Vec<git2::Commit> = match repo.head() {
            Ok(head) => vec![head.peel_to_commit().unwrap()],
            Err(_) => vec![],
        };
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        repo.commit(Some("HEAD"), &sig, &sig, msg, &tree, &parent_refs)
            .unwrap();
    }
}
