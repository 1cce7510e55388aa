//! Turn GitHub issue and pull request events into graph updates.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use kbase_core::KbError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::store::{rel, KnowledgeGraph, NodeType};

/// Keywords recognised in issue text, and the concept each maps to.
const CONCEPT_KEYWORDS: &[(&str, &str)] = &[
    ("storage api", "StorageAPI"),
    ("jobs api", "JobsAPI"),
    ("stack url", "StackURL"),
    ("project id", "ProjectID"),
    ("token", "Authentication"),
    ("input mapping", "InputMapping"),
    ("output mapping", "OutputMapping"),
    ("custom python", "CustomPython"),
    ("streamlit", "Streamlit"),
    ("flow", "Flows"),
];

static FILE_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:docs|skills)/[\w/\-]+\.(?:md|py|yaml)").expect("valid file regex")
});

static FIXES_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:fixes|closes|resolves)\s+#(\d+)").expect("valid fixes regex")
});

/// Concept keys mentioned in `text`, matched case-insensitively.
///
/// # Examples
///
/// ```
/// use kbase_graph::events::extract_concepts;
///
/// let found = extract_concepts("The Storage API token expired");
/// assert!(found.contains("StorageAPI"));
/// assert!(found.contains("Authentication"));
/// ```
pub fn extract_concepts(text: &str) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    CONCEPT_KEYWORDS
        .iter()
        .filter(|(keyword, _)| lower.contains(keyword))
        .map(|(_, concept)| (*concept).to_string())
        .collect()
}

/// Repository paths under `docs/` or `skills/` mentioned in `text`.
pub fn extract_files(text: &str) -> BTreeSet<String> {
    FILE_REF
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Issue numbers referenced as `fixes #N`, `closes #N` or `resolves #N`, in order.
pub fn extract_fixed_issues(text: &str) -> Vec<u64> {
    let mut seen = BTreeSet::new();
    FIXES_REF
        .captures_iter(text)
        .filter_map(|c| c[1].parse::<u64>().ok())
        .filter(|n| seen.insert(*n))
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Label {
    pub name: String,
}

/// The fields of a GitHub issue payload the graph keeps.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueEvent {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
}

/// The fields of a GitHub pull request payload the graph keeps.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
    /// File list when the payload carries one. GitHub's own payloads send a
    /// count here, which leaves the list empty.
    #[serde(default, deserialize_with = "files_or_count")]
    pub changed_files: Vec<ChangedFile>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FilesOrCount {
    List(Vec<ChangedFile>),
    Count(#[allow(dead_code)] u64),
}

fn files_or_count<'de, D>(deserializer: D) -> Result<Vec<ChangedFile>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<FilesOrCount>::deserialize(deserializer)? {
        Some(FilesOrCount::List(files)) => files,
        Some(FilesOrCount::Count(_)) | None => Vec::new(),
    })
}

/// What an issue was linked to.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IssueLinks {
    pub node_id: String,
    pub concepts: Vec<String>,
    pub documents: Vec<String>,
}

/// What a pull request was linked to.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PullRequestLinks {
    pub node_id: String,
    pub fixes: Vec<u64>,
    pub modifies: Vec<String>,
}

/// Result of a merge: closed issues and skills that should be regenerated.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeOutcome {
    pub closed_issues: Vec<u64>,
    pub modified_documents: usize,
    pub affected_skills: Vec<String>,
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Applies events to a [`KnowledgeGraph`].
pub struct EventHandler<'a> {
    graph: &'a KnowledgeGraph,
}

impl<'a> EventHandler<'a> {
    pub fn new(graph: &'a KnowledgeGraph) -> Self {
        Self { graph }
    }

    /// Record a new issue and link it to the concepts and documents it mentions.
    pub fn issue_created(&self, number: u64, issue: &IssueEvent) -> Result<IssueLinks, KbError> {
        let body = issue.body.clone().unwrap_or_default();
        let labels: Vec<&str> = issue.labels.iter().map(|l| l.name.as_str()).collect();
        let issue_id = self.graph.add_node(
            NodeType::Issue,
            &number.to_string(),
            object(json!({
                "number": number,
                "title": issue.title,
                "body": body,
                "status": "open",
                "labels": labels,
                "url": issue.html_url,
                "created_at": issue.created_at,
            })),
        )?;

        let text = format!("{} {body}", issue.title);
        let mut links = IssueLinks {
            node_id: issue_id.clone(),
            ..IssueLinks::default()
        };

        for concept in extract_concepts(&text) {
            let concept_id = self.graph.add_node(
                NodeType::Concept,
                &concept,
                object(json!({ "name": concept })),
            )?;
            self.graph.add_edge(&issue_id, &concept_id, rel::ABOUT, Map::new())?;
            links.concepts.push(concept);
        }

        for path in extract_files(&text) {
            let doc_id =
                self.graph
                    .ensure_node(NodeType::Document, &path, object(json!({ "path": path })))?;
            self.graph.add_edge(&issue_id, &doc_id, rel::ABOUT, Map::new())?;
            links.documents.push(path);
        }

        tracing::info!(
            issue = number,
            concepts = links.concepts.len(),
            documents = links.documents.len(),
            "issue tracked"
        );
        Ok(links)
    }

    /// Mark an issue closed.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::NotFound`] if the issue was never tracked.
    pub fn issue_closed(&self, number: u64) -> Result<(), KbError> {
        self.graph.update_node(
            &NodeType::Issue.id(&number.to_string()),
            object(json!({ "status": "closed" })),
        )?;
        tracing::info!(issue = number, "issue closed");
        Ok(())
    }

    /// Record a pull request with the issues it fixes and the files it changes.
    pub fn pr_created(
        &self,
        number: u64,
        pr: &PullRequestEvent,
    ) -> Result<PullRequestLinks, KbError> {
        let body = pr.body.clone().unwrap_or_default();
        let pr_id = self.graph.add_node(
            NodeType::PullRequest,
            &number.to_string(),
            object(json!({
                "number": number,
                "title": pr.title,
                "body": body,
                "status": "open",
                "url": pr.html_url,
                "created_at": pr.created_at,
                "additions": pr.additions,
                "deletions": pr.deletions,
            })),
        )?;

        let mut links = PullRequestLinks {
            node_id: pr_id.clone(),
            ..PullRequestLinks::default()
        };

        for issue in extract_fixed_issues(&format!("{} {body}", pr.title)) {
            let issue_id = NodeType::Issue.id(&issue.to_string());
            self.graph.add_edge(&issue_id, &pr_id, rel::FIXED_BY, Map::new())?;
            links.fixes.push(issue);
        }

        let mut modified: BTreeSet<String> =
            pr.changed_files.iter().map(|f| f.filename.clone()).collect();
        if modified.is_empty() {
            modified = extract_files(&format!("{} {body}", pr.title));
        }
        for path in modified {
            let doc_id =
                self.graph
                    .ensure_node(NodeType::Document, &path, object(json!({ "path": path })))?;
            self.graph.add_edge(&pr_id, &doc_id, rel::MODIFIES, Map::new())?;
            links.modifies.push(path);
        }

        tracing::info!(pr = number, fixes = ?links.fixes, "pull request tracked");
        Ok(links)
    }

    /// Mark a pull request merged, close the issues it fixes and report
    /// which skills include the documents it modified.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::NotFound`] if the pull request was never tracked.
    pub fn pr_merged(&self, number: u64) -> Result<MergeOutcome, KbError> {
        let pr_id = NodeType::PullRequest.id(&number.to_string());
        self.graph
            .update_node(&pr_id, object(json!({ "status": "merged" })))?;

        let mut outcome = MergeOutcome::default();
        for node in self.graph.find_related(&pr_id, Some(rel::FIXED_BY))? {
            if node.node_type != NodeType::Issue {
                continue;
            }
            self.graph
                .update_node(&node.id, object(json!({ "status": "closed" })))?;
            if let Some(n) = node.prop_u64("number") {
                outcome.closed_issues.push(n);
            }
        }

        let modified = self.graph.find_related(&pr_id, Some(rel::MODIFIES))?;
        outcome.modified_documents = modified.len();
        let mut skills = BTreeSet::new();
        for doc in &modified {
            for dependent in self.graph.find_dependents(&doc.id, 3)? {
                if dependent.starts_with("Skill:") {
                    skills.insert(dependent);
                }
            }
        }
        outcome.affected_skills = skills.into_iter().collect();

        tracing::info!(
            pr = number,
            closed = outcome.closed_issues.len(),
            skills = outcome.affected_skills.len(),
            "pull request merged"
        );
        Ok(outcome)
    }

    /// Record a generated skill and the documents it includes.
    pub fn skill_generated(&self, name: &str, sources: &[String]) -> Result<String, KbError> {
        let skill_id = self.graph.add_node(
            NodeType::Skill,
            name,
            object(json!({
                "name": name,
                "generated_at": kbase_core::now_iso(),
                "source_count": sources.len(),
            })),
        )?;
        for path in sources {
            let doc_id =
                self.graph
                    .ensure_node(NodeType::Document, path, object(json!({ "path": path })))?;
            self.graph.add_edge(&doc_id, &skill_id, rel::INCLUDES, Map::new())?;
        }
        tracing::info!(skill = name, sources = sources.len(), "skill recorded");
        Ok(skill_id)
    }
}
