use kbase_core::KbError;
use serde::Deserialize;

use crate::triage::IssueReport;

/// GitHub client for reading issues and writing labels and comments.
///
/// # Examples
///
/// ```
/// use kbase_triage::github::parse_issue_reference;
///
/// let (owner, repo, number) = parse_issue_reference("acme/docs#21").unwrap();
/// assert_eq!((owner.as_str(), repo.as_str(), number), ("acme", "docs", 21));
/// ```
pub struct GitHubClient {
    octocrab: octocrab::Octocrab,
}

#[derive(Deserialize)]
struct ApiLabel {
    name: String,
}

#[derive(Deserialize)]
struct ApiIssue {
    number: u64,
    title: String,
    body: Option<String>,
    #[serde(default)]
    labels: Vec<ApiLabel>,
}

impl From<ApiIssue> for IssueReport {
    fn from(issue: ApiIssue) -> Self {
        IssueReport {
            number: issue.number,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
        }
    }
}

impl GitHubClient {
    /// Create a client against `api_base` (normally `https://api.github.com`).
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Config`] if no token is given, or
    /// [`KbError::GitHub`] if the client cannot be built.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use kbase_triage::github::GitHubClient;
    ///
    /// let client = GitHubClient::new(Some("ghp_xxxx".into()), "https://api.github.com").unwrap();
    /// ```
    pub fn new(token: Option<String>, api_base: &str) -> Result<Self, KbError> {
        let token = token.ok_or_else(|| {
            KbError::Config(
                "no GitHub token. Set github.token in .kbase.toml or GITHUB_TOKEN".into(),
            )
        })?;
        let api_base = api_base.trim_end_matches('/').to_string();

        let octocrab = octocrab::Octocrab::builder()
            .base_uri(api_base.as_str())
            .map_err(|e| KbError::GitHub(format!("invalid GitHub API base '{api_base}': {e}")))?
            .personal_token(token)
            .build()
            .map_err(|e| KbError::GitHub(format!("failed to create GitHub client: {e}")))?;

        Ok(Self { octocrab })
    }

    /// Fetch an issue.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::GitHub`] on network or API errors.
    pub async fn get_issue(&self, owner: &str, repo: &str, number: u64) -> Result<IssueReport, KbError> {
        let route = format!("/repos/{owner}/{repo}/issues/{number}");
        let issue: ApiIssue = self
            .octocrab
            .get(route, None::<&()>)
            .await
            .map_err(|e| KbError::GitHub(format!("failed to fetch issue #{number}: {e}")))?;
        Ok(issue.into())
    }

    /// Add labels to an issue, keeping existing ones.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::GitHub`] on API errors.
    pub async fn add_labels(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        labels: &[String],
    ) -> Result<(), KbError> {
        if labels.is_empty() {
            return Ok(());
        }
        let route = format!("/repos/{owner}/{repo}/issues/{number}/labels");
        let body = serde_json::json!({ "labels": labels });
        let _response: serde_json::Value = self
            .octocrab
            .post(route, Some(&body))
            .await
            .map_err(|e| KbError::GitHub(format!("failed to add labels: {e}")))?;
        tracing::debug!(number, count = labels.len(), "labels added");
        Ok(())
    }

    /// Post a comment on an issue.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::GitHub`] on API errors.
    pub async fn post_comment(&self, owner: &str, repo: &str, number: u64, body: &str) -> Result<(), KbError> {
        let route = format!("/repos/{owner}/{repo}/issues/{number}/comments");
        let payload = serde_json::json!({ "body": body });
        let _response: serde_json::Value = self
            .octocrab
            .post(route, Some(&payload))
            .await
            .map_err(|e| KbError::GitHub(format!("failed to post comment: {e}")))?;
        Ok(())
    }
}

/// Parse an issue reference (`owner/repo#number`).
///
/// # Errors
///
/// Returns [`KbError::Config`] if the format is invalid.
pub fn parse_issue_reference(issue_ref: &str) -> Result<(String, String, u64), KbError> {
    let invalid = || {
        KbError::Config(format!(
            "invalid issue reference '{issue_ref}', expected owner/repo#number"
        ))
    };
    let (owner_repo, number_str) = issue_ref.split_once('#').ok_or_else(invalid)?;
    let (owner, repo) = owner_repo.split_once('/').ok_or_else(invalid)?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return Err(invalid());
    }
    let number: u64 = number_str
        .parse()
        .map_err(|_| KbError::Config(format!("invalid issue number: {number_str}")))?;
    Ok((owner.to_string(), repo.to_string(), number))
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;

    use super::*;

    #[test]
    fn rejects_bad_references() {
        assert!(parse_issue_reference("acme/docs").is_err());
        assert!(parse_issue_reference("docs#3").is_err());
        assert!(parse_issue_reference("acme/docs#three").is_err());
        assert!(parse_issue_reference("/docs#3").is_err());
        assert!(parse_issue_reference("a/b/c#3").is_err());
    }

    #[test]
    fn requires_token() {
        let err = GitHubClient::new(None, "https://api.github.com").err().unwrap();
        assert!(matches!(err, KbError::Config(_)));
    }

    #[tokio::test]
    async fn fetches_issue_with_null_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/repos/acme/docs/issues/21")
            .match_header("authorization", Matcher::Regex("t0ken".into()))
            .with_status(200)
            .with_body(
                r#"{"number": 21, "title": "Old header", "body": null,
                    "labels": [{"name": "docs"}, {"name": "storage"}]}"#,
            )
            .create_async()
            .await;

        let client = GitHubClient::new(Some("t0ken".into()), &server.url()).unwrap();
        let issue = client.get_issue("acme", "docs", 21).await.unwrap();
        assert_eq!(issue.title, "Old header");
        assert!(issue.body.is_empty());
        assert_eq!(issue.labels, vec!["docs", "storage"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_issue_is_a_github_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/repos/acme/docs/issues/1")
            .with_status(404)
            .with_body("{\"message\": \"Not Found\"}")
            .create_async()
            .await;

        let client = GitHubClient::new(Some("t".into()), &server.url()).unwrap();
        let err = client.get_issue("acme", "docs", 1).await.unwrap_err();
        assert!(matches!(&err, KbError::GitHub(msg) if msg.contains("failed to fetch issue #1")));
    }
}
