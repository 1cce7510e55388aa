//! External link extraction and reachability checks.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use std::time::Duration;

use kbase_core::{KbError, ValidateConfig};
use regex::Regex;
use reqwest::{Client, Method, StatusCode};

use crate::fences::FenceScan;

static INLINE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[[^\]]*\]\(\s*<?(https?://[^\s)>]+)>?").expect("valid inline link regex")
});

static AUTOLINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(https?://[^>\s]+)>").expect("valid autolink regex"));

/// A URL referenced from a Markdown file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub url: String,
    /// 1-based line of the first reference.
    pub line: usize,
}

/// Extract `http`/`https` links outside fenced code, first occurrence per URL.
///
/// # Examples
///
/// ```
/// use kbase_validate::fences::extract_code_blocks;
/// use kbase_validate::links::extract_links;
///
/// let md = "See [docs](https://example.com/a) and <https://example.com/b>.\n";
/// let links = extract_links(md, &extract_code_blocks(md));
/// assert_eq!(links.len(), 2);
/// assert_eq!(links[1].url, "https://example.com/b");
/// ```
pub fn extract_links(markdown: &str, fences: &FenceScan) -> Vec<Link> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for (idx, line) in markdown.lines().enumerate() {
        let line_no = idx + 1;
        if fences.is_fenced(line_no) {
            continue;
        }

        let mut found: Vec<(usize, &str)> = INLINE_LINK
            .captures_iter(line)
            .chain(AUTOLINK.captures_iter(line))
            .filter_map(|c| c.get(1))
            .map(|m| (m.start(), m.as_str()))
            .collect();
        found.sort_by_key(|(pos, _)| *pos);

        for (_, url) in found {
            if seen.insert(url.to_string()) {
                links.push(Link {
                    url: url.to_string(),
                    line: line_no,
                });
            }
        }
    }

    links
}

/// Result of checking one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Ok(u16),
    Broken(u16),
    Unreachable(String),
    Skipped,
}

impl LinkStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, LinkStatus::Broken(_) | LinkStatus::Unreachable(_))
    }
}

/// Checks URLs with HEAD (GET fallback), retries and a per-run cache.
pub struct LinkChecker {
    client: Client,
    retries: u32,
    retry_delay: Duration,
    skip_hosts: Vec<String>,
    cache: HashMap<String, LinkStatus>,
}

impl LinkChecker {
    /// Build a checker from the `[validate]` config section.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &ValidateConfig) -> Result<Self, KbError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.link_timeout_secs))
            .user_agent(concat!("kbase-validate/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| KbError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            retries: config.link_retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            skip_hosts: config.skip_hosts.iter().map(|h| h.to_lowercase()).collect(),
            cache: HashMap::new(),
        })
    }

    /// Number of distinct URLs checked so far.
    pub fn checked(&self) -> usize {
        self.cache.len()
    }

    /// Check `url`, reusing the result if it was already checked this run.
    pub async fn check(&mut self, url: &str) -> LinkStatus {
        if let Some(status) = self.cache.get(url) {
            return status.clone();
        }
        let status = if self.is_skipped(url) {
            LinkStatus::Skipped
        } else {
            self.check_with_retries(url).await
        };
        tracing::debug!(url, ?status, "checked link");
        self.cache.insert(url.to_string(), status.clone());
        status
    }

    fn is_skipped(&self, url: &str) -> bool {
        let Ok(parsed) = reqwest::Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_lowercase();
        self.skip_hosts
            .iter()
            .any(|skip| host == *skip || host.ends_with(&format!(".{skip}")))
    }

    async fn check_with_retries(&self, url: &str) -> LinkStatus {
        let mut attempt = 0;
        loop {
            let status = self.check_once(url).await;
            let retryable = match &status {
                LinkStatus::Unreachable(_) => true,
                LinkStatus::Broken(code) => {
                    *code == StatusCode::TOO_MANY_REQUESTS.as_u16() || *code >= 500
                }
                _ => false,
            };
            if !retryable || attempt >= self.retries {
                return status;
            }
            attempt += 1;
            tracing::debug!(url, attempt, "retrying link check");
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    async fn check_once(&self, url: &str) -> LinkStatus {
        let head = self.client.request(Method::HEAD, url).send().await;
        let response = match head {
            Ok(resp)
                if resp.status() == StatusCode::METHOD_NOT_ALLOWED
                    || resp.status() == StatusCode::NOT_IMPLEMENTED =>
            {
                self.client.get(url).send().await
            }
            other => other,
        };

        match response {
            Ok(resp) if resp.status().as_u16() < 400 => LinkStatus::Ok(resp.status().as_u16()),
            Ok(resp) => LinkStatus::Broken(resp.status().as_u16()),
            Err(e) => LinkStatus::Unreachable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fences::extract_code_blocks;
    use mockito::Server;

    fn config(retries: u32) -> ValidateConfig {
        ValidateConfig {
            link_retries: retries,
            retry_delay_ms: 0,
            link_timeout_secs: 5,
            skip_hosts: vec!["internal.example".into()],
            ..ValidateConfig::default()
        }
    }

    #[test]
    fn links_inside_code_fences_are_ignored() {
        let md = "[a](https://a.example)\n```\n[b](https://b.example)\n```\n";
        let links = extract_links(md, &extract_code_blocks(md));
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://a.example");
    }

    #[test]
    fn duplicate_urls_keep_first_line() {
        let md = "[a](https://a.example/x)\n\n[again](https://a.example/x \"title\")\n";
        let links = extract_links(md, &extract_code_blocks(md));
        assert_eq!(links, vec![Link { url: "https://a.example/x".into(), line: 1 }]);
    }

    #[test]
    fn relative_and_mailto_links_are_not_external() {
        let md = "[local](./guide.md) [mail](mailto:a@b.c) [anchor](#top)\n";
        assert!(extract_links(md, &extract_code_blocks(md)).is_empty());
    }

    #[tokio::test]
    async fn head_success_is_ok() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("HEAD", "/ok")
            .with_status(200)
            .create_async()
            .await;

        let mut checker = LinkChecker::new(&config(0)).unwrap();
        let status = checker.check(&format!("{}/ok", server.url())).await;
        assert_eq!(status, LinkStatus::Ok(200));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn method_not_allowed_falls_back_to_get() {
        let mut server = Server::new_async().await;
        let _head = server
            .mock("HEAD", "/page")
            .with_status(405)
            .create_async()
            .await;
        let get = server
            .mock("GET", "/page")
            .with_status(200)
            .with_body("hello")
            .create_async()
            .await;

        let mut checker = LinkChecker::new(&config(0)).unwrap();
        let status = checker.check(&format!("{}/page", server.url())).await;
        assert_eq!(status, LinkStatus::Ok(200));
        get.assert_async().await;
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("HEAD", "/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let mut checker = LinkChecker::new(&config(3)).unwrap();
        let status = checker.check(&format!("{}/missing", server.url())).await;
        assert_eq!(status, LinkStatus::Broken(404));
        assert!(status.is_failure());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_reported() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("HEAD", "/flaky")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let mut checker = LinkChecker::new(&config(2)).unwrap();
        let status = checker.check(&format!("{}/flaky", server.url())).await;
        assert_eq!(status, LinkStatus::Broken(503));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn each_url_is_checked_once() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("HEAD", "/cached")
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let mut checker = LinkChecker::new(&config(0)).unwrap();
        let url = format!("{}/cached", server.url());
        checker.check(&url).await;
        checker.check(&url).await;
        assert_eq!(checker.checked(), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn skipped_hosts_do_not_hit_the_network() {
        let mut checker = LinkChecker::new(&config(0)).unwrap();
        assert_eq!(
            checker.check("https://docs.internal.example/page").await,
            LinkStatus::Skipped
        );
        assert_eq!(
            checker.check("https://internal.example").await,
            LinkStatus::Skipped
        );
    }
}
