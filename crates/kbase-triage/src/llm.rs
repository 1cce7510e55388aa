use std::time::Duration;

use kbase_core::{KbError, LlmConfig};
use serde::{Deserialize, Serialize};

/// A message in a chat conversation with the LLM.
///
/// # Examples
///
/// ```
/// use kbase_triage::llm::{ChatMessage, Role};
///
/// let msg = ChatMessage::user("Triage this issue");
/// assert!(matches!(msg.role, Role::User));
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Role in the chat conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Chat completions URL of a provider's OpenAI-compatible API.
fn default_endpoint(provider: &str) -> &'static str {
    match provider {
        "anthropic" => "https://api.anthropic.com/v1/chat/completions",
        "gemini" => "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
        "ollama" => "http://localhost:11434/v1/chat/completions",
        _ => "https://api.openai.com/v1/chat/completions",
    }
}

/// OpenAI-compatible chat completions client with retry.
///
/// Works with any provider that exposes `/v1/chat/completions`; without a
/// `base_url` the provider's public endpoint is used. Network
/// errors, HTTP 429 and 5xx responses are retried up to `max_retries` times,
/// waiting `retry_base_delay_ms * 2^attempt` between attempts. Other 4xx
/// responses fail immediately.
///
/// # Examples
///
/// ```
/// use kbase_core::LlmConfig;
/// use kbase_triage::llm::LlmClient;
///
/// let config = LlmConfig {
///     api_key: Some("test-key".into()),
///     ..LlmConfig::default()
/// };
/// let client = LlmClient::new(&config).unwrap();
/// assert_eq!(client.model(), "gpt-4o");
/// ```
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: Option<String>,
}

enum Attempt {
    Done(String),
    Retry(String),
    Fail(KbError),
}

impl LlmClient {
    /// Create a client. The API key comes from config or the provider's env var.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Llm`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> Result<Self, KbError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KbError::Llm(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: config.resolve_api_key(),
            config: config.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Whether an API key was found. Local providers may not need one.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        match self.config.base_url.as_deref() {
            Some(base) => format!("{}/v1/chat/completions", base.trim_end_matches('/')),
            None => default_endpoint(&self.config.provider).to_string(),
        }
    }

    /// Send a chat completion request and return the assistant's text.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::Llm`] when retries are exhausted, on a
    /// non-retryable HTTP status, or when the response has no content.
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, KbError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": 0.1,
            "response_format": { "type": "json_object" },
        });
        let url = self.endpoint();

        let mut attempt: u32 = 0;
        loop {
            match self.send_once(&url, &body).await {
                Attempt::Done(content) => return Ok(content),
                Attempt::Fail(err) => return Err(err),
                Attempt::Retry(reason) if attempt < self.config.max_retries => {
                    let delay = self
                        .config
                        .retry_base_delay_ms
                        .saturating_mul(1u64 << attempt.min(16));
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay,
                        reason = %reason,
                        "LLM request failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Attempt::Retry(reason) => {
                    return Err(KbError::Llm(format!(
                        "giving up after {} attempts: {reason}",
                        attempt + 1
                    )));
                }
            }
        }
    }

    async fn send_once(&self, url: &str, body: &serde_json::Value) -> Attempt {
        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return Attempt::Retry(format!("request failed: {e}")),
        };

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Attempt::Retry(format!("LLM API returned {status}"));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Attempt::Fail(KbError::Llm(format!("LLM API error {status}: {text}")));
        }

        let value: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => return Attempt::Fail(KbError::Llm(format!("failed to parse response: {e}"))),
        };

        match value
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
        {
            Some(content) => Attempt::Done(content.to_string()),
            None => Attempt::Fail(KbError::Llm(format!(
                "unexpected response structure: {value}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> LlmConfig {
        LlmConfig {
            api_key: Some("sk-test".into()),
            base_url: Some(base_url.to_string()),
            max_retries: 2,
            retry_base_delay_ms: 1,
            ..LlmConfig::default()
        }
    }

    fn completion(content: &str) -> String {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
        .to_string()
    }

    #[test]
    fn chat_message_serializes() {
        let json = serde_json::to_value(ChatMessage::system("hello")).unwrap();
        assert_eq!(json["role"], "system");
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn endpoint_ignores_trailing_slash() {
        let client = LlmClient::new(&config("http://localhost:11434/")).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn endpoint_follows_provider_without_base_url() {
        let endpoint = |provider: &str| {
            LlmClient::new(&LlmConfig {
                provider: provider.into(),
                api_key: Some("k".into()),
                ..LlmConfig::default()
            })
            .unwrap()
            .endpoint()
        };
        assert_eq!(endpoint("anthropic"), "https://api.anthropic.com/v1/chat/completions");
        assert_eq!(
            endpoint("gemini"),
            "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions"
        );
        assert_eq!(endpoint("ollama"), "http://localhost:11434/v1/chat/completions");
        assert_eq!(endpoint("openai"), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn base_url_overrides_provider() {
        let client = LlmClient::new(&LlmConfig {
            provider: "anthropic".into(),
            ..config("https://proxy.internal")
        })
        .unwrap();
        assert_eq!(client.endpoint(), "https://proxy.internal/v1/chat/completions");
    }

    #[tokio::test]
    async fn returns_message_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_body(completion("{\"ok\":true}"))
            .expect(1)
            .create_async()
            .await;

        let client = LlmClient::new(&config(&server.url())).unwrap();
        let out = client.chat(vec![ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(out, "{\"ok\":true}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn retries_server_errors_then_gives_up() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = LlmClient::new(&config(&server.url())).unwrap();
        let err = client.chat(vec![ChatMessage::user("hi")]).await.unwrap_err();
        assert!(err.to_string().contains("giving up after 3 attempts"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_errors_fail_fast() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body("bad key")
            .expect(1)
            .create_async()
            .await;

        let client = LlmClient::new(&config(&server.url())).unwrap();
        let err = client.chat(vec![ChatMessage::user("hi")]).await.unwrap_err();
        assert!(err.to_string().contains("401"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_content_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body("{\"choices\":[]}")
            .create_async()
            .await;

        let client = LlmClient::new(&config(&server.url())).unwrap();
        let err = client.chat(vec![ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, KbError::Llm(_)));
    }
}
