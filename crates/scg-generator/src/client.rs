//! LLM API client.
//!
//! Speaks the Anthropic Messages API and the OpenAI Chat Completions API and
//! returns the text payload of the first response.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Which API family to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
    OpenAi,
}

impl Provider {
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Anthropic => "claude-3-7-sonnet-20250219",
            Provider::OpenAi => "gpt-4o",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::OpenAi => "https://api.openai.com",
        }
    }

    /// Environment variables holding the key, in lookup order.
    pub fn key_vars(&self) -> &'static [&'static str] {
        match self {
            Provider::Anthropic => &["ANTHROPIC_API_KEY"],
            Provider::OpenAi => &["OPENAI_API_KEY", "OPEN_API_KEY"],
        }
    }
}

impl FromStr for Provider {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(Provider::Anthropic),
            "openai" | "open-ai" | "gpt" => Ok(Provider::OpenAi),
            other => Err(ClientError::UnknownProvider(other.to_string())),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Anthropic => f.write_str("anthropic"),
            Provider::OpenAi => f.write_str("openai"),
        }
    }
}

/// Client configuration.
#[derive(Clone)]
pub struct ClientConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// API root without the `/v1/...` path
    pub base_url: String,
    pub timeout: Duration,
    /// Retries after HTTP 429
    pub max_retries: u32,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl ClientConfig {
    /// Defaults for `provider`.
    pub fn new(provider: Provider, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            model: provider.default_model().to_string(),
            max_tokens: 4000,
            temperature: 0.2,
            base_url: provider.default_base_url().to_string(),
            timeout: Duration::from_secs(300),
            max_retries: 2,
        }
    }

    /// Read configuration from the process environment.
    ///
    /// - `SCG_PROVIDER` selects the provider; otherwise the first provider
    ///   with a key set wins (Anthropic first)
    /// - `SCG_MODEL`, `SCG_LLM_BASE_URL`, `SCG_MAX_TOKENS` override defaults
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_vars(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let key_for = |provider: Provider| provider.key_vars().iter().find_map(|var| lookup(*var));

        let (provider, api_key) = match lookup("SCG_PROVIDER") {
            Some(name) => {
                let provider: Provider = name.parse()?;
                let key = key_for(provider).ok_or(ClientError::MissingApiKey)?;
                (provider, key)
            }
            None => [Provider::Anthropic, Provider::OpenAi]
                .into_iter()
                .find_map(|p| key_for(p).map(|k| (p, k)))
                .ok_or(ClientError::MissingApiKey)?,
        };

        let mut config = Self::new(provider, api_key);
        if let Some(model) = lookup("SCG_MODEL") {
            config.model = model;
        }
        if let Some(base_url) = lookup("SCG_LLM_BASE_URL") {
            config.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(max_tokens) = lookup("SCG_MAX_TOKENS").and_then(|s| s.parse().ok()) {
            config.max_tokens = max_tokens;
        }
        Ok(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
}

/// One conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A model that turns a system prompt plus user prompt into text.
///
/// The build loop is generic over this, so tests can script responses.
pub trait CompletionModel {
    fn complete(
        &self,
        system: &str,
        prompt: &str,
    ) -> impl Future<Output = Result<String, ClientError>> + Send;
}

/// HTTP client for a hosted model.
pub struct LlmClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl LlmClient {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a conversation with an optional system prompt, retrying on 429.
    pub async fn complete_with_system(
        &self,
        messages: &[Message],
        system: Option<&str>,
    ) -> Result<String, ClientError> {
        let mut attempt = 0u32;
        loop {
            match self.send(messages, system).await {
                Err(ClientError::RateLimited { retry_after }) if attempt < self.config.max_retries => {
                    let wait = retry_after.unwrap_or(1u64 << attempt.min(5));
                    tracing::warn!(attempt, wait_secs = wait, "rate limited, retrying");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn send(&self, messages: &[Message], system: Option<&str>) -> Result<String, ClientError> {
        let request = match self.config.provider {
            Provider::Anthropic => {
                let mut body = json!({
                    "model": self.config.model,
                    "max_tokens": self.config.max_tokens,
                    "temperature": self.config.temperature,
                    "messages": messages,
                });
                if let Some(system) = system {
                    body["system"] = Value::String(system.to_string());
                }
                self.http
                    .post(format!("{}/v1/messages", self.config.base_url))
                    .header("x-api-key", &self.config.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body)
            }
            Provider::OpenAi => {
                let mut turns = Vec::with_capacity(messages.len() + 1);
                if let Some(system) = system {
                    turns.push(json!({ "role": "system", "content": system }));
                }
                turns.extend(messages.iter().map(|m| json!(m)));
                let body = json!({
                    "model": self.config.model,
                    "max_tokens": self.config.max_tokens,
                    "temperature": self.config.temperature,
                    "messages": turns,
                });
                self.http
                    .post(format!("{}/v1/chat/completions", self.config.base_url))
                    .bearer_auth(&self.config.api_key)
                    .json(&body)
            }
        };

        tracing::debug!(provider = %self.config.provider, model = %self.config.model, "sending completion request");

        let response = request.send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            return Err(ClientError::RateLimited { retry_after });
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        let value: Value = serde_json::from_str(&body)?;
        let text = match self.config.provider {
            Provider::Anthropic => parse_anthropic(&value),
            Provider::OpenAi => parse_openai(&value),
        };

        match text {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(ClientError::EmptyResponse),
        }
    }
}

impl CompletionModel for LlmClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, ClientError> {
        self.complete_with_system(&[Message::user(prompt)], Some(system))
            .await
    }
}

/// Concatenate the `text` blocks of a Messages API response.
fn parse_anthropic(value: &Value) -> Option<String> {
    let blocks = value.get("content")?.as_array()?;
    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join(""))
    }
}

fn parse_openai(value: &Value) -> Option<String> {
    value
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

/// Error message from either API's error envelope, or the raw body.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("No API key found (set ANTHROPIC_API_KEY or OPENAI_API_KEY)")]
    MissingApiKey,

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Model returned no text")]
    EmptyResponse,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_config_from_vars_prefers_anthropic() {
        let config = ClientConfig::from_vars(vars(&[
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("OPENAI_API_KEY", "sk-oai"),
        ]))
        .unwrap();
        assert_eq!(config.provider, Provider::Anthropic);
        assert_eq!(config.api_key, "sk-ant");
        assert_eq!(config.model, "claude-3-7-sonnet-20250219");
        assert_eq!(config.max_tokens, 4000);
    }

    #[test]
    fn test_config_from_vars_openai_legacy_name() {
        let config = ClientConfig::from_vars(vars(&[
            ("OPEN_API_KEY", "sk-legacy"),
            ("SCG_MODEL", "gpt-4.1"),
            ("SCG_LLM_BASE_URL", "http://localhost:9000/"),
        ]))
        .unwrap();
        assert_eq!(config.provider, Provider::OpenAi);
        assert_eq!(config.api_key, "sk-legacy");
        assert_eq!(config.model, "gpt-4.1");
        assert_eq!(config.base_url, "http://localhost:9000");
    }

    #[test]
    fn test_config_explicit_provider_requires_its_key() {
        let result = ClientConfig::from_vars(vars(&[
            ("SCG_PROVIDER", "openai"),
            ("ANTHROPIC_API_KEY", "sk-ant"),
        ]));
        assert!(matches!(result, Err(ClientError::MissingApiKey)));

        let result = ClientConfig::from_vars(vars(&[("SCG_PROVIDER", "bard")]));
        assert!(matches!(result, Err(ClientError::UnknownProvider(_))));

        assert!(matches!(
            ClientConfig::from_vars(vars(&[])),
            Err(ClientError::MissingApiKey)
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = ClientConfig::new(Provider::Anthropic, "sk-secret");
        assert!(!format!("{:?}", config).contains("sk-secret"));
    }

    #[test]
    fn test_parse_responses() {
        let anthropic = json!({
            "content": [
                { "type": "text", "text": "```rust\n" },
                { "type": "tool_use", "id": "x" },
                { "type": "text", "text": "fn main() {}\n```" }
            ]
        });
        assert_eq!(parse_anthropic(&anthropic).unwrap(), "```rust\nfn main() {}\n```");
        assert!(parse_anthropic(&json!({ "content": [] })).is_none());

        let openai = json!({ "choices": [{ "message": { "role": "assistant", "content": "hi" } }] });
        assert_eq!(parse_openai(&openai).unwrap(), "hi");
        assert!(parse_openai(&json!({ "choices": [] })).is_none());
    }

    #[test]
    fn test_api_error_message() {
        let body = r#"{"type":"error","error":{"type":"invalid_request_error","message":"max_tokens too large"}}"#;
        assert_eq!(api_error_message(body), "max_tokens too large");
        assert_eq!(api_error_message("Bad Gateway"), "Bad Gateway");
    }

    #[tokio::test]
    async fn test_anthropic_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/messages")
            .match_header("x-api-key", "sk-test")
            .match_header("anthropic-version", ANTHROPIC_VERSION)
            .match_body(mockito::Matcher::PartialJson(json!({
                "system": "be terse",
                "messages": [{ "role": "user", "content": "write code" }]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content":[{"type":"text","text":"```rust\nfn a() {}\n```"}],"stop_reason":"end_turn"}"#)
            .create_async()
            .await;

        let config = ClientConfig::new(Provider::Anthropic, "sk-test").with_base_url(server.url());
        let client = LlmClient::new(config).unwrap();
        let text = client.complete("be terse", "write code").await.unwrap();

        assert!(text.contains("fn a()"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_openai_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-oai")
            .match_body(mockito::Matcher::PartialJson(json!({
                "messages": [
                    { "role": "system", "content": "sys" },
                    { "role": "user", "content": "prompt" }
                ]
            })))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"pub fn x() {}"}}]}"#)
            .create_async()
            .await;

        let config = ClientConfig::new(Provider::OpenAi, "sk-oai").with_base_url(server.url());
        let client = LlmClient::new(config).unwrap();
        assert_eq!(client.complete("sys", "prompt").await.unwrap(), "pub fn x() {}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(400)
            .with_body(r#"{"type":"error","error":{"type":"invalid_request_error","message":"bad model"}}"#)
            .create_async()
            .await;

        let config = ClientConfig::new(Provider::Anthropic, "k").with_base_url(server.url());
        let client = LlmClient::new(config).unwrap();
        match client.complete("s", "p").await {
            Err(ClientError::Api { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "bad model");
            }
            other => panic!("expected API error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_without_retries() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(429)
            .with_header("retry-after", "7")
            .create_async()
            .await;

        let mut config = ClientConfig::new(Provider::Anthropic, "k").with_base_url(server.url());
        config.max_retries = 0;
        let client = LlmClient::new(config).unwrap();
        assert!(matches!(
            client.complete("s", "p").await,
            Err(ClientError::RateLimited { retry_after: Some(7) })
        ));
    }

    #[tokio::test]
    async fn test_empty_response() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/messages")
            .with_status(200)
            .with_body(r#"{"content":[{"type":"text","text":"   "}]}"#)
            .create_async()
            .await;

        let config = ClientConfig::new(Provider::Anthropic, "k").with_base_url(server.url());
        let client = LlmClient::new(config).unwrap();
        assert!(matches!(client.complete("s", "p").await, Err(ClientError::EmptyResponse)));
    }
}
