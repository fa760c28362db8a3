//! OpenAI-compatible summarization and embedding client.
//!
//! Talks to `POST {base_url}/chat/completions` and
//! `POST {base_url}/embeddings`. Rate limiting, timeouts, connection
//! failures and 5xx responses are reported as transient; everything else is
//! fatal. Wrap the client in [`crate::retry::Retrying`] for backoff.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result, ServiceError, ServiceResult};
use crate::memory::{CompletionRequest, EmbeddingService, SummarizationService};

/// Longest slice of an error body kept in error messages
const ERROR_BODY_LEN_MAX: usize = 500;

/// HTTP client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// API base URL (OpenAI-compatible)
    pub base_url: String,
    /// Bearer token; requests fail with a fatal error when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Embedding model name
    pub embedding_model: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            embedding_model: "text-embedding-ada-002".to_string(),
            timeout_secs: 60,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `OPENAI_API_KEY` and `OPENAI_BASE_URL`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = url;
        }
        config
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Error::invalid_config("base_url", "must be an http(s) URL"));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(Error::invalid_config("embedding_model", "must not be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(Error::invalid_config("timeout_secs", "must be at least 1"));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

impl<'a> ChatCompletionBody<'a> {
    fn from_request(request: &'a CompletionRequest) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.content,
        });
        Self {
            model: &request.model,
            messages,
            temperature: request.decoding.temperature,
            max_tokens: request.decoding.max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingBody<'a> {
    model: &'a str,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

fn parse_chat_response(response: ChatCompletionResponse) -> ServiceResult<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ServiceError::fatal("completion response contained no message"))
}

fn parse_embedding_response(response: EmbeddingResponse) -> ServiceResult<Vec<f32>> {
    match response.data.into_iter().next() {
        Some(data) if !data.embedding.is_empty() => Ok(data.embedding),
        _ => Err(ServiceError::fatal("embedding response contained no vector")),
    }
}

/// Map a non-success HTTP status to a service error
pub fn classify_status(status: StatusCode, body: &str) -> ServiceError {
    let body: String = body.chars().take(ERROR_BODY_LEN_MAX).collect();
    let message = format!("HTTP {status}: {body}");
    match status.as_u16() {
        408 | 409 | 429 => ServiceError::transient(message),
        code if code >= 500 => ServiceError::transient(message),
        _ => ServiceError::fatal(message),
    }
}

fn transport_error(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() || e.is_connect() {
        ServiceError::transient(format!("request failed: {e}"))
    } else {
        ServiceError::fatal(format!("request failed: {e}"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Summarization and embedding service backed by an OpenAI-compatible API
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl OpenAiClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(&self, path: &str, body: &B) -> ServiceResult<T> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ServiceError::fatal("no API key configured"))?;

        let url = self.endpoint(path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            debug!(url = %url, status = status.as_u16(), "Service request rejected");
            return Err(classify_status(status, &text));
        }

        serde_json::from_str(&text)
            .map_err(|e| ServiceError::fatal(format!("malformed response from {path}: {e}")))
    }
}

#[async_trait]
impl SummarizationService for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> ServiceResult<String> {
        let body = ChatCompletionBody::from_request(request);
        let response: ChatCompletionResponse = self.post("chat/completions", &body).await?;
        parse_chat_response(response)
    }
}

#[async_trait]
impl EmbeddingService for OpenAiClient {
    async fn embed(&self, text: &str) -> ServiceResult<Vec<f32>> {
        let body = EmbeddingBody {
            model: &self.config.embedding_model,
            input: text.replace('\n', " "),
        };
        let response: EmbeddingResponse = self.post("embeddings", &body).await?;
        parse_embedding_response(response)
    }

    fn model_name(&self) -> &str {
        &self.config.embedding_model
    }
}
