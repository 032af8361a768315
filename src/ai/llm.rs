use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{DEFAULT_GROQ_ENDPOINT, FALLBACK_GROQ_API_KEY};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Text completion capability used by the analysis engine.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, system: &str, messages: &[Message]) -> Result<String, LlmError>;
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {body}")]
    Api { status: reqwest::StatusCode, body: String },
    #[error("No API credential configured; set GROQ_API_KEY")]
    MissingCredential,
    #[error("Completion response contained no text")]
    EmptyResponse,
}

impl LlmError {
    /// Connection failures and 5xx responses are worth one more attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(err) => err.is_connect(),
            LlmError::Api { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

/// Groq's OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone)]
pub struct GroqProvider {
    pub client: reqwest::Client,
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub max_tokens: u32,
}

impl GroqProvider {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            endpoint: DEFAULT_GROQ_ENDPOINT.to_string(),
            max_tokens: 1024,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn send_once(&self, request: &ChatCompletionRequest<'_>) -> Result<String, LlmError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let reply: ChatCompletionResponse = response.json().await?;
        extract_text(reply)
    }
}

#[async_trait]
impl Completion for GroqProvider {
    async fn complete(&self, system: &str, messages: &[Message]) -> Result<String, LlmError> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::MissingCredential);
        }
        if self.api_key == FALLBACK_GROQ_API_KEY {
            warn!("calling upstream with the placeholder API key");
        }

        let mut all = Vec::with_capacity(messages.len() + 1);
        all.push(Message::system(system));
        all.extend_from_slice(messages);

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: &all,
            max_tokens: self.max_tokens,
        };

        debug!(model = %self.model, messages = all.len(), "llm call");
        match self.send_once(&request).await {
            Err(err) if err.is_retryable() => {
                warn!(error = %err, "llm call failed, retrying once");
                self.send_once(&request).await
            }
            other => other,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

fn extract_text(reply: ChatCompletionResponse) -> Result<String, LlmError> {
    reply
        .choices
        .into_iter()
        .find_map(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or(LlmError::EmptyResponse)
}
