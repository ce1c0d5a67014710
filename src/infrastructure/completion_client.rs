//! HTTP completion client
//!
//! One request/response round trip per completion against an OpenAI-style
//! chat endpoint (OpenAI, OpenRouter) or the Anthropic messages endpoint.

use crate::domain::repositories::completion_client::{
    CompletionClient, CompletionError, CompletionRequest,
};
use crate::secrets::AiCredentials;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionProvider {
    OpenAi,
    OpenRouter,
    Anthropic,
}

impl CompletionProvider {
    pub fn parse(name: &str) -> Result<Self, CompletionError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "openrouter" => Ok(Self::OpenRouter),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(CompletionError::UnsupportedProvider(other.to_string())),
        }
    }

    fn base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => OPENAI_BASE_URL,
            Self::OpenRouter => OPENROUTER_BASE_URL,
            Self::Anthropic => ANTHROPIC_BASE_URL,
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::OpenRouter => "openai/gpt-4o-mini",
            Self::Anthropic => "claude-3-5-haiku-latest",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    system: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

fn non_empty(text: Option<String>) -> Result<String, CompletionError> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t),
        _ => Err(CompletionError::Empty),
    }
}

fn chat_text(response: ChatResponse) -> Result<String, CompletionError> {
    non_empty(response.choices.into_iter().next().and_then(|c| c.message.content))
}

fn messages_text(response: MessagesResponse) -> Result<String, CompletionError> {
    let text: String = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("\n");
    non_empty(Some(text))
}

/// Completion client speaking the provider's native HTTP API
pub struct HttpCompletionClient {
    client: Client,
    provider: CompletionProvider,
    credentials: AiCredentials,
    model: String,
    base_url: String,
}

impl HttpCompletionClient {
    pub fn new(credentials: AiCredentials) -> Result<Self, CompletionError> {
        let provider = CompletionProvider::parse(&credentials.provider)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .map_err(|e| CompletionError::Provider(format!("Failed to build HTTP client: {}", e)))?;
        let model = credentials
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| provider.default_model().to_string());

        Ok(Self {
            client,
            provider,
            credentials,
            model,
            base_url: provider.base_url().to_string(),
        })
    }

    pub fn provider(&self) -> CompletionProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, CompletionError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CompletionError::Provider(format!("Request timed out: {}", e))
            } else {
                CompletionError::Provider(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("{} - {}", status, body);
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CompletionError::InvalidApiKey(message),
            StatusCode::TOO_MANY_REQUESTS => CompletionError::RateLimited(message),
            _ => CompletionError::Provider(message),
        })
    }

    async fn complete_chat(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: request.system_prompt.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: request.prompt.clone(),
                },
            ],
            max_tokens: request.max_tokens,
            temperature: 0.2,
        };

        let response = self
            .send(
                self.client
                    .post(format!("{}/chat/completions", self.base_url))
                    .bearer_auth(self.credentials.api_key.as_str())
                    .json(&body),
            )
            .await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Provider(format!("Invalid response body: {}", e)))?;
        chat_text(parsed)
    }

    async fn complete_messages(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let body = MessagesRequest {
            model: self.model.clone(),
            system: request.system_prompt.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            max_tokens: request.max_tokens,
        };

        let response = self
            .send(
                self.client
                    .post(format!("{}/messages", self.base_url))
                    .header("x-api-key", self.credentials.api_key.as_str())
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .json(&body),
            )
            .await?;

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Provider(format!("Invalid response body: {}", e)))?;
        messages_text(parsed)
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        debug!(
            "Requesting completion: provider={:?} model={} max_tokens={}",
            self.provider, self.model, request.max_tokens
        );
        match self.provider {
            CompletionProvider::OpenAi | CompletionProvider::OpenRouter => {
                self.complete_chat(request).await
            }
            CompletionProvider::Anthropic => self.complete_messages(request).await,
        }
    }
}
