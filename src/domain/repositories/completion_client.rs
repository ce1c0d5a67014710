use async_trait::async_trait;

use crate::domain::errors::EngineError;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum CompletionError {
    #[error("Invalid API key: {0}")]
    InvalidApiKey(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Empty completion")]
    Empty,

    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),
}

impl From<CompletionError> for EngineError {
    fn from(error: CompletionError) -> Self {
        match error {
            CompletionError::InvalidApiKey(msg) => EngineError::ApiKey(msg),
            CompletionError::RateLimited(msg) => EngineError::RateLimit(msg),
            CompletionError::UnsupportedProvider(p) => {
                EngineError::Validation(format!("Unsupported AI provider: {}", p))
            }
            other => EngineError::Ai(other.to_string()),
        }
    }
}

/// A single completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub prompt: String,
    pub max_tokens: u32,
}

/// Black-box text completion
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}
