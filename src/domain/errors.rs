use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::entities::analysis::Phase;

/// Error category recorded on a failed analysis
///
/// The string forms are the categories surfaced to operators and used by
/// the retry tooling, so they must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    ApiKey,
    AiError,
    DataFetch,
    Database,
    Timeout,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ApiKey => "api_key",
            ErrorKind::AiError => "ai_error",
            ErrorKind::DataFetch => "data_fetch",
            ErrorKind::Database => "database",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecoverable failures of the decision workflow
///
/// Recoverable conditions (insufficient cash, nothing to trim, conflicting
/// pending orders) never show up here: they are folded into a HOLD decision.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Invalid or missing credential: {0}")]
    ApiKey(String),

    #[error("AI completion failed: {0}")]
    Ai(String),

    #[error("Data fetch failed: {0}")]
    DataFetch(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Phase {phase} timed out after {attempts} attempt(s)")]
    Timeout { phase: Phase, attempts: u32 },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::RateLimit(_) => ErrorKind::RateLimit,
            EngineError::ApiKey(_) => ErrorKind::ApiKey,
            EngineError::Ai(_) => ErrorKind::AiError,
            EngineError::DataFetch(_) => ErrorKind::DataFetch,
            EngineError::Database(_) => ErrorKind::Database,
            EngineError::Timeout { .. } => ErrorKind::Timeout,
            EngineError::Validation(_) | EngineError::Other(_) => ErrorKind::Other,
        }
    }

    /// Check if another attempt of the same phase might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::RateLimit(_)
            | EngineError::Ai(_)
            | EngineError::DataFetch(_)
            | EngineError::Database(_) => true,

            EngineError::ApiKey(_)
            | EngineError::Timeout { .. }
            | EngineError::Validation(_)
            | EngineError::Other(_) => false,
        }
    }
}

/// Validation failures for domain values
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid ticker: {0}")]
    InvalidTicker(String),

    #[error("Invalid percentage for {field}: {value}")]
    InvalidPercentage { field: &'static str, value: f64 },

    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

impl From<ValidationError> for EngineError {
    fn from(error: ValidationError) -> Self {
        EngineError::Validation(error.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::Database(format!("Malformed stored payload: {}", error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings() {
        assert_eq!(EngineError::RateLimit("x".into()).kind().as_str(), "rate_limit");
        assert_eq!(EngineError::ApiKey("x".into()).kind().as_str(), "api_key");
        assert_eq!(EngineError::Ai("x".into()).kind().as_str(), "ai_error");
        assert_eq!(EngineError::DataFetch("x".into()).kind().as_str(), "data_fetch");
        assert_eq!(EngineError::Database("x".into()).kind().as_str(), "database");
        assert_eq!(
            EngineError::Timeout {
                phase: Phase::Portfolio,
                attempts: 4
            }
            .kind()
            .as_str(),
            "timeout"
        );
        assert_eq!(EngineError::Validation("x".into()).kind(), ErrorKind::Other);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(EngineError::RateLimit("quota".into()).is_retryable());
        assert!(EngineError::DataFetch("502".into()).is_retryable());
        assert!(!EngineError::ApiKey("401".into()).is_retryable());
        assert!(!EngineError::Validation("ticker".into()).is_retryable());
    }

    #[test]
    fn test_timeout_message() {
        let error = EngineError::Timeout {
            phase: Phase::Risk,
            attempts: 4,
        };
        assert_eq!(error.to_string(), "Phase risk timed out after 4 attempt(s)");
    }

    #[test]
    fn test_validation_error_converts() {
        let error: EngineError = ValidationError::MissingField("ticker").into();
        assert_eq!(error, EngineError::Validation("Missing required field: ticker".into()));
    }
}
