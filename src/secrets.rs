//! Collaborator credentials
//!
//! Keys arrive per request in `apiSettings` (or from stored user settings for
//! scanner-originated work). They are moved into `Zeroizing` buffers as soon
//! as a client is built so they are wiped from memory when dropped, and they
//! never show up in `Debug` output or logs.

use std::fmt;
use zeroize::Zeroizing;

use crate::domain::errors::EngineError;
use crate::domain::value_objects::api_settings::ApiSettings;

/// Error type for credential handling
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),

    #[error("Secret validation failed: {0}")]
    ValidationFailed(String),
}

impl From<SecretError> for EngineError {
    fn from(error: SecretError) -> Self {
        EngineError::ApiKey(error.to_string())
    }
}

/// Brokerage key pair for the selected trading mode
pub struct BrokerCredentials {
    pub api_key: Zeroizing<String>,
    pub secret_key: Zeroizing<String>,
    pub paper_trading: bool,
}

impl BrokerCredentials {
    pub fn from_settings(settings: &ApiSettings) -> Result<Self, SecretError> {
        let mode = if settings.alpaca_paper_trading { "paper" } else { "live" };
        let (key, secret) = settings
            .alpaca_key_pair()
            .ok_or_else(|| SecretError::NotFound(format!("alpaca {} key pair", mode)))?;
        validate_secret_strength(key, 8)?;
        validate_secret_strength(secret, 8)?;

        Ok(Self {
            api_key: Zeroizing::new(key.trim().to_string()),
            secret_key: Zeroizing::new(secret.trim().to_string()),
            paper_trading: settings.alpaca_paper_trading,
        })
    }
}

impl fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("api_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("paper_trading", &self.paper_trading)
            .finish()
    }
}

/// Completion provider credentials
pub struct AiCredentials {
    pub provider: String,
    pub api_key: Zeroizing<String>,
    pub model: Option<String>,
}

impl AiCredentials {
    pub fn from_settings(settings: &ApiSettings) -> Result<Self, SecretError> {
        let provider = settings.ai_provider.trim().to_ascii_lowercase();
        if provider.is_empty() {
            return Err(SecretError::NotFound("ai_provider".to_string()));
        }
        if settings.ai_api_key.trim().is_empty() {
            return Err(SecretError::NotFound("ai_api_key".to_string()));
        }
        validate_secret_strength(&settings.ai_api_key, 8)?;

        Ok(Self {
            provider,
            api_key: Zeroizing::new(settings.ai_api_key.trim().to_string()),
            model: settings
                .ai_model
                .as_ref()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty()),
        })
    }
}

impl fmt::Debug for AiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AiCredentials")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .finish()
    }
}

/// Validate that a secret meets minimum requirements
pub fn validate_secret_strength(secret: &str, min_length: usize) -> Result<(), SecretError> {
    let secret = secret.trim();
    if secret.len() < min_length {
        return Err(SecretError::ValidationFailed(format!(
            "Secret too short: {} characters (minimum: {})",
            secret.len(),
            min_length
        )));
    }

    let placeholders = ["your-api-key", "changeme", "placeholder", "xxxxxxxx"];
    let lower = secret.to_lowercase();
    for pattern in &placeholders {
        if lower.contains(pattern) {
            return Err(SecretError::ValidationFailed(format!(
                "Secret looks like a placeholder: {}",
                pattern
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ApiSettings {
        ApiSettings {
            ai_provider: "OpenAI".into(),
            ai_api_key: "sk-live-0123456789".into(),
            ai_model: Some(" gpt-4o ".into()),
            alpaca_paper_api_key: Some("PKTEST12345".into()),
            alpaca_paper_secret_key: Some("secret-abcdefgh".into()),
            alpaca_paper_trading: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_secret_strength() {
        assert!(validate_secret_strength("short", 8).is_err());
        assert!(validate_secret_strength("changeme-please", 8).is_err());
        assert!(validate_secret_strength("a1b2c3d4e5", 8).is_ok());
    }

    #[test]
    fn test_broker_credentials_from_settings() {
        let creds = BrokerCredentials::from_settings(&settings()).unwrap();
        assert_eq!(*creds.api_key, "PKTEST12345");
        assert!(creds.paper_trading);
    }

    #[test]
    fn test_missing_live_keys() {
        let mut s = settings();
        s.alpaca_paper_trading = false;
        let err = BrokerCredentials::from_settings(&s).unwrap_err();
        assert_eq!(err, SecretError::NotFound("alpaca live key pair".into()));
        let engine: EngineError = err.into();
        assert_eq!(engine.kind().as_str(), "api_key");
    }

    #[test]
    fn test_ai_credentials_normalized() {
        let creds = AiCredentials::from_settings(&settings()).unwrap();
        assert_eq!(creds.provider, "openai");
        assert_eq!(creds.model.as_deref(), Some("gpt-4o"));
    }

    #[test]
    fn test_debug_is_redacted() {
        let creds = BrokerCredentials::from_settings(&settings()).unwrap();
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("PKTEST12345"));
        assert!(!rendered.contains("secret-abcdefgh"));
    }
}
