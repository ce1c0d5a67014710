//! Collaborator Client Factory
//!
//! Builds the brokerage and completion clients for one request out of the
//! caller's `apiSettings`. Clients are created per analysis phase and dropped
//! when the phase ends, so no connection outlives a phase.

use crate::domain::errors::EngineError;
use crate::domain::repositories::brokerage_client::BrokerageClient;
use crate::domain::repositories::completion_client::CompletionClient;
use crate::domain::value_objects::api_settings::ApiSettings;
use crate::infrastructure::alpaca_client::AlpacaClient;
use crate::infrastructure::completion_client::HttpCompletionClient;
use crate::secrets::{AiCredentials, BrokerCredentials};
use std::sync::Arc;
use tracing::debug;

/// Source of collaborator clients
pub trait ClientFactory: Send + Sync {
    fn brokerage(&self, settings: &ApiSettings) -> Result<Arc<dyn BrokerageClient>, EngineError>;

    fn completion(&self, settings: &ApiSettings) -> Result<Arc<dyn CompletionClient>, EngineError>;
}

/// Factory for the real HTTP collaborators
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn brokerage(&self, settings: &ApiSettings) -> Result<Arc<dyn BrokerageClient>, EngineError> {
        let credentials = BrokerCredentials::from_settings(settings)?;
        debug!("Creating Alpaca client ({:?})", credentials);
        let client = AlpacaClient::new(credentials)?;
        Ok(Arc::new(client))
    }

    fn completion(&self, settings: &ApiSettings) -> Result<Arc<dyn CompletionClient>, EngineError> {
        let credentials = AiCredentials::from_settings(settings)?;
        debug!("Creating completion client ({:?})", credentials);
        let client = HttpCompletionClient::new(credentials)?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ErrorKind;

    #[test]
    fn test_missing_brokerage_keys_is_api_key_error() {
        let settings = ApiSettings {
            ai_provider: "openai".into(),
            ai_api_key: "sk-0123456789abcdef".into(),
            ..Default::default()
        };
        let err = HttpClientFactory.brokerage(&settings).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ApiKey);
    }

    #[test]
    fn test_builds_clients_from_settings() {
        let settings = ApiSettings {
            ai_provider: "anthropic".into(),
            ai_api_key: "sk-ant-0123456789abcdef".into(),
            alpaca_paper_api_key: Some("PKABCDEFGH123456".into()),
            alpaca_paper_secret_key: Some("SKABCDEFGH123456".into()),
            alpaca_paper_trading: true,
            ..Default::default()
        };
        assert!(HttpClientFactory.brokerage(&settings).is_ok());
        assert!(HttpClientFactory.completion(&settings).is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let settings = ApiSettings {
            ai_provider: "fax".into(),
            ai_api_key: "sk-0123456789abcdef".into(),
            ..Default::default()
        };
        assert!(HttpClientFactory.completion(&settings).is_err());
    }
}
