//! Per-request collaborator settings
//!
//! Field names follow the inbound trigger contract exactly. Secrets are
//! only held here long enough to build `secrets::*Credentials`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::entities::user_policy::RiskLevel;

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ApiSettings {
    pub ai_provider: String,
    pub ai_api_key: String,
    #[serde(default)]
    pub ai_model: Option<String>,

    #[serde(default)]
    pub alpaca_paper_api_key: Option<String>,
    #[serde(default)]
    pub alpaca_paper_secret_key: Option<String>,
    #[serde(default)]
    pub alpaca_live_api_key: Option<String>,
    #[serde(default)]
    pub alpaca_live_secret_key: Option<String>,
    /// Required: choosing live or paper keys is never left to a default
    pub alpaca_paper_trading: bool,

    #[serde(default)]
    pub user_risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub default_position_size_dollars: Option<f64>,
    /// Dollar cap for a single position
    #[serde(default)]
    pub max_position_size: Option<f64>,
    #[serde(default)]
    pub portfolio_manager_max_tokens: Option<u32>,
}

impl ApiSettings {
    /// Key pair for the selected trading mode, if both halves are present
    pub fn alpaca_key_pair(&self) -> Option<(&str, &str)> {
        let (key, secret) = if self.alpaca_paper_trading {
            (&self.alpaca_paper_api_key, &self.alpaca_paper_secret_key)
        } else {
            (&self.alpaca_live_api_key, &self.alpaca_live_secret_key)
        };
        match (key.as_deref(), secret.as_deref()) {
            (Some(k), Some(s)) if !k.trim().is_empty() && !s.trim().is_empty() => Some((k, s)),
            _ => None,
        }
    }

    pub fn has_brokerage_credentials(&self) -> bool {
        self.alpaca_key_pair().is_some()
    }
}

fn redact(value: &Option<String>) -> &'static str {
    match value {
        Some(v) if !v.is_empty() => "<redacted>",
        _ => "<unset>",
    }
}

impl fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSettings")
            .field("ai_provider", &self.ai_provider)
            .field("ai_api_key", &redact(&Some(self.ai_api_key.clone())))
            .field("ai_model", &self.ai_model)
            .field("alpaca_paper_api_key", &redact(&self.alpaca_paper_api_key))
            .field("alpaca_paper_secret_key", &redact(&self.alpaca_paper_secret_key))
            .field("alpaca_live_api_key", &redact(&self.alpaca_live_api_key))
            .field("alpaca_live_secret_key", &redact(&self.alpaca_live_secret_key))
            .field("alpaca_paper_trading", &self.alpaca_paper_trading)
            .field("user_risk_level", &self.user_risk_level)
            .field("default_position_size_dollars", &self.default_position_size_dollars)
            .field("max_position_size", &self.max_position_size)
            .field("portfolio_manager_max_tokens", &self.portfolio_manager_max_tokens)
            .finish()
    }
}
