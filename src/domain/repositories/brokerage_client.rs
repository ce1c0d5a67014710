//! Brokerage Client Trait
//!
//! Common interface to the brokerage that holds the user's account. The
//! decision engine only needs a fresh portfolio view and a way to submit one
//! order, which keeps mocking in tests trivial.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::entities::portfolio::{OrderSide, PortfolioSnapshot};
use crate::domain::errors::EngineError;

/// Common result type for brokerage operations
pub type BrokerageResult<T> = Result<T, BrokerageError>;

/// Errors that can occur during brokerage operations
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum BrokerageError {
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Portfolio fetch failed: {0}")]
    FetchFailed(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl From<BrokerageError> for EngineError {
    fn from(error: BrokerageError) -> Self {
        match error {
            BrokerageError::Authentication(msg) => EngineError::ApiKey(msg),
            BrokerageError::RateLimited(msg) => EngineError::RateLimit(msg),
            BrokerageError::FetchFailed(msg) | BrokerageError::Network(msg) => {
                EngineError::DataFetch(msg)
            }
            BrokerageError::OrderRejected(msg) => {
                EngineError::Other(format!("Order rejected by brokerage: {}", msg))
            }
        }
    }
}

/// Order request sent to the brokerage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    /// Dollar amount for notional orders
    pub notional: Option<f64>,
    /// Share count; used for full-position exits so no fractional dust is left
    pub qty: Option<f64>,
    /// Idempotency key the brokerage deduplicates on
    pub client_order_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub success: bool,
    pub order_id: String,
}

#[async_trait]
pub trait BrokerageClient: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch account, positions and open orders
    ///
    /// Implementations degrade a failed open-orders call to an empty list,
    /// but fail outright when account or positions cannot be read.
    async fn fetch_portfolio(&self) -> BrokerageResult<PortfolioSnapshot>;

    /// Latest trade price, `None` when the symbol has no quote
    async fn latest_price(&self, symbol: &str) -> BrokerageResult<Option<f64>>;

    async fn submit_order(&self, order: &OrderRequest) -> BrokerageResult<OrderAck>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ErrorKind;

    #[test]
    fn test_brokerage_error_taxonomy() {
        let auth: EngineError = BrokerageError::Authentication("401".into()).into();
        assert_eq!(auth.kind(), ErrorKind::ApiKey);

        let quota: EngineError = BrokerageError::RateLimited("429".into()).into();
        assert_eq!(quota.kind(), ErrorKind::RateLimit);

        let fetch: EngineError = BrokerageError::Network("reset".into()).into();
        assert_eq!(fetch.kind(), ErrorKind::DataFetch);
    }

    #[test]
    fn test_error_display() {
        let error = BrokerageError::OrderRejected("insufficient buying power".into());
        assert_eq!(error.to_string(), "Order rejected: insufficient buying power");
    }
}
