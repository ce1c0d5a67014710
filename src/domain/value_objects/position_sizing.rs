//! Position sizing request and result value objects

use crate::domain::entities::user_policy::RiskLevel;
use crate::domain::errors::ValidationError;
use crate::domain::value_objects::intent::{Intent, TradeAction};

/// Shares currently held for the ticker being sized
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeldPosition {
    pub shares: f64,
    pub market_value: f64,
}

/// Request for position sizing calculation
///
/// All amounts are in dollars.
#[derive(Debug, Clone)]
pub struct PositionSizingRequest {
    pub ticker: String,
    pub intent: Intent,
    /// Risk-manager confidence, 0-100
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub default_position_size: f64,
    /// Smallest viable position
    pub min_position_size: f64,
    /// Largest allowed position
    pub max_position_size: f64,
    /// Cash a BUY may spend without breaching the cash floor
    pub deployable_cash: f64,
    pub available_cash: f64,
    pub current_price: f64,
    pub portfolio_value: f64,
    pub current_position: Option<HeldPosition>,
    /// Amount proposed upstream; replaces the confidence-tier base amount
    pub requested_amount: Option<f64>,
    /// Round BUY amounts to multiples of this increment
    pub round_increment: Option<f64>,
}

impl PositionSizingRequest {
    /// Validate this request
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ticker.trim().is_empty() {
            return Err(ValidationError::InvalidTicker("ticker cannot be empty".into()));
        }
        if !self.current_price.is_finite() || self.current_price <= 0.0 {
            return Err(ValidationError::InvalidPrice(format!(
                "{} has no valid price ({})",
                self.ticker, self.current_price
            )));
        }
        if !self.confidence.is_finite() || !(0.0..=100.0).contains(&self.confidence) {
            return Err(ValidationError::InvalidPercentage {
                field: "confidence",
                value: self.confidence,
            });
        }
        if self.min_position_size < 0.0 || self.max_position_size < 0.0 {
            return Err(ValidationError::InvalidPercentage {
                field: "position bounds",
                value: self.min_position_size.min(self.max_position_size),
            });
        }
        Ok(())
    }

    pub fn held_value(&self) -> f64 {
        self.current_position
            .map(|p| p.shares * self.current_price)
            .unwrap_or(0.0)
    }
}

/// Result of position sizing calculation
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSizingResult {
    pub action: TradeAction,
    /// Intent after sizing; HOLD when sizing refused the trade
    pub intent: Intent,
    pub dollar_amount: f64,
    pub shares: f64,
    pub percent_of_portfolio: f64,
    /// Reason for this sizing decision
    pub reasoning: String,
}

impl PositionSizingResult {
    pub fn hold(reasoning: impl Into<String>) -> Self {
        Self {
            action: TradeAction::Hold,
            intent: Intent::Hold,
            dollar_amount: 0.0,
            shares: 0.0,
            percent_of_portfolio: 0.0,
            reasoning: reasoning.into(),
        }
    }

    pub fn is_hold(&self) -> bool {
        self.action == TradeAction::Hold
    }
}
