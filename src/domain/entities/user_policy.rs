use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::ValidationError;
use crate::domain::value_objects::api_settings::ApiSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Conservative => "conservative",
            RiskLevel::Moderate => "moderate",
            RiskLevel::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "conservative" => Ok(RiskLevel::Conservative),
            "moderate" => Ok(RiskLevel::Moderate),
            "aggressive" => Ok(RiskLevel::Aggressive),
            other => Err(ValidationError::UnknownVariant {
                kind: "risk level",
                value: other.to_string(),
            }),
        }
    }
}

/// Trading policy of one user, immutable for the duration of a decision
///
/// All percentages are expressed in 0-100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPolicy {
    pub risk_level: RiskLevel,
    pub min_position_percent: f64,
    pub max_position_percent: f64,
    /// Absolute cap for one position; tighter of this and the percent cap wins
    pub max_position_dollars: Option<f64>,
    pub target_cash_allocation_percent: f64,
    pub profit_target_percent: f64,
    pub stop_loss_percent: f64,
    pub near_limit_threshold_percent: f64,
    pub near_position_threshold_percent: f64,
    pub default_position_size_dollars: f64,
    pub auto_execute_trades: bool,
}

impl Default for UserPolicy {
    fn default() -> Self {
        Self {
            risk_level: RiskLevel::Moderate,
            min_position_percent: 1.0,
            max_position_percent: 10.0,
            max_position_dollars: None,
            target_cash_allocation_percent: 20.0,
            profit_target_percent: 25.0,
            stop_loss_percent: 10.0,
            near_limit_threshold_percent: 20.0,
            near_position_threshold_percent: 20.0,
            default_position_size_dollars: 1000.0,
            auto_execute_trades: false,
        }
    }
}

impl UserPolicy {
    /// Overlay the per-request overrides carried by `apiSettings`
    pub fn with_overrides(mut self, settings: &ApiSettings) -> Self {
        if let Some(level) = settings.user_risk_level {
            self.risk_level = level;
        }
        if let Some(size) = settings.default_position_size_dollars {
            if size > 0.0 && size.is_finite() {
                self.default_position_size_dollars = size;
            }
        }
        if let Some(max) = settings.max_position_size {
            if max > 0.0 && max.is_finite() {
                self.max_position_dollars = Some(max);
            }
        }
        self
    }

    /// Smallest position worth holding, in dollars
    pub fn min_position_dollars(&self, portfolio_value: f64) -> f64 {
        (self.min_position_percent / 100.0 * portfolio_value).max(0.0)
    }

    /// Largest position allowed, in dollars
    pub fn max_position_dollars(&self, portfolio_value: f64) -> f64 {
        let by_percent = (self.max_position_percent / 100.0 * portfolio_value).max(0.0);
        match self.max_position_dollars {
            Some(cap) => by_percent.min(cap),
            None => by_percent,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let percents = [
            ("min_position_percent", self.min_position_percent),
            ("max_position_percent", self.max_position_percent),
            ("target_cash_allocation_percent", self.target_cash_allocation_percent),
            ("profit_target_percent", self.profit_target_percent),
            ("stop_loss_percent", self.stop_loss_percent),
            ("near_limit_threshold_percent", self.near_limit_threshold_percent),
            ("near_position_threshold_percent", self.near_position_threshold_percent),
        ];
        for (field, value) in percents {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(ValidationError::InvalidPercentage { field, value });
            }
        }
        if self.min_position_percent > self.max_position_percent {
            return Err(ValidationError::InvalidPercentage {
                field: "min_position_percent",
                value: self.min_position_percent,
            });
        }
        Ok(())
    }
}
