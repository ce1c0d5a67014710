//! Trade intent and direction

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::ValidationError;

/// Direction of a trade order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "BUY",
            TradeAction::Sell => "SELL",
            TradeAction::Hold => "HOLD",
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeAction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(TradeAction::Buy),
            "SELL" => Ok(TradeAction::Sell),
            "HOLD" => Ok(TradeAction::Hold),
            other => Err(ValidationError::UnknownVariant {
                kind: "trade action",
                value: other.to_string(),
            }),
        }
    }
}

/// Normalized directional decision, independent of sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    /// Open a new position
    Build,
    /// Increase an existing position
    Add,
    /// Reduce an existing position
    Trim,
    /// Close an existing position
    Exit,
    Hold,
}

impl Intent {
    /// Trade direction implied by this intent
    pub fn direction(&self) -> TradeAction {
        match self {
            Intent::Build | Intent::Add => TradeAction::Buy,
            Intent::Trim | Intent::Exit => TradeAction::Sell,
            Intent::Hold => TradeAction::Hold,
        }
    }

    /// TRIM and EXIT only make sense against shares already held
    pub fn requires_position(&self) -> bool {
        matches!(self, Intent::Trim | Intent::Exit)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Build => "BUILD",
            Intent::Add => "ADD",
            Intent::Trim => "TRIM",
            Intent::Exit => "EXIT",
            Intent::Hold => "HOLD",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_direction() {
        assert_eq!(Intent::Build.direction(), TradeAction::Buy);
        assert_eq!(Intent::Add.direction(), TradeAction::Buy);
        assert_eq!(Intent::Trim.direction(), TradeAction::Sell);
        assert_eq!(Intent::Exit.direction(), TradeAction::Sell);
        assert_eq!(Intent::Hold.direction(), TradeAction::Hold);
    }

    #[test]
    fn test_trade_action_parse() {
        assert_eq!("buy".parse::<TradeAction>().unwrap(), TradeAction::Buy);
        assert_eq!(" SELL ".parse::<TradeAction>().unwrap(), TradeAction::Sell);
        assert!("short".parse::<TradeAction>().is_err());
    }

    #[test]
    fn test_intent_serializes_uppercase() {
        let json = serde_json::to_string(&Intent::Trim).unwrap();
        assert_eq!(json, "\"TRIM\"");
    }
}
