use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::ValidationError;
use crate::domain::value_objects::decision_line::DecisionLine;
use crate::domain::value_objects::intent::{Intent, TradeAction};

/// Position deltas produced by an order
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OrderChanges {
    pub shares: f64,
    pub value: f64,
    pub allocation: f64,
}

/// A fully described, submittable order
///
/// Allocations are percentages of total portfolio value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOrder {
    pub ticker: String,
    pub action: TradeAction,
    pub intent: Intent,
    pub dollar_amount: f64,
    pub shares: f64,
    pub price: f64,
    pub before_shares: f64,
    pub before_value: f64,
    pub before_allocation: f64,
    pub after_shares: f64,
    pub after_value: f64,
    pub after_allocation: f64,
    pub changes: OrderChanges,
    pub reasoning: String,
}

impl TradeOrder {
    pub fn is_hold(&self) -> bool {
        self.action == TradeAction::Hold
    }

    /// The single-line wire form of this order
    pub fn decision_line(&self) -> DecisionLine {
        DecisionLine::trade(self.action, self.dollar_amount, &self.ticker)
    }
}

impl fmt::Display for TradeOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.decision_line())
    }
}

/// Lifecycle of a persisted order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Persisted, not yet sent to the brokerage
    Pending,
    /// Claimed by one execution attempt
    Submitting,
    Submitted,
    Failed,
    /// HOLD decisions and orders the user chose not to auto-execute
    Skipped,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Submitting => "submitting",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Failed => "failed",
            OrderStatus::Skipped => "skipped",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "submitting" => Ok(OrderStatus::Submitting),
            "submitted" => Ok(OrderStatus::Submitted),
            "failed" => Ok(OrderStatus::Failed),
            "skipped" => Ok(OrderStatus::Skipped),
            other => Err(ValidationError::UnknownVariant {
                kind: "order status",
                value: other.to_string(),
            }),
        }
    }
}

/// An order as recorded in the write-once order table
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTradeOrder {
    pub analysis_id: String,
    pub user_id: String,
    pub order: TradeOrder,
    pub status: OrderStatus,
    pub broker_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of a write-once insert
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Inserted(StoredTradeOrder),
    /// Another attempt got there first; this is the order it wrote
    AlreadyExists(StoredTradeOrder),
    /// The analysis already ended in `error` or `canceled`; nothing was written
    Closed,
}

impl InsertOutcome {
    pub fn into_stored(self) -> Option<StoredTradeOrder> {
        match self {
            InsertOutcome::Inserted(stored) | InsertOutcome::AlreadyExists(stored) => Some(stored),
            InsertOutcome::Closed => None,
        }
    }
}
