//! Brokerage state as seen at decision time

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Cash left after reserving capital for open buy orders
    pub cash: f64,
    /// Cash as reported by the brokerage
    pub original_cash: f64,
    pub portfolio_value: f64,
    pub buying_power: f64,
    pub reserved_capital: f64,
}

impl Account {
    /// Build an account, reserving capital for open buy orders
    pub fn with_reservations(
        original_cash: f64,
        portfolio_value: f64,
        buying_power: f64,
        open_orders: &[OpenOrder],
    ) -> Self {
        let reserved_capital: f64 = open_orders
            .iter()
            .filter(|o| o.side == OrderSide::Buy)
            .map(OpenOrder::reserved_amount)
            .sum();
        Self {
            cash: (original_cash - reserved_capital).max(0.0),
            original_cash,
            portfolio_value,
            buying_power,
            reserved_capital,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub unrealized_pl: f64,
    pub unrealized_pl_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Option<f64>,
    pub notional: Option<f64>,
    pub limit_price: Option<f64>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl OpenOrder {
    /// Capital this order will consume if filled
    pub fn reserved_amount(&self) -> f64 {
        if let Some(notional) = self.notional {
            return notional.max(0.0);
        }
        match (self.qty, self.limit_price) {
            (Some(qty), Some(price)) => (qty * price).max(0.0),
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub account: Account,
    pub positions: Vec<Position>,
    pub open_orders: Vec<OpenOrder>,
    pub fetched_at: DateTime<Utc>,
}

impl PortfolioSnapshot {
    /// Held position for `symbol`; zero-share rows are treated as absent
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| p.symbol.eq_ignore_ascii_case(symbol) && p.qty > 0.0)
    }

    pub fn open_orders_for<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a OpenOrder> + 'a {
        self.open_orders
            .iter()
            .filter(move |o| o.symbol.eq_ignore_ascii_case(symbol))
    }
}

/// Where a pending order is tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingSource {
    Brokerage,
    Internal,
}

/// An order for a ticker that has not been filled yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub source: PendingSource,
}

impl PendingOrder {
    /// Merge brokerage open orders and internally tracked pending actions for `symbol`
    pub fn collect(snapshot: &PortfolioSnapshot, internal: &[PendingOrder], symbol: &str) -> Vec<PendingOrder> {
        snapshot
            .open_orders_for(symbol)
            .map(|o| PendingOrder {
                symbol: o.symbol.clone(),
                side: o.side,
                source: PendingSource::Brokerage,
            })
            .chain(
                internal
                    .iter()
                    .filter(|p| p.symbol.eq_ignore_ascii_case(symbol))
                    .cloned(),
            )
            .collect()
    }
}
