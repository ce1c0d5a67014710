//! Builds a fully described order from a sizing result

use crate::domain::entities::portfolio::Position;
use crate::domain::entities::trade_order::{OrderChanges, TradeOrder};
use crate::domain::services::position_sizer::percent_of;
use crate::domain::value_objects::intent::TradeAction;
use crate::domain::value_objects::position_sizing::PositionSizingResult;

#[derive(Debug, Clone, Copy, Default)]
pub struct TradeOrderBuilder;

impl TradeOrderBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Describe the position before and after the sized trade
    ///
    /// Total portfolio value is treated as constant across the trade (cash
    /// converts into shares or back), so allocations are comparable.
    pub fn build(
        &self,
        ticker: &str,
        sizing: &PositionSizingResult,
        position: Option<&Position>,
        price: f64,
        total_value: f64,
    ) -> TradeOrder {
        let before_shares = position.map(|p| p.qty.max(0.0)).unwrap_or(0.0);
        let before_value = before_shares * price;

        let after_shares = match sizing.action {
            TradeAction::Buy => before_shares + sizing.shares,
            TradeAction::Sell => (before_shares - sizing.shares).max(0.0),
            TradeAction::Hold => before_shares,
        };
        let after_value = after_shares * price;

        let before_allocation = percent_of(before_value, total_value);
        let after_allocation = percent_of(after_value, total_value);

        let (dollar_amount, shares) = if sizing.action == TradeAction::Hold {
            (0.0, 0.0)
        } else {
            (sizing.dollar_amount, sizing.shares)
        };

        TradeOrder {
            ticker: ticker.to_ascii_uppercase(),
            action: sizing.action,
            intent: sizing.intent,
            dollar_amount,
            shares,
            price,
            before_shares,
            before_value,
            before_allocation,
            after_shares,
            after_value,
            after_allocation,
            changes: OrderChanges {
                shares: after_shares - before_shares,
                value: after_value - before_value,
                allocation: after_allocation - before_allocation,
            },
            reasoning: format!(
                "{} {} ({:.2}% of portfolio): {}",
                sizing.intent, ticker, sizing.percent_of_portfolio, sizing.reasoning
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::intent::Intent;

    fn position(qty: f64) -> Position {
        Position {
            symbol: "AAPL".into(),
            qty,
            avg_entry_price: 90.0,
            current_price: 100.0,
            market_value: qty * 100.0,
            unrealized_pl: qty * 10.0,
            unrealized_pl_percent: 11.11,
        }
    }

    fn sizing(action: TradeAction, intent: Intent, amount: f64, shares: f64) -> PositionSizingResult {
        PositionSizingResult {
            action,
            intent,
            dollar_amount: amount,
            shares,
            percent_of_portfolio: amount * 100.0 / 50_000.0,
            reasoning: "test".into(),
        }
    }

    #[test]
    fn test_buy_new_position() {
        let order = TradeOrderBuilder::new().build(
            "AAPL",
            &sizing(TradeAction::Buy, Intent::Build, 3000.0, 30.0),
            None,
            100.0,
            50_000.0,
        );
        assert_eq!(order.before_shares, 0.0);
        assert_eq!(order.after_shares, 30.0);
        assert_eq!(order.after_value, 3000.0);
        assert_eq!(order.after_allocation, 6.0);
        assert_eq!(order.changes.shares, 30.0);
        assert_eq!(order.changes.value, 3000.0);
        assert!(order.reasoning.contains("BUILD AAPL (6.00% of portfolio)"));
    }

    #[test]
    fn test_changes_equal_after_minus_before() {
        let held = position(40.0);
        let order = TradeOrderBuilder::new().build(
            "AAPL",
            &sizing(TradeAction::Sell, Intent::Trim, 1000.0, 10.0),
            Some(&held),
            100.0,
            50_000.0,
        );
        assert_eq!(order.after_shares, 30.0);
        assert_eq!(order.changes.shares, order.after_shares - order.before_shares);
        assert_eq!(order.changes.value, order.after_value - order.before_value);
        assert_eq!(
            order.changes.allocation,
            order.after_allocation - order.before_allocation
        );
    }

    #[test]
    fn test_full_exit_leaves_zero_shares() {
        let held = position(4.0);
        let order = TradeOrderBuilder::new().build(
            "AAPL",
            &sizing(TradeAction::Sell, Intent::Exit, 400.0, 4.0),
            Some(&held),
            100.0,
            50_000.0,
        );
        assert_eq!(order.after_shares, 0.0);
        assert_eq!(order.after_allocation, 0.0);
    }

    #[test]
    fn test_hold_keeps_position() {
        let held = position(10.0);
        let order = TradeOrderBuilder::new().build(
            "AAPL",
            &PositionSizingResult::hold("nothing to do"),
            Some(&held),
            100.0,
            50_000.0,
        );
        assert!(order.is_hold());
        assert_eq!(order.after_shares, order.before_shares);
        assert_eq!(order.changes, OrderChanges::default());
        assert_eq!(order.to_string(), "HOLD AAPL");
    }
}
