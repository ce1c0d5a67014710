//! Deterministic portfolio decision engine
//!
//! Combines the risk verdict, a fresh portfolio snapshot and the user's
//! policy into one bounded, fully described order. The engine is pure: no
//! I/O, no clock, same inputs give the same order.
//!
//! Pipeline:
//! 1. Keyword mapping of the verdict, with stop-loss/profit-target overrides
//!    applied to HOLD verdicts on held positions
//! 2. Intent override rules (nothing to sell, conflicting pending orders)
//! 3. Cash floor
//! 4. Confidence-tiered sizing within position bounds
//! 5. Order construction
//!
//! A proposal can then be reconciled with the portfolio manager's decision
//! line; the reconciled order never leaves the engine's bounds.

use crate::domain::entities::portfolio::{PendingOrder, PortfolioSnapshot, Position};
use crate::domain::entities::trade_order::TradeOrder;
use crate::domain::entities::user_policy::UserPolicy;
use crate::domain::errors::EngineError;
use crate::domain::services::cash_constraint::CashConstraint;
use crate::domain::services::intent_normalizer::IntentNormalizer;
use crate::domain::services::position_sizer::PositionSizer;
use crate::domain::services::trade_order_builder::TradeOrderBuilder;
use crate::domain::value_objects::decision_line::{DecisionLine, ParseError};
use crate::domain::value_objects::intent::{Intent, TradeAction};
use crate::domain::value_objects::position_sizing::{
    HeldPosition, PositionSizingRequest, PositionSizingResult,
};

/// Everything one decision is computed from
#[derive(Debug, Clone, Copy)]
pub struct DecisionInputs<'a> {
    pub ticker: &'a str,
    /// Free-form risk-manager verdict
    pub decision: &'a str,
    /// 0-100
    pub confidence: f64,
    pub snapshot: &'a PortfolioSnapshot,
    /// Internally tracked orders not yet at the brokerage
    pub internal_pending: &'a [PendingOrder],
    pub policy: &'a UserPolicy,
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineDecision {
    /// Intent the verdict mapped to before any override
    pub base_intent: Intent,
    pub sizing: PositionSizingResult,
    pub order: TradeOrder,
    pub cash: CashConstraint,
    /// Every override and demotion applied along the way
    pub warnings: Vec<String>,
}

impl EngineDecision {
    pub fn intent(&self) -> Intent {
        self.order.intent
    }

    pub fn rationale(&self) -> String {
        if self.warnings.is_empty() {
            self.order.reasoning.clone()
        } else {
            format!("{} [{}]", self.order.reasoning, self.warnings.join("; "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionEngineConfig {
    /// Round BUY amounts to multiples of the default position size
    pub round_to_default_increment: bool,
}

impl Default for DecisionEngineConfig {
    fn default() -> Self {
        Self {
            round_to_default_increment: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    config: DecisionEngineConfig,
    normalizer: IntentNormalizer,
    sizer: PositionSizer,
    builder: TradeOrderBuilder,
}

impl DecisionEngine {
    pub fn new(config: DecisionEngineConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Compute the engine's own proposal
    pub fn decide(&self, inputs: &DecisionInputs<'_>) -> Result<EngineDecision, EngineError> {
        self.decide_with(inputs, None)
    }

    /// Reconcile a proposal with the portfolio manager's reply
    ///
    /// - unparsable reply or HOLD: HOLD
    /// - opposite direction: HOLD
    /// - same direction: the reply's amount, re-sized within the same bounds
    pub fn reconcile(
        &self,
        inputs: &DecisionInputs<'_>,
        proposal: &EngineDecision,
        reply: Result<DecisionLine, ParseError>,
    ) -> Result<EngineDecision, EngineError> {
        let line = match reply {
            Ok(line) => line,
            Err(error) => {
                return Ok(self.demote(
                    inputs,
                    proposal,
                    format!("Portfolio manager reply unusable ({}), holding", error),
                ));
            }
        };

        if line.action == TradeAction::Hold {
            if proposal.order.is_hold() {
                return Ok(proposal.clone());
            }
            return Ok(self.demote(
                inputs,
                proposal,
                format!(
                    "Portfolio manager declined '{}', holding",
                    proposal.order.decision_line()
                ),
            ));
        }

        if line.action != proposal.order.action {
            return Ok(self.demote(
                inputs,
                proposal,
                format!(
                    "Portfolio manager answered '{}' against proposal '{}', holding",
                    line,
                    proposal.order.decision_line()
                ),
            ));
        }

        // Full exits sell every share whatever amount was quoted
        if proposal.intent() == Intent::Exit {
            return Ok(proposal.clone());
        }

        let mut decided = self.decide_with(inputs, line.amount)?;
        if decided.order.decision_line() != line {
            decided.warnings.push(format!(
                "Portfolio manager amount '{}' adjusted to '{}'",
                line,
                decided.order.decision_line()
            ));
        }
        Ok(decided)
    }

    fn decide_with(
        &self,
        inputs: &DecisionInputs<'_>,
        requested_amount: Option<f64>,
    ) -> Result<EngineDecision, EngineError> {
        if !inputs.price.is_finite() || inputs.price <= 0.0 {
            return Err(EngineError::DataFetch(format!(
                "No valid price for {}",
                inputs.ticker
            )));
        }
        inputs.policy.validate()?;

        let snapshot = inputs.snapshot;
        let position = snapshot.position(inputs.ticker);
        let has_position = position.is_some();
        let pending = PendingOrder::collect(snapshot, inputs.internal_pending, inputs.ticker);

        let mut warnings = Vec::new();
        let (mut base, unrecognized) = self.normalizer.base_intent(inputs.decision, has_position);
        warnings.extend(unrecognized);

        if base == Intent::Hold {
            if let Some((intent, warning)) = position.and_then(|p| limit_override(p, inputs.policy)) {
                base = intent;
                warnings.push(warning);
            }
        }

        let normalized =
            self.normalizer
                .apply_overrides(inputs.ticker, base, has_position, &pending);
        warnings.extend(normalized.warnings.iter().cloned());

        let account = &snapshot.account;
        let portfolio_value = account.portfolio_value;
        let cash = CashConstraint::compute(
            account.cash,
            portfolio_value,
            inputs.policy.target_cash_allocation_percent,
        );

        let round_increment = (self.config.round_to_default_increment && requested_amount.is_none())
            .then_some(inputs.policy.default_position_size_dollars);

        let request = PositionSizingRequest {
            ticker: inputs.ticker.to_string(),
            intent: normalized.intent,
            confidence: inputs.confidence.clamp(0.0, 100.0),
            risk_level: inputs.policy.risk_level,
            default_position_size: inputs.policy.default_position_size_dollars,
            min_position_size: inputs.policy.min_position_dollars(portfolio_value),
            max_position_size: inputs.policy.max_position_dollars(portfolio_value),
            deployable_cash: cash.deployable_cash,
            available_cash: account.cash,
            current_price: inputs.price,
            portfolio_value,
            current_position: position.map(|p| HeldPosition {
                shares: p.qty,
                market_value: p.market_value,
            }),
            requested_amount,
            round_increment,
        };

        let sizing = self.sizer.size_position(&request)?;
        if sizing.is_hold() && normalized.intent != Intent::Hold {
            warnings.push(sizing.reasoning.clone());
        }

        let order = self
            .builder
            .build(inputs.ticker, &sizing, position, inputs.price, portfolio_value);

        Ok(EngineDecision {
            base_intent: base,
            sizing,
            order,
            cash,
            warnings,
        })
    }

    fn demote(
        &self,
        inputs: &DecisionInputs<'_>,
        proposal: &EngineDecision,
        warning: String,
    ) -> EngineDecision {
        let sizing = PositionSizingResult::hold("Portfolio manager override");
        let order = self.builder.build(
            inputs.ticker,
            &sizing,
            inputs.snapshot.position(inputs.ticker),
            inputs.price,
            inputs.snapshot.account.portfolio_value,
        );
        let mut warnings = proposal.warnings.clone();
        warnings.push(warning);
        EngineDecision {
            base_intent: proposal.base_intent,
            sizing,
            order,
            cash: proposal.cash,
            warnings,
        }
    }
}

/// Stop-loss breaches force EXIT; reaching the profit target forces TRIM
fn limit_override(position: &Position, policy: &UserPolicy) -> Option<(Intent, String)> {
    let pl = position.unrealized_pl_percent;
    if !pl.is_finite() {
        return None;
    }
    if pl <= -policy.stop_loss_percent {
        return Some((
            Intent::Exit,
            format!(
                "{} P/L {:.2}% breached the {:.2}% stop-loss, exiting",
                position.symbol, pl, policy.stop_loss_percent
            ),
        ));
    }
    if pl >= policy.profit_target_percent {
        return Some((
            Intent::Trim,
            format!(
                "{} P/L {:.2}% reached the {:.2}% profit target, trimming",
                position.symbol, pl, policy.profit_target_percent
            ),
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::portfolio::{Account, OpenOrder, OrderSide, PendingSource};
    use chrono::Utc;

    fn snapshot(cash: f64, portfolio_value: f64, positions: Vec<Position>, open: Vec<OpenOrder>) -> PortfolioSnapshot {
        PortfolioSnapshot {
            account: Account::with_reservations(cash, portfolio_value, cash, &open),
            positions,
            open_orders: open,
            fetched_at: Utc::now(),
        }
    }

    fn position(qty: f64, price: f64, pl_percent: f64) -> Position {
        Position {
            symbol: "AAPL".into(),
            qty,
            avg_entry_price: price / (1.0 + pl_percent / 100.0),
            current_price: price,
            market_value: qty * price,
            unrealized_pl: 0.0,
            unrealized_pl_percent: pl_percent,
        }
    }

    fn inputs<'a>(
        decision: &'a str,
        confidence: f64,
        snapshot: &'a PortfolioSnapshot,
        policy: &'a UserPolicy,
    ) -> DecisionInputs<'a> {
        DecisionInputs {
            ticker: "AAPL",
            decision,
            confidence,
            snapshot,
            internal_pending: &[],
            policy,
            price: 100.0,
        }
    }

    #[test]
    fn test_moderate_buy_rounds_to_default_increment() {
        let snap = snapshot(20_000.0, 50_000.0, vec![], vec![]);
        let policy = UserPolicy::default();
        let engine = DecisionEngine::default();

        let decision = engine.decide(&inputs("BUY", 85.0, &snap, &policy)).unwrap();
        assert_eq!(decision.cash.deployable_cash, 10_000.0);
        assert_eq!(decision.intent(), Intent::Build);
        assert_eq!(decision.order.to_string(), "BUY $3000 worth AAPL");
        assert_eq!(decision.order.shares, 30.0);
    }

    #[test]
    fn test_cash_at_floor_holds() {
        let snap = snapshot(10_000.0, 50_000.0, vec![], vec![]);
        let policy = UserPolicy::default();
        let decision = DecisionEngine::default()
            .decide(&inputs("BUY", 95.0, &snap, &policy))
            .unwrap();
        assert!(decision.order.is_hold());
        assert!(decision.rationale().contains("Insufficient cash"));
    }

    #[test]
    fn test_pending_buy_blocks_buy() {
        let open = vec![OpenOrder {
            symbol: "AAPL".into(),
            side: OrderSide::Buy,
            qty: None,
            notional: Some(500.0),
            limit_price: None,
            submitted_at: None,
        }];
        let snap = snapshot(30_000.0, 50_000.0, vec![], open);
        let policy = UserPolicy::default();
        let decision = DecisionEngine::default()
            .decide(&inputs("BUY", 90.0, &snap, &policy))
            .unwrap();
        assert!(decision.order.is_hold());
        assert_eq!(decision.base_intent, Intent::Build);
    }

    #[test]
    fn test_internal_pending_buy_blocks_buy() {
        let snap = snapshot(30_000.0, 50_000.0, vec![], vec![]);
        let policy = UserPolicy::default();
        let internal = vec![PendingOrder {
            symbol: "AAPL".into(),
            side: OrderSide::Buy,
            source: PendingSource::Internal,
        }];
        let mut input = inputs("BUY", 90.0, &snap, &policy);
        input.internal_pending = &internal;
        assert!(DecisionEngine::default().decide(&input).unwrap().order.is_hold());
    }

    #[test]
    fn test_stop_loss_breach_exits_on_hold() {
        let snap = snapshot(10_000.0, 50_000.0, vec![position(12.0, 100.0, -12.0)], vec![]);
        let policy = UserPolicy::default();
        let decision = DecisionEngine::default()
            .decide(&inputs("HOLD", 50.0, &snap, &policy))
            .unwrap();
        assert_eq!(decision.intent(), Intent::Exit);
        assert_eq!(decision.order.action, TradeAction::Sell);
        assert_eq!(decision.order.shares, 12.0);
        assert_eq!(decision.order.after_shares, 0.0);
    }

    #[test]
    fn test_small_losing_position_holds_until_stop_loss() {
        // $400 position under the $500 minimum (1% of $50,000)
        let policy = UserPolicy::default();
        assert_eq!(policy.min_position_dollars(50_000.0), 500.0);
        let engine = DecisionEngine::default();

        let within = snapshot(10_000.0, 50_000.0, vec![position(4.0, 100.0, -5.0)], vec![]);
        let decision = engine.decide(&inputs("HOLD", 50.0, &within, &policy)).unwrap();
        assert!(decision.order.is_hold());
        assert_eq!(decision.order.before_shares, 4.0);
        assert_eq!(decision.order.after_shares, decision.order.before_shares);

        let breached = snapshot(10_000.0, 50_000.0, vec![position(4.0, 100.0, -12.0)], vec![]);
        let decision = engine.decide(&inputs("HOLD", 50.0, &breached, &policy)).unwrap();
        assert_eq!(decision.order.action, TradeAction::Sell);
        assert_eq!(decision.order.dollar_amount, 400.0);
        assert_eq!(decision.order.after_shares, 0.0);
    }

    #[test]
    fn test_profit_target_trims_on_hold() {
        let snap = snapshot(10_000.0, 50_000.0, vec![position(40.0, 100.0, 30.0)], vec![]);
        let policy = UserPolicy::default();
        let decision = DecisionEngine::default()
            .decide(&inputs("HOLD", 65.0, &snap, &policy))
            .unwrap();
        assert_eq!(decision.intent(), Intent::Trim);
        assert_eq!(decision.order.dollar_amount, 1000.0);
    }

    #[test]
    fn test_small_position_trim_sells_everything() {
        let snap = snapshot(10_000.0, 50_000.0, vec![position(4.0, 100.0, 2.0)], vec![]);
        let policy = UserPolicy::default();
        let decision = DecisionEngine::default()
            .decide(&inputs("TRIM", 80.0, &snap, &policy))
            .unwrap();
        assert_eq!(decision.order.action, TradeAction::Sell);
        assert_eq!(decision.order.shares, 4.0);
        assert_eq!(decision.order.dollar_amount, 400.0);
    }

    #[test]
    fn test_missing_price_is_unrecoverable() {
        let snap = snapshot(20_000.0, 50_000.0, vec![], vec![]);
        let policy = UserPolicy::default();
        let mut input = inputs("BUY", 85.0, &snap, &policy);
        input.price = 0.0;
        let err = DecisionEngine::default().decide(&input).unwrap_err();
        assert!(matches!(err, EngineError::DataFetch(_)));
    }

    #[test]
    fn test_reconcile_outcomes() {
        let snap = snapshot(20_000.0, 50_000.0, vec![], vec![]);
        let policy = UserPolicy::default();
        let engine = DecisionEngine::default();
        let input = inputs("BUY", 85.0, &snap, &policy);
        let proposal = engine.decide(&input).unwrap();

        let agreed = engine
            .reconcile(&input, &proposal, DecisionLine::extract("BUY $1200 worth AAPL", "AAPL"))
            .unwrap();
        assert_eq!(agreed.order.to_string(), "BUY $1200 worth AAPL");

        let oversized = engine
            .reconcile(&input, &proposal, DecisionLine::extract("BUY $90000 worth AAPL", "AAPL"))
            .unwrap();
        assert_eq!(oversized.order.dollar_amount, 5000.0);

        let opposite = engine
            .reconcile(&input, &proposal, DecisionLine::extract("SELL $1000 worth AAPL", "AAPL"))
            .unwrap();
        assert!(opposite.order.is_hold());

        let declined = engine
            .reconcile(&input, &proposal, DecisionLine::extract("HOLD AAPL", "AAPL"))
            .unwrap();
        assert!(declined.order.is_hold());

        let garbage = engine
            .reconcile(&input, &proposal, DecisionLine::extract("I think buying is wise", "AAPL"))
            .unwrap();
        assert!(garbage.order.is_hold());
        assert!(garbage.rationale().contains("unusable"));

        let rationale = opposite.rationale();
        assert_eq!(rationale.matches("against proposal").count(), 1);
        assert!(rationale.contains("Portfolio manager override"));
    }

    #[test]
    fn test_reconcile_keeps_full_exit() {
        let snap = snapshot(10_000.0, 50_000.0, vec![position(12.0, 100.0, -12.0)], vec![]);
        let policy = UserPolicy::default();
        let engine = DecisionEngine::default();
        let input = inputs("HOLD", 50.0, &snap, &policy);
        let proposal = engine.decide(&input).unwrap();

        let reconciled = engine
            .reconcile(&input, &proposal, DecisionLine::extract("SELL $500 worth AAPL", "AAPL"))
            .unwrap();
        assert_eq!(reconciled.order.shares, 12.0);
    }
}
