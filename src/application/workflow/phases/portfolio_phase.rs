//! Portfolio decision phase
//!
//! Turns the risk verdict into one bounded, persisted order:
//! cancellation check, idempotency gate, fresh portfolio, immutable policy,
//! engine proposal, portfolio-manager confirmation, reconciliation, and a
//! write-once insert. A retried invocation that finds an order reuses it.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{PhaseContext, PhaseHandler, PhaseOutcome};
use crate::application::workflow::cancellation::{CancellationGuard, GuardState};
use crate::application::workflow::idempotency::IdempotencyGate;
use crate::domain::entities::analysis::{Phase, PhaseInsight, PortfolioInsight};
use crate::domain::entities::trade_order::{InsertOutcome, StoredTradeOrder};
use crate::domain::errors::EngineError;
use crate::domain::repositories::analysis_store::AnalysisStore;
use crate::domain::repositories::brokerage_client::BrokerageClient;
use crate::domain::repositories::completion_client::CompletionRequest;
use crate::domain::services::decision_engine::{DecisionEngine, DecisionInputs, EngineDecision};
use crate::domain::value_objects::decision_line::DecisionLine;
use crate::infrastructure::client_factory::ClientFactory;

use super::agent_phase::{DEFAULT_CONFIDENCE, DEFAULT_DECISION};

pub const DEFAULT_PORTFOLIO_MAX_TOKENS: u32 = 1200;

const PORTFOLIO_MANAGER_PROMPT: &str = "You are a portfolio manager. Review the proposed trade \
    against the risk assessment and the portfolio. Finish with exactly one line in one of the \
    forms 'BUY $<amount> worth <TICKER>', 'SELL $<amount> worth <TICKER>' or 'HOLD <TICKER>'.";

pub struct PortfolioPhase {
    store: Arc<dyn AnalysisStore>,
    clients: Arc<dyn ClientFactory>,
    engine: DecisionEngine,
    cancellation: CancellationGuard,
    gate: IdempotencyGate,
}

impl PortfolioPhase {
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        clients: Arc<dyn ClientFactory>,
        engine: DecisionEngine,
    ) -> Self {
        Self {
            cancellation: CancellationGuard::new(store.clone()),
            gate: IdempotencyGate::new(store.clone()),
            store,
            clients,
            engine,
        }
    }

    /// Price from the held position, else the latest trade
    async fn current_price(
        &self,
        brokerage: &dyn BrokerageClient,
        snapshot_price: Option<f64>,
        ticker: &str,
    ) -> Result<f64, EngineError> {
        if let Some(price) = snapshot_price.filter(|p| p.is_finite() && *p > 0.0) {
            return Ok(price);
        }
        brokerage
            .latest_price(ticker)
            .await?
            .ok_or_else(|| EngineError::DataFetch(format!("No valid price for {}", ticker)))
    }

    fn confirmation_prompt(ticker: &str, verdict: &str, confidence: f64, proposal: &EngineDecision) -> String {
        let cash = &proposal.cash;
        format!(
            "Ticker: {}\nRisk verdict: {} ({:.0}% confidence)\nProposed: {}\nRationale: {}\n\
             Available cash: ${:.2}, deployable above the cash floor: ${:.2}\n",
            ticker,
            verdict,
            confidence,
            proposal.order.decision_line(),
            proposal.rationale(),
            cash.available_cash,
            cash.deployable_cash,
        )
    }

    async fn record_insight(
        &self,
        ctx: &PhaseContext,
        stored: &StoredTradeOrder,
        warnings: Vec<String>,
        reused: bool,
    ) -> Result<(), EngineError> {
        let order = &stored.order;
        let insight = PhaseInsight::Portfolio(PortfolioInsight {
            intent: order.intent,
            action: order.action,
            decision_line: order.decision_line().to_string(),
            dollar_amount: order.dollar_amount,
            shares: order.shares,
            reasoning: order.reasoning.clone(),
            warnings,
            reused_existing_order: reused,
            recorded_at: Utc::now(),
        });
        self.store.update_insight(&ctx.analysis_id, &insight).await?;

        let message = if reused {
            format!("Portfolio decision reused: {}", order.decision_line())
        } else {
            format!("Portfolio decision: {}", order.decision_line())
        };
        self.store
            .update_phase(&ctx.analysis_id, Phase::Portfolio, &message)
            .await
    }
}

#[async_trait]
impl PhaseHandler for PortfolioPhase {
    fn phase(&self) -> Phase {
        Phase::Portfolio
    }

    async fn run(&self, ctx: &PhaseContext) -> Result<PhaseOutcome, EngineError> {
        let record = match self.cancellation.check(&ctx.analysis_id, "phase entry").await? {
            GuardState::Active(record) => record,
            GuardState::Canceled => return Ok(PhaseOutcome::Canceled),
        };

        if let Some(existing) = self.gate.existing_order(&ctx.analysis_id).await? {
            self.record_insight(ctx, &existing, Vec::new(), true).await?;
            return Ok(PhaseOutcome::Completed);
        }

        let verdict = record.decision.clone().unwrap_or_else(|| DEFAULT_DECISION.to_string());
        let confidence = record.confidence.unwrap_or(DEFAULT_CONFIDENCE);

        let brokerage = self.clients.brokerage(&ctx.settings)?;
        let snapshot = brokerage.fetch_portfolio().await?;
        let held_price = snapshot.position(&ctx.ticker).map(|p| p.current_price);
        let price = self
            .current_price(brokerage.as_ref(), held_price, &ctx.ticker)
            .await?;

        let internal_pending = self.store.list_pending_orders(&ctx.user_id).await?;
        let policy = self
            .store
            .read_user_policy(&ctx.user_id)
            .await?
            .with_overrides(&ctx.settings);

        let mut context = record.context.clone();
        context.portfolio = Some(snapshot.clone());
        context.policy = Some(policy.clone());
        self.store.update_context(&ctx.analysis_id, &context).await?;

        let inputs = DecisionInputs {
            ticker: &ctx.ticker,
            decision: &verdict,
            confidence,
            snapshot: &snapshot,
            internal_pending: &internal_pending,
            policy: &policy,
            price,
        };
        let proposal = self.engine.decide(&inputs)?;
        debug!(
            "Engine proposal for {} ({}): {}",
            ctx.analysis_id,
            ctx.ticker,
            proposal.rationale()
        );

        let completion = self.clients.completion(&ctx.settings)?;
        let request = CompletionRequest {
            system_prompt: PORTFOLIO_MANAGER_PROMPT.to_string(),
            prompt: Self::confirmation_prompt(&ctx.ticker, &verdict, confidence, &proposal),
            max_tokens: ctx
                .settings
                .portfolio_manager_max_tokens
                .unwrap_or(DEFAULT_PORTFOLIO_MAX_TOKENS),
        };

        if self.cancellation.check(&ctx.analysis_id, "completion request").await? == GuardState::Canceled {
            return Ok(PhaseOutcome::Canceled);
        }

        let reply = completion.complete(&request).await?;
        let parsed = DecisionLine::extract(&reply, &ctx.ticker);
        if let Err(e) = &parsed {
            warn!("Unusable portfolio manager reply for {}: {}", ctx.analysis_id, e);
        }

        let decided = self.engine.reconcile(&inputs, &proposal, parsed)?;

        if self.cancellation.check(&ctx.analysis_id, "order record").await? == GuardState::Canceled {
            return Ok(PhaseOutcome::Canceled);
        }

        let mut order = decided.order.clone();
        order.reasoning = decided.rationale();
        let (stored, reused) = match self
            .gate
            .record(&ctx.analysis_id, &ctx.user_id, &order)
            .await?
        {
            InsertOutcome::Inserted(stored) => (stored, false),
            InsertOutcome::AlreadyExists(stored) => (stored, true),
            InsertOutcome::Closed => return Ok(PhaseOutcome::Canceled),
        };

        let warnings = if reused { Vec::new() } else { decided.warnings };
        self.record_insight(ctx, &stored, warnings, reused).await?;

        info!(
            "Portfolio decision for {} ({}): {}",
            ctx.analysis_id, ctx.ticker, stored.order
        );
        Ok(PhaseOutcome::Completed)
    }
}
