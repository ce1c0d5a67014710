//! Order execution phase
//!
//! Submits the persisted order at most once. The `pending -> submitting`
//! claim in the store admits a single attempt; the brokerage additionally
//! deduplicates on a client order id derived from the analysis id.

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{error, info};

use super::{PhaseContext, PhaseHandler, PhaseOutcome};
use crate::application::workflow::cancellation::{CancellationGuard, GuardState};
use crate::application::workflow::idempotency::IdempotencyGate;
use crate::domain::entities::analysis::{ExecutionInsight, Phase, PhaseInsight};
use crate::domain::entities::portfolio::OrderSide;
use crate::domain::entities::trade_order::{OrderStatus, StoredTradeOrder, TradeOrder};
use crate::domain::errors::EngineError;
use crate::domain::repositories::analysis_store::AnalysisStore;
use crate::domain::repositories::brokerage_client::OrderRequest;
use crate::domain::value_objects::intent::{Intent, TradeAction};
use crate::infrastructure::client_factory::ClientFactory;

/// Deterministic brokerage idempotency key for an analysis
pub fn client_order_id(analysis_id: &str) -> String {
    let digest = Sha256::digest(analysis_id.as_bytes());
    format!("tp-{}", &hex::encode(digest)[..32])
}

/// Brokerage request for a persisted order; `None` for HOLD
pub fn order_request(analysis_id: &str, order: &TradeOrder) -> Option<OrderRequest> {
    let side = match order.action {
        TradeAction::Buy => OrderSide::Buy,
        TradeAction::Sell => OrderSide::Sell,
        TradeAction::Hold => return None,
    };
    // Full exits sell by share count so no fractional remainder is left behind
    let full_exit = side == OrderSide::Sell && (order.intent == Intent::Exit || order.after_shares <= 0.0);
    let (notional, qty) = if full_exit {
        (None, Some(order.before_shares))
    } else {
        (Some(order.dollar_amount), None)
    };
    Some(OrderRequest {
        symbol: order.ticker.clone(),
        side,
        notional,
        qty,
        client_order_id: client_order_id(analysis_id),
    })
}

pub struct ExecutionPhase {
    store: Arc<dyn AnalysisStore>,
    clients: Arc<dyn ClientFactory>,
    cancellation: CancellationGuard,
    gate: IdempotencyGate,
}

impl ExecutionPhase {
    pub fn new(store: Arc<dyn AnalysisStore>, clients: Arc<dyn ClientFactory>) -> Self {
        Self {
            cancellation: CancellationGuard::new(store.clone()),
            gate: IdempotencyGate::new(store.clone()),
            store,
            clients,
        }
    }

    async fn record(
        &self,
        ctx: &PhaseContext,
        status: OrderStatus,
        broker_order_id: Option<String>,
        message: String,
    ) -> Result<(), EngineError> {
        let insight = PhaseInsight::Execution(ExecutionInsight {
            order_status: status,
            broker_order_id,
            message: message.clone(),
            recorded_at: Utc::now(),
        });
        self.store.update_insight(&ctx.analysis_id, &insight).await?;
        self.store
            .update_phase(&ctx.analysis_id, Phase::Execution, &message)
            .await
    }

    async fn submit(&self, ctx: &PhaseContext, stored: &StoredTradeOrder) -> Result<PhaseOutcome, EngineError> {
        let Some(request) = order_request(&ctx.analysis_id, &stored.order) else {
            self.store
                .finish_order_submission(&ctx.analysis_id, OrderStatus::Skipped, None)
                .await?;
            self.record(ctx, OrderStatus::Skipped, None, "HOLD decision, nothing to submit".into())
                .await?;
            return Ok(PhaseOutcome::Completed);
        };

        let policy = self.store.read_user_policy(&ctx.user_id).await?;
        if !policy.auto_execute_trades {
            self.record(
                ctx,
                OrderStatus::Pending,
                None,
                format!("Order '{}' awaiting manual approval", stored.order),
            )
            .await?;
            return Ok(PhaseOutcome::Completed);
        }

        let brokerage = self.clients.brokerage(&ctx.settings)?;

        if self.cancellation.check(&ctx.analysis_id, "order submission").await? == GuardState::Canceled {
            return Ok(PhaseOutcome::Canceled);
        }

        if !self.store.claim_order_submission(&ctx.analysis_id).await? {
            info!(
                "Order for {} already claimed by another attempt, not submitting",
                ctx.analysis_id
            );
            return Ok(PhaseOutcome::Completed);
        }

        info!(
            "Submitting '{}' for {} via {} (client_order_id={})",
            stored.order,
            ctx.analysis_id,
            brokerage.name(),
            request.client_order_id
        );

        match brokerage.submit_order(&request).await {
            Ok(ack) if ack.success => {
                self.store
                    .finish_order_submission(&ctx.analysis_id, OrderStatus::Submitted, Some(&ack.order_id))
                    .await?;
                self.record(
                    ctx,
                    OrderStatus::Submitted,
                    Some(ack.order_id.clone()),
                    format!("Order '{}' submitted ({})", stored.order, ack.order_id),
                )
                .await?;
                Ok(PhaseOutcome::Completed)
            }
            Ok(ack) => {
                self.fail(ctx, stored, format!("Brokerage did not accept order {}", ack.order_id))
                    .await
            }
            Err(e) => self.fail(ctx, stored, e.to_string()).await,
        }
    }

    /// A failed submission is final: the claim is not released
    async fn fail(
        &self,
        ctx: &PhaseContext,
        stored: &StoredTradeOrder,
        reason: String,
    ) -> Result<PhaseOutcome, EngineError> {
        error!("Order submission failed for {}: {}", ctx.analysis_id, reason);
        self.store
            .finish_order_submission(&ctx.analysis_id, OrderStatus::Failed, None)
            .await?;
        let message = format!("Order '{}' failed: {}", stored.order, reason);
        self.record(ctx, OrderStatus::Failed, None, message.clone()).await?;
        Err(EngineError::Other(message))
    }
}

#[async_trait]
impl PhaseHandler for ExecutionPhase {
    fn phase(&self) -> Phase {
        Phase::Execution
    }

    async fn run(&self, ctx: &PhaseContext) -> Result<PhaseOutcome, EngineError> {
        if self.cancellation.check(&ctx.analysis_id, "phase entry").await? == GuardState::Canceled {
            return Ok(PhaseOutcome::Canceled);
        }

        let stored = self.gate.existing_order(&ctx.analysis_id).await?.ok_or_else(|| {
            EngineError::Other(format!("No trade order recorded for analysis {}", ctx.analysis_id))
        })?;

        match stored.status {
            OrderStatus::Pending => self.submit(ctx, &stored).await,
            OrderStatus::Skipped => {
                self.record(ctx, OrderStatus::Skipped, None, "HOLD decision, nothing to submit".into())
                    .await?;
                Ok(PhaseOutcome::Completed)
            }
            OrderStatus::Submitted => {
                info!("Order for {} was already submitted", ctx.analysis_id);
                self.record(
                    ctx,
                    OrderStatus::Submitted,
                    stored.broker_order_id.clone(),
                    format!("Order '{}' already submitted", stored.order),
                )
                .await?;
                Ok(PhaseOutcome::Completed)
            }
            OrderStatus::Submitting => {
                info!("Order for {} is being submitted by another attempt", ctx.analysis_id);
                Ok(PhaseOutcome::Completed)
            }
            OrderStatus::Failed => Err(EngineError::Other(format!(
                "Order '{}' previously failed and will not be resubmitted",
                stored.order
            ))),
        }
    }
}
