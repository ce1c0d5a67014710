//! Decision-already-made check
//!
//! The trade order table holds at most one row per analysis id. A retried
//! portfolio phase looks its order up first and reuses it verbatim; two
//! attempts racing past the lookup still end up with the row the first one
//! wrote, because the insert never overwrites.

use std::sync::Arc;
use tracing::info;

use crate::domain::entities::trade_order::{InsertOutcome, OrderStatus, StoredTradeOrder, TradeOrder};
use crate::domain::errors::EngineError;
use crate::domain::repositories::analysis_store::AnalysisStore;

#[derive(Clone)]
pub struct IdempotencyGate {
    store: Arc<dyn AnalysisStore>,
}

impl IdempotencyGate {
    pub fn new(store: Arc<dyn AnalysisStore>) -> Self {
        Self { store }
    }

    pub async fn existing_order(&self, analysis_id: &str) -> Result<Option<StoredTradeOrder>, EngineError> {
        let existing = self.store.find_trade_order(analysis_id).await?;
        if let Some(stored) = &existing {
            info!(
                "Analysis {} already decided '{}', reusing it",
                analysis_id, stored.order
            );
        }
        Ok(existing)
    }

    /// Write the order once; HOLD orders are recorded as skipped
    pub async fn record(
        &self,
        analysis_id: &str,
        user_id: &str,
        order: &TradeOrder,
    ) -> Result<InsertOutcome, EngineError> {
        let status = if order.is_hold() {
            OrderStatus::Skipped
        } else {
            OrderStatus::Pending
        };
        let outcome = self
            .store
            .insert_trade_order(analysis_id, user_id, order, status)
            .await?;
        match &outcome {
            InsertOutcome::AlreadyExists(stored) => info!(
                "Analysis {} raced another attempt; keeping its order '{}'",
                analysis_id, stored.order
            ),
            InsertOutcome::Closed => info!(
                "Analysis {} ended before its order was recorded; dropping '{}'",
                analysis_id, order
            ),
            InsertOutcome::Inserted(_) => {}
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::analysis::{AnalysisOrigin, AnalysisStatus, NewAnalysis};
    use crate::domain::entities::trade_order::OrderChanges;
    use crate::domain::value_objects::intent::{Intent, TradeAction};
    use crate::persistence::{init_database, DatabaseConfig, SqliteAnalysisStore};

    fn order(action: TradeAction, amount: f64) -> TradeOrder {
        TradeOrder {
            ticker: "AAPL".into(),
            action,
            intent: if action == TradeAction::Hold { Intent::Hold } else { Intent::Build },
            dollar_amount: amount,
            shares: amount / 100.0,
            price: 100.0,
            before_shares: 0.0,
            before_value: 0.0,
            before_allocation: 0.0,
            after_shares: amount / 100.0,
            after_value: amount,
            after_allocation: 0.0,
            changes: OrderChanges {
                shares: amount / 100.0,
                value: amount,
                allocation: 0.0,
            },
            reasoning: "test".into(),
        }
    }

    async fn gate() -> IdempotencyGate {
        let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
        IdempotencyGate::new(Arc::new(SqliteAnalysisStore::new(pool)))
    }

    #[tokio::test]
    async fn test_second_record_keeps_first_order() {
        let gate = gate().await;
        assert!(gate.existing_order("a-1").await.unwrap().is_none());

        gate.record("a-1", "u-1", &order(TradeAction::Buy, 3000.0)).await.unwrap();
        let second = gate
            .record("a-1", "u-1", &order(TradeAction::Buy, 4000.0))
            .await
            .unwrap();

        assert!(matches!(second, InsertOutcome::AlreadyExists(_)));
        let existing = gate.existing_order("a-1").await.unwrap().unwrap();
        assert_eq!(existing.order.dollar_amount, 3000.0);
        assert_eq!(existing.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn test_hold_recorded_as_skipped() {
        let gate = gate().await;
        let stored = gate
            .record("a-2", "u-1", &order(TradeAction::Hold, 0.0))
            .await
            .unwrap()
            .into_stored()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::Skipped);
    }

    #[tokio::test]
    async fn test_errored_analysis_records_nothing() {
        let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
        let store = Arc::new(SqliteAnalysisStore::new(pool));
        let new = NewAnalysis::new("AAPL", "u-1", AnalysisOrigin::Manual);
        store.create_analysis(&new).await.unwrap();
        store.update_status(&new.id, AnalysisStatus::Error).await.unwrap();

        let gate = IdempotencyGate::new(store.clone());
        let outcome = gate
            .record(&new.id, "u-1", &order(TradeAction::Buy, 3000.0))
            .await
            .unwrap();

        assert_eq!(outcome, InsertOutcome::Closed);
        assert!(gate.existing_order(&new.id).await.unwrap().is_none());
    }
}
