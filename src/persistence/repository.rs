//! Database Repository
//!
//! SQLite implementation of the analysis store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, error, warn};

use super::models::*;
use super::{DatabaseError, DbPool};
use crate::domain::entities::analysis::{
    AnalysisRecord, AnalysisStatus, InsightEnvelope, NewAnalysis, Phase, PhaseInsight,
    WorkflowContext,
};
use crate::domain::entities::portfolio::{OrderSide, PendingOrder, PendingSource};
use crate::domain::entities::trade_order::{InsertOutcome, OrderStatus, StoredTradeOrder, TradeOrder};
use crate::domain::entities::user_policy::UserPolicy;
use crate::domain::errors::EngineError;
use crate::domain::repositories::analysis_store::{
    AnalysisStore, NearLimitUser, PhaseMessage, StoreResult,
};
use crate::domain::value_objects::api_settings::ApiSettings;
use crate::domain::value_objects::intent::TradeAction;

fn query_error(context: &'static str) -> impl Fn(sqlx::Error) -> DatabaseError {
    move |e| {
        error!("Failed to {}: {}", context, e);
        DatabaseError::QueryError(format!("Failed to {}: {}", context, e))
    }
}

fn not_found(id: &str) -> EngineError {
    EngineError::Database(format!("Analysis not found: {}", id))
}

/// Analysis store backed by a SQLite pool
#[derive(Clone)]
pub struct SqliteAnalysisStore {
    pool: DbPool,
}

impl SqliteAnalysisStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn append_message(&self, id: &str, phase: Option<Phase>, message: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO analysis_messages (analysis_id, phase, message, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(id)
        .bind(phase.map(|p| p.as_str()))
        .bind(message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(query_error("append analysis message"))?;
        Ok(())
    }

    /// Store a user's trading policy
    pub async fn save_user_policy(&self, user_id: &str, policy: &UserPolicy) -> StoreResult<()> {
        policy.validate()?;
        let payload = serde_json::to_string(policy)?;
        sqlx::query(
            r#"
            INSERT INTO user_policies (user_id, payload, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(query_error("save user policy"))?;
        Ok(())
    }

    /// Store collaborator settings and the near-limit opt-in
    pub async fn save_user_settings(
        &self,
        user_id: &str,
        settings: &ApiSettings,
        auto_near_limit_analysis: bool,
    ) -> StoreResult<()> {
        let payload = serde_json::to_string(settings)?;
        sqlx::query(
            r#"
            INSERT INTO user_settings (user_id, auto_near_limit_analysis, api_settings, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id) DO UPDATE SET
                auto_near_limit_analysis = excluded.auto_near_limit_analysis,
                api_settings = excluded.api_settings,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(auto_near_limit_analysis)
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(query_error("save user settings"))?;
        Ok(())
    }

    /// Record a rebalance request status
    pub async fn upsert_rebalance(&self, id: &str, user_id: &str, status: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rebalance_requests (id, user_id, status, created_at) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET status = excluded.status
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(status)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(query_error("record rebalance request"))?;
        Ok(())
    }

    /// Delete an analysis; running phases treat this as a cancellation
    pub async fn delete_analysis(&self, id: &str) -> StoreResult<bool> {
        let rows = sqlx::query("DELETE FROM analyses WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(query_error("delete analysis"))?
            .rows_affected();
        Ok(rows > 0)
    }

    /// Orders waiting for manual approval or still being submitted
    pub async fn list_orders_with_status(
        &self,
        user_id: &str,
        status: OrderStatus,
    ) -> StoreResult<Vec<StoredTradeOrder>> {
        let rows = sqlx::query_as::<_, TradeOrderRow>(
            r#"
            SELECT analysis_id, user_id, payload, status, broker_order_id, created_at
            FROM trade_orders WHERE user_id = ?1 AND status = ?2 ORDER BY created_at
            "#,
        )
        .bind(user_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("list trade orders"))?;

        rows.into_iter().map(TradeOrderRow::into_stored).collect()
    }
}

#[async_trait]
impl AnalysisStore for SqliteAnalysisStore {
    async fn create_analysis(&self, analysis: &NewAnalysis) -> StoreResult<AnalysisRecord> {
        let now = Utc::now();
        let context = serde_json::to_string(&analysis.context)?;
        sqlx::query(
            r#"
            INSERT INTO analyses (id, ticker, user_id, status, phase, decision, confidence, context, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'pending', NULL, NULL, NULL, ?4, ?5, ?5)
            "#,
        )
        .bind(&analysis.id)
        .bind(&analysis.ticker)
        .bind(&analysis.user_id)
        .bind(context)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(query_error("create analysis"))?;

        debug!("Created analysis: {} for {}", analysis.id, analysis.ticker);
        self.read_analysis(&analysis.id)
            .await?
            .ok_or_else(|| not_found(&analysis.id))
    }

    async fn read_analysis(&self, id: &str) -> StoreResult<Option<AnalysisRecord>> {
        let row = sqlx::query_as::<_, AnalysisRow>(
            r#"
            SELECT id, ticker, user_id, status, phase, decision, confidence, context, created_at, updated_at
            FROM analyses WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("read analysis"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let insights = sqlx::query_as::<_, InsightRow>(
            "SELECT agent_key, payload FROM analysis_insights WHERE analysis_id = ?1",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("read analysis insights"))?;

        row.into_record(insights).map(Some)
    }

    async fn update_phase(&self, id: &str, phase: Phase, message: &str) -> StoreResult<()> {
        let rows = sqlx::query("UPDATE analyses SET phase = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(phase.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(query_error("update analysis phase"))?
            .rows_affected();
        if rows == 0 {
            return Err(not_found(id));
        }
        self.append_message(id, Some(phase), message).await
    }

    async fn update_insight(&self, id: &str, insight: &PhaseInsight) -> StoreResult<()> {
        let agent_key = insight.phase().agent_key();
        let payload = serde_json::to_string(&InsightEnvelope::new(insight.clone()))?;
        sqlx::query(
            r#"
            INSERT INTO analysis_insights (analysis_id, agent_key, payload, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(analysis_id, agent_key) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id)
        .bind(agent_key)
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(query_error("update analysis insight"))?;

        debug!("Stored {} insight for {}", agent_key, id);
        Ok(())
    }

    /// Cancellation is sticky: no later status overwrites `canceled`
    async fn update_status(&self, id: &str, status: AnalysisStatus) -> StoreResult<()> {
        let rows = sqlx::query(
            "UPDATE analyses SET status = ?1, updated_at = ?2 WHERE id = ?3 AND (status != 'canceled' OR ?1 = 'canceled')",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(query_error("update analysis status"))?
        .rows_affected();

        if rows == 0 {
            warn!("Status {} not applied to analysis {}", status.as_str(), id);
        }
        Ok(())
    }

    async fn update_verdict(&self, id: &str, decision: &str, confidence: f64) -> StoreResult<()> {
        sqlx::query("UPDATE analyses SET decision = ?1, confidence = ?2, updated_at = ?3 WHERE id = ?4")
            .bind(decision)
            .bind(confidence)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(query_error("update analysis verdict"))?;
        Ok(())
    }

    async fn update_context(&self, id: &str, context: &WorkflowContext) -> StoreResult<()> {
        let payload = serde_json::to_string(context)?;
        sqlx::query("UPDATE analyses SET context = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(payload)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(query_error("update workflow context"))?;
        Ok(())
    }

    async fn list_messages(&self, id: &str) -> StoreResult<Vec<PhaseMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT phase, message, created_at FROM analysis_messages WHERE analysis_id = ?1 ORDER BY id",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("list analysis messages"))?;

        rows.into_iter().map(MessageRow::into_message).collect()
    }

    async fn read_user_policy(&self, user_id: &str) -> StoreResult<UserPolicy> {
        let payload: Option<(String,)> =
            sqlx::query_as("SELECT payload FROM user_policies WHERE user_id = ?1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(query_error("read user policy"))?;

        match payload {
            Some((json,)) => serde_json::from_str(&json)
                .map_err(|e| EngineError::Database(format!("Invalid stored policy: {}", e))),
            None => Ok(UserPolicy::default()),
        }
    }

    async fn list_pending_orders(&self, user_id: &str) -> StoreResult<Vec<PendingOrder>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT o.ticker, o.action FROM trade_orders o
            LEFT JOIN analyses a ON a.id = o.analysis_id
            WHERE o.user_id = ?1
              AND o.status IN ('pending', 'submitting')
              AND o.action != 'HOLD'
              AND (a.status IS NULL OR a.status NOT IN ('error', 'canceled'))
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("list pending orders"))?;

        rows.into_iter()
            .map(|(ticker, action)| -> StoreResult<PendingOrder> {
                let side = match action.parse::<TradeAction>()? {
                    TradeAction::Sell => OrderSide::Sell,
                    _ => OrderSide::Buy,
                };
                Ok(PendingOrder {
                    symbol: ticker,
                    side,
                    source: PendingSource::Internal,
                })
            })
            .collect()
    }

    async fn find_trade_order(&self, analysis_id: &str) -> StoreResult<Option<StoredTradeOrder>> {
        let row = sqlx::query_as::<_, TradeOrderRow>(
            r#"
            SELECT analysis_id, user_id, payload, status, broker_order_id, created_at
            FROM trade_orders WHERE analysis_id = ?1
            "#,
        )
        .bind(analysis_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("find trade order"))?;

        row.map(TradeOrderRow::into_stored).transpose()
    }

    async fn insert_trade_order(
        &self,
        analysis_id: &str,
        user_id: &str,
        order: &TradeOrder,
        status: OrderStatus,
    ) -> StoreResult<InsertOutcome> {
        let now = Utc::now();
        let payload = serde_json::to_string(order)?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO trade_orders (
                analysis_id, user_id, ticker, action, dollar_amount, shares,
                payload, status, broker_order_id, created_at, updated_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?9
            WHERE NOT EXISTS (
                SELECT 1 FROM analyses WHERE id = ?1 AND status IN ('error', 'canceled')
            )
            ON CONFLICT(analysis_id) DO NOTHING
            "#,
        )
        .bind(analysis_id)
        .bind(user_id)
        .bind(&order.ticker)
        .bind(order.action.as_str())
        .bind(order.dollar_amount)
        .bind(order.shares)
        .bind(payload)
        .bind(status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(query_error("insert trade order"))?
        .rows_affected()
            == 1;

        let Some(stored) = self.find_trade_order(analysis_id).await? else {
            debug!("Analysis {} is closed, order not recorded", analysis_id);
            return Ok(InsertOutcome::Closed);
        };

        if inserted {
            debug!("Persisted order for {}: {}", analysis_id, stored.order);
            Ok(InsertOutcome::Inserted(stored))
        } else {
            debug!("Order for {} already existed: {}", analysis_id, stored.order);
            Ok(InsertOutcome::AlreadyExists(stored))
        }
    }

    async fn claim_order_submission(&self, analysis_id: &str) -> StoreResult<bool> {
        let rows = sqlx::query(
            "UPDATE trade_orders SET status = 'submitting', updated_at = ?1 WHERE analysis_id = ?2 AND status = 'pending'",
        )
        .bind(Utc::now())
        .bind(analysis_id)
        .execute(&self.pool)
        .await
        .map_err(query_error("claim order submission"))?
        .rows_affected();
        Ok(rows == 1)
    }

    async fn finish_order_submission(
        &self,
        analysis_id: &str,
        status: OrderStatus,
        broker_order_id: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE trade_orders
            SET status = ?1, broker_order_id = COALESCE(?2, broker_order_id), updated_at = ?3
            WHERE analysis_id = ?4
            "#,
        )
        .bind(status.as_str())
        .bind(broker_order_id)
        .bind(Utc::now())
        .bind(analysis_id)
        .execute(&self.pool)
        .await
        .map_err(query_error("finish order submission"))?;
        Ok(())
    }

    async fn list_near_limit_users(&self) -> StoreResult<Vec<NearLimitUser>> {
        let rows = sqlx::query_as::<_, UserSettingsRow>(
            "SELECT user_id, api_settings FROM user_settings WHERE auto_near_limit_analysis = 1 ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("list near-limit users"))?;

        let mut users = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_str::<ApiSettings>(&row.api_settings) {
                Ok(settings) if settings.has_brokerage_credentials() => users.push(NearLimitUser {
                    user_id: row.user_id,
                    settings,
                }),
                Ok(_) => debug!("User {} has no brokerage credentials, skipping", row.user_id),
                Err(e) => warn!("Unreadable settings for user {}: {}", row.user_id, e),
            }
        }
        Ok(users)
    }

    async fn has_active_work(&self, user_id: &str) -> StoreResult<bool> {
        let (active,): (bool,) = sqlx::query_as(
            r#"
            SELECT
                EXISTS(SELECT 1 FROM analyses WHERE user_id = ?1 AND status IN ('pending', 'running'))
                OR EXISTS(SELECT 1 FROM rebalance_requests WHERE user_id = ?1 AND status IN ('pending', 'running'))
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error("check active work"))?;
        Ok(active)
    }

    async fn tickers_analyzed_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<HashSet<String>> {
        let rows: Vec<(String, DateTime<Utc>)> =
            sqlx::query_as("SELECT ticker, created_at FROM analyses WHERE user_id = ?1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .map_err(query_error("list recent analyses"))?;

        Ok(rows
            .into_iter()
            .filter(|(_, created_at)| *created_at >= since)
            .map(|(ticker, _)| ticker.to_ascii_uppercase())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::analysis::{AgentReport, AnalysisOrigin};
    use crate::domain::entities::trade_order::OrderChanges;
    use crate::domain::value_objects::intent::Intent;
    use crate::persistence::{init_database, DatabaseConfig};

    async fn store() -> SqliteAnalysisStore {
        let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
        SqliteAnalysisStore::new(pool)
    }

    fn order(action: TradeAction, amount: f64) -> TradeOrder {
        TradeOrder {
            ticker: "AAPL".into(),
            action,
            intent: Intent::Build,
            dollar_amount: amount,
            shares: amount / 100.0,
            price: 100.0,
            before_shares: 0.0,
            before_value: 0.0,
            before_allocation: 0.0,
            after_shares: amount / 100.0,
            after_value: amount,
            after_allocation: amount / 500.0,
            changes: OrderChanges {
                shares: amount / 100.0,
                value: amount,
                allocation: amount / 500.0,
            },
            reasoning: "test".into(),
        }
    }

    #[tokio::test]
    async fn test_create_and_read_analysis() {
        let store = store().await;
        let new = NewAnalysis::new("aapl", "u-1", AnalysisOrigin::Manual);
        let created = store.create_analysis(&new).await.unwrap();

        assert_eq!(created.ticker, "AAPL");
        assert_eq!(created.status, AnalysisStatus::Pending);
        assert!(created.insights.is_empty());
        assert!(store.read_analysis("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_phase_and_insight_updates() {
        let store = store().await;
        let new = NewAnalysis::new("AAPL", "u-1", AnalysisOrigin::Manual);
        store.create_analysis(&new).await.unwrap();

        store
            .update_phase(&new.id, Phase::Market, "Market analysis started")
            .await
            .unwrap();
        let insight = PhaseInsight::Market(AgentReport {
            summary: "Uptrend".into(),
            recorded_at: Utc::now(),
        });
        store.update_insight(&new.id, &insight).await.unwrap();
        store.update_insight(&new.id, &insight).await.unwrap();

        let record = store.read_analysis(&new.id).await.unwrap().unwrap();
        assert_eq!(record.phase, Some(Phase::Market));
        assert_eq!(record.insights.len(), 1);

        let messages = store.list_messages(&new.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].phase, Some(Phase::Market));
    }

    #[tokio::test]
    async fn test_update_phase_on_missing_analysis_fails() {
        let store = store().await;
        let err = store
            .update_phase("missing", Phase::Risk, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Database(_)));
    }

    #[tokio::test]
    async fn test_canceled_status_is_sticky() {
        let store = store().await;
        let new = NewAnalysis::new("AAPL", "u-1", AnalysisOrigin::Manual);
        store.create_analysis(&new).await.unwrap();

        store.update_status(&new.id, AnalysisStatus::Canceled).await.unwrap();
        store.update_status(&new.id, AnalysisStatus::Completed).await.unwrap();

        let record = store.read_analysis(&new.id).await.unwrap().unwrap();
        assert!(record.is_canceled());
    }

    #[tokio::test]
    async fn test_trade_order_is_write_once() {
        let store = store().await;
        let first = store
            .insert_trade_order("a-1", "u-1", &order(TradeAction::Buy, 3000.0), OrderStatus::Pending)
            .await
            .unwrap();
        let second = store
            .insert_trade_order("a-1", "u-1", &order(TradeAction::Buy, 1200.0), OrderStatus::Pending)
            .await
            .unwrap();

        assert!(matches!(first, InsertOutcome::Inserted(_)));
        match second {
            InsertOutcome::AlreadyExists(stored) => assert_eq!(stored.order.dollar_amount, 3000.0),
            other => panic!("expected existing order, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submission_claim_happens_once() {
        let store = store().await;
        store
            .insert_trade_order("a-1", "u-1", &order(TradeAction::Buy, 3000.0), OrderStatus::Pending)
            .await
            .unwrap();

        assert!(store.claim_order_submission("a-1").await.unwrap());
        assert!(!store.claim_order_submission("a-1").await.unwrap());

        store
            .finish_order_submission("a-1", OrderStatus::Submitted, Some("broker-1"))
            .await
            .unwrap();
        let stored = store.find_trade_order("a-1").await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Submitted);
        assert_eq!(stored.broker_order_id.as_deref(), Some("broker-1"));
    }

    #[tokio::test]
    async fn test_pending_orders_exclude_holds_and_finished() {
        let store = store().await;
        store
            .insert_trade_order("a-1", "u-1", &order(TradeAction::Buy, 3000.0), OrderStatus::Pending)
            .await
            .unwrap();
        store
            .insert_trade_order("a-2", "u-1", &order(TradeAction::Hold, 0.0), OrderStatus::Skipped)
            .await
            .unwrap();
        store
            .insert_trade_order("a-3", "u-1", &order(TradeAction::Sell, 500.0), OrderStatus::Submitted)
            .await
            .unwrap();

        let pending = store.list_pending_orders("u-1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].side, OrderSide::Buy);
        assert_eq!(pending[0].source, PendingSource::Internal);
        assert!(store.list_pending_orders("u-2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_orders_ignore_closed_analyses() {
        let store = store().await;
        for status in [AnalysisStatus::Running, AnalysisStatus::Error, AnalysisStatus::Canceled] {
            let new = NewAnalysis::new("AAPL", "u-1", AnalysisOrigin::Manual);
            store.create_analysis(&new).await.unwrap();
            store
                .insert_trade_order(&new.id, "u-1", &order(TradeAction::Buy, 3000.0), OrderStatus::Pending)
                .await
                .unwrap();
            store.update_status(&new.id, status).await.unwrap();
        }

        let pending = store.list_pending_orders("u-1").await.unwrap();
        assert_eq!(pending.len(), 1);

        // An analysis that already ended refuses new orders
        let late = NewAnalysis::new("MSFT", "u-1", AnalysisOrigin::Manual);
        store.create_analysis(&late).await.unwrap();
        store.update_status(&late.id, AnalysisStatus::Error).await.unwrap();
        let outcome = store
            .insert_trade_order(&late.id, "u-1", &order(TradeAction::Buy, 500.0), OrderStatus::Pending)
            .await
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Closed);
        assert!(store.find_trade_order(&late.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_policy_defaults_and_round_trip() {
        let store = store().await;
        assert_eq!(store.read_user_policy("u-1").await.unwrap(), UserPolicy::default());

        let policy = UserPolicy {
            stop_loss_percent: 8.0,
            auto_execute_trades: true,
            ..Default::default()
        };
        store.save_user_policy("u-1", &policy).await.unwrap();
        assert_eq!(store.read_user_policy("u-1").await.unwrap(), policy);
    }

    #[tokio::test]
    async fn test_near_limit_users_need_opt_in_and_credentials() {
        let store = store().await;
        let with_keys = ApiSettings {
            ai_provider: "openai".into(),
            ai_api_key: "sk-0123456789".into(),
            alpaca_paper_api_key: Some("PK123456789".into()),
            alpaca_paper_secret_key: Some("SK123456789".into()),
            alpaca_paper_trading: true,
            ..Default::default()
        };
        store.save_user_settings("u-1", &with_keys, true).await.unwrap();
        store.save_user_settings("u-2", &with_keys, false).await.unwrap();
        store
            .save_user_settings("u-3", &ApiSettings::default(), true)
            .await
            .unwrap();

        let users = store.list_near_limit_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_id, "u-1");
    }

    #[tokio::test]
    async fn test_active_work_and_recent_tickers() {
        let store = store().await;
        assert!(!store.has_active_work("u-1").await.unwrap());

        let new = NewAnalysis::new("MSFT", "u-1", AnalysisOrigin::Manual);
        store.create_analysis(&new).await.unwrap();
        assert!(store.has_active_work("u-1").await.unwrap());

        store.update_status(&new.id, AnalysisStatus::Completed).await.unwrap();
        assert!(!store.has_active_work("u-1").await.unwrap());

        store.upsert_rebalance("r-1", "u-1", "running").await.unwrap();
        assert!(store.has_active_work("u-1").await.unwrap());

        let recent = store
            .tickers_analyzed_since("u-1", Utc::now() - chrono::Duration::hours(3))
            .await
            .unwrap();
        assert!(recent.contains("MSFT"));
        let none = store
            .tickers_analyzed_since("u-1", Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_analysis_reads_as_none() {
        let store = store().await;
        let new = NewAnalysis::new("AAPL", "u-1", AnalysisOrigin::Manual);
        store.create_analysis(&new).await.unwrap();
        store.update_phase(&new.id, Phase::Market, "started").await.unwrap();

        assert!(store.delete_analysis(&new.id).await.unwrap());
        assert!(store.read_analysis(&new.id).await.unwrap().is_none());
    }
}
