//! Analysis Store Trait
//!
//! Row-level read/update access to analysis records, user policy and the
//! write-once order table. Each phase only ever writes its own insight key,
//! so implementations need no cross-row locking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::domain::entities::analysis::{
    AnalysisRecord, AnalysisStatus, NewAnalysis, Phase, PhaseInsight, WorkflowContext,
};
use crate::domain::entities::portfolio::PendingOrder;
use crate::domain::entities::trade_order::{InsertOutcome, OrderStatus, StoredTradeOrder, TradeOrder};
use crate::domain::entities::user_policy::UserPolicy;
use crate::domain::errors::EngineError;
use crate::domain::value_objects::api_settings::ApiSettings;

pub type StoreResult<T> = Result<T, EngineError>;

/// One entry of an analysis' audit trail
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseMessage {
    pub phase: Option<Phase>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// A user that opted into automatic near-limit analysis
#[derive(Debug, Clone)]
pub struct NearLimitUser {
    pub user_id: String,
    pub settings: ApiSettings,
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn create_analysis(&self, analysis: &NewAnalysis) -> StoreResult<AnalysisRecord>;

    /// `None` once the record has been deleted
    async fn read_analysis(&self, id: &str) -> StoreResult<Option<AnalysisRecord>>;

    /// Record the phase being worked on and append `message` to the trail
    async fn update_phase(&self, id: &str, phase: Phase, message: &str) -> StoreResult<()>;

    async fn update_insight(&self, id: &str, insight: &PhaseInsight) -> StoreResult<()>;

    async fn update_status(&self, id: &str, status: AnalysisStatus) -> StoreResult<()>;

    async fn update_verdict(&self, id: &str, decision: &str, confidence: f64) -> StoreResult<()>;

    async fn update_context(&self, id: &str, context: &WorkflowContext) -> StoreResult<()>;

    async fn list_messages(&self, id: &str) -> StoreResult<Vec<PhaseMessage>>;

    /// Stored policy, or the defaults when the user never saved one
    async fn read_user_policy(&self, user_id: &str) -> StoreResult<UserPolicy>;

    /// Internally tracked trade actions that have not reached the brokerage
    async fn list_pending_orders(&self, user_id: &str) -> StoreResult<Vec<PendingOrder>>;

    async fn find_trade_order(&self, analysis_id: &str) -> StoreResult<Option<StoredTradeOrder>>;

    /// Write-once insert keyed by analysis id
    async fn insert_trade_order(
        &self,
        analysis_id: &str,
        user_id: &str,
        order: &TradeOrder,
        status: OrderStatus,
    ) -> StoreResult<InsertOutcome>;

    /// Move a pending order to `submitting`; false if another attempt already did
    async fn claim_order_submission(&self, analysis_id: &str) -> StoreResult<bool>;

    async fn finish_order_submission(
        &self,
        analysis_id: &str,
        status: OrderStatus,
        broker_order_id: Option<&str>,
    ) -> StoreResult<()>;

    async fn list_near_limit_users(&self) -> StoreResult<Vec<NearLimitUser>>;

    /// Any running analysis or rebalance for the user
    async fn has_active_work(&self, user_id: &str) -> StoreResult<bool>;

    async fn tickers_analyzed_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> StoreResult<HashSet<String>>;
}
