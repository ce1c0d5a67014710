//! Database Models
//!
//! Row shapes of the analysis tables and their conversion into domain types.
//! Stored JSON payloads are validated on read: a row that does not decode
//! into its typed form is reported as a database error, never passed on.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::collections::BTreeMap;

use crate::domain::entities::analysis::{
    AnalysisRecord, AnalysisStatus, InsightEnvelope, Phase, PhaseInsight, WorkflowContext,
};
use crate::domain::entities::trade_order::{OrderStatus, StoredTradeOrder, TradeOrder};
use crate::domain::errors::EngineError;
use crate::domain::repositories::analysis_store::PhaseMessage;

/// Analysis row in database
#[derive(Debug, Clone, FromRow)]
pub struct AnalysisRow {
    pub id: String,
    pub ticker: String,
    pub user_id: String,
    pub status: String,
    pub phase: Option<String>,
    pub decision: Option<String>,
    pub confidence: Option<f64>,
    pub context: String, // JSON WorkflowContext
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insight row in database
#[derive(Debug, Clone, FromRow)]
pub struct InsightRow {
    pub agent_key: String,
    pub payload: String, // JSON InsightEnvelope
}

/// Audit trail row in database
#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub phase: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Trade order row in database
#[derive(Debug, Clone, FromRow)]
pub struct TradeOrderRow {
    pub analysis_id: String,
    pub user_id: String,
    pub payload: String, // JSON TradeOrder
    pub status: String,
    pub broker_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// User settings row in database
#[derive(Debug, Clone, FromRow)]
pub struct UserSettingsRow {
    pub user_id: String,
    pub api_settings: String, // JSON ApiSettings
}

fn invalid(what: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::Database(format!("Invalid stored {}: {}", what, e))
}

impl AnalysisRow {
    pub fn into_record(self, insights: Vec<InsightRow>) -> Result<AnalysisRecord, EngineError> {
        let status: AnalysisStatus = self.status.parse().map_err(|e| invalid("status", e))?;
        let phase = self
            .phase
            .as_deref()
            .map(str::parse::<Phase>)
            .transpose()
            .map_err(|e| invalid("phase", e))?;
        let context = WorkflowContext::decode(&self.context)?;

        let mut decoded: BTreeMap<Phase, PhaseInsight> = BTreeMap::new();
        for row in insights {
            let insight = InsightEnvelope::decode(&row.agent_key, &row.payload)?;
            decoded.insert(insight.phase(), insight);
        }

        Ok(AnalysisRecord {
            id: self.id,
            ticker: self.ticker,
            user_id: self.user_id,
            status,
            phase,
            decision: self.decision,
            confidence: self.confidence,
            insights: decoded,
            context,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl MessageRow {
    pub fn into_message(self) -> Result<PhaseMessage, EngineError> {
        let phase = self
            .phase
            .as_deref()
            .map(str::parse::<Phase>)
            .transpose()
            .map_err(|e| invalid("message phase", e))?;
        Ok(PhaseMessage {
            phase,
            message: self.message,
            created_at: self.created_at,
        })
    }
}

impl TradeOrderRow {
    pub fn into_stored(self) -> Result<StoredTradeOrder, EngineError> {
        let order: TradeOrder =
            serde_json::from_str(&self.payload).map_err(|e| invalid("trade order", e))?;
        let status: OrderStatus = self.status.parse().map_err(|e| invalid("order status", e))?;
        Ok(StoredTradeOrder {
            analysis_id: self.analysis_id,
            user_id: self.user_id,
            order,
            status,
            broker_order_id: self.broker_order_id,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::analysis::{AgentReport, AnalysisOrigin};

    fn row(status: &str, phase: Option<&str>) -> AnalysisRow {
        AnalysisRow {
            id: "a-1".into(),
            ticker: "AAPL".into(),
            user_id: "u-1".into(),
            status: status.into(),
            phase: phase.map(Into::into),
            decision: None,
            confidence: None,
            context: serde_json::to_string(&WorkflowContext::new(AnalysisOrigin::Manual)).unwrap(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_into_record() {
        let insight = PhaseInsight::Research(AgentReport {
            summary: "Bull case".into(),
            recorded_at: Utc::now(),
        });
        let insights = vec![InsightRow {
            agent_key: "researchManager".into(),
            payload: serde_json::to_string(&InsightEnvelope::new(insight.clone())).unwrap(),
        }];

        let record = row("running", Some("risk")).into_record(insights).unwrap();
        assert_eq!(record.status, AnalysisStatus::Running);
        assert_eq!(record.phase, Some(Phase::Risk));
        assert_eq!(record.insights.get(&Phase::Research), Some(&insight));
    }

    #[test]
    fn test_unknown_status_is_database_error() {
        let err = row("paused", None).into_record(vec![]).unwrap_err();
        assert!(matches!(err, EngineError::Database(_)));
    }

    #[test]
    fn test_misfiled_insight_rejected() {
        let insight = PhaseInsight::Market(AgentReport {
            summary: "x".into(),
            recorded_at: Utc::now(),
        });
        let insights = vec![InsightRow {
            agent_key: "riskManager".into(),
            payload: serde_json::to_string(&InsightEnvelope::new(insight)).unwrap(),
        }];
        assert!(row("running", None).into_record(insights).is_err());
    }
}
