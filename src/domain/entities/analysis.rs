//! Analysis record and its typed workflow payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::domain::entities::portfolio::PortfolioSnapshot;
use crate::domain::entities::trade_order::OrderStatus;
use crate::domain::entities::user_policy::UserPolicy;
use crate::domain::errors::{EngineError, ValidationError};
use crate::domain::value_objects::intent::{Intent, TradeAction};
use crate::domain::value_objects::proximity::LimitProximity;

/// Schema version of stored insight and context payloads
pub const PAYLOAD_SCHEMA_VERSION: u32 = 1;

/// One named stage of the analysis workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Market,
    Research,
    Risk,
    Portfolio,
    Execution,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Market,
        Phase::Research,
        Phase::Risk,
        Phase::Portfolio,
        Phase::Execution,
    ];

    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Market => Some(Phase::Research),
            Phase::Research => Some(Phase::Risk),
            Phase::Risk => Some(Phase::Portfolio),
            Phase::Portfolio => Some(Phase::Execution),
            Phase::Execution => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Market => "market",
            Phase::Research => "research",
            Phase::Risk => "risk",
            Phase::Portfolio => "portfolio",
            Phase::Execution => "execution",
        }
    }

    /// Insight key owned by the agent of this phase
    pub fn agent_key(&self) -> &'static str {
        match self {
            Phase::Market => "marketAnalyst",
            Phase::Research => "researchManager",
            Phase::Risk => "riskManager",
            Phase::Portfolio => "portfolioManager",
            Phase::Execution => "tradeExecutor",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownVariant {
                kind: "phase",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Running,
    Completed,
    Error,
    Canceled,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Running => "running",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Error => "error",
            AnalysisStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnalysisStatus::Completed | AnalysisStatus::Error | AnalysisStatus::Canceled
        )
    }
}

impl FromStr for AnalysisStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AnalysisStatus::Pending),
            "running" => Ok(AnalysisStatus::Running),
            "completed" => Ok(AnalysisStatus::Completed),
            "error" => Ok(AnalysisStatus::Error),
            "canceled" => Ok(AnalysisStatus::Canceled),
            other => Err(ValidationError::UnknownVariant {
                kind: "analysis status",
                value: other.to_string(),
            }),
        }
    }
}

/// Free-text report of an analyst agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub summary: String,
    pub recorded_at: DateTime<Utc>,
}

/// Verdict of the risk manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub decision: String,
    pub confidence: f64,
    pub summary: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioInsight {
    pub intent: Intent,
    pub action: TradeAction,
    pub decision_line: String,
    pub dollar_amount: f64,
    pub shares: f64,
    pub reasoning: String,
    pub warnings: Vec<String>,
    /// True when a retried attempt found the order already written
    pub reused_existing_order: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionInsight {
    pub order_status: OrderStatus,
    pub broker_order_id: Option<String>,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

/// Insight written by exactly one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "agent", content = "data", rename_all = "lowercase")]
pub enum PhaseInsight {
    Market(AgentReport),
    Research(AgentReport),
    Risk(RiskAssessment),
    Portfolio(PortfolioInsight),
    Execution(ExecutionInsight),
}

impl PhaseInsight {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseInsight::Market(_) => Phase::Market,
            PhaseInsight::Research(_) => Phase::Research,
            PhaseInsight::Risk(_) => Phase::Risk,
            PhaseInsight::Portfolio(_) => Phase::Portfolio,
            PhaseInsight::Execution(_) => Phase::Execution,
        }
    }

    /// Short text used when later agents are given earlier findings
    pub fn summary(&self) -> String {
        match self {
            PhaseInsight::Market(r) | PhaseInsight::Research(r) => r.summary.clone(),
            PhaseInsight::Risk(r) => format!(
                "Decision: {} (confidence {:.0}%)\n{}",
                r.decision, r.confidence, r.summary
            ),
            PhaseInsight::Portfolio(p) => format!("{}\n{}", p.decision_line, p.reasoning),
            PhaseInsight::Execution(e) => e.message.clone(),
        }
    }
}

/// Versioned envelope an insight is stored in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightEnvelope {
    pub version: u32,
    pub insight: PhaseInsight,
}

impl InsightEnvelope {
    pub fn new(insight: PhaseInsight) -> Self {
        Self {
            version: PAYLOAD_SCHEMA_VERSION,
            insight,
        }
    }

    /// Decode a stored payload, checking it belongs under `agent_key`
    pub fn decode(agent_key: &str, payload: &str) -> Result<PhaseInsight, EngineError> {
        let envelope: InsightEnvelope = serde_json::from_str(payload)?;
        if envelope.version != PAYLOAD_SCHEMA_VERSION {
            return Err(EngineError::Database(format!(
                "Unsupported insight version {} for {}",
                envelope.version, agent_key
            )));
        }
        if envelope.insight.phase().agent_key() != agent_key {
            return Err(EngineError::Database(format!(
                "Insight stored under {} belongs to {}",
                agent_key,
                envelope.insight.phase().agent_key()
            )));
        }
        Ok(envelope.insight)
    }
}

/// Why an analysis was started
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisOrigin {
    Manual,
    NearLimit { proximity: LimitProximity },
}

/// Typed replacement for the free-form workflow blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub version: u32,
    pub origin: AnalysisOrigin,
    #[serde(default)]
    pub portfolio: Option<PortfolioSnapshot>,
    #[serde(default)]
    pub policy: Option<UserPolicy>,
}

impl WorkflowContext {
    pub fn new(origin: AnalysisOrigin) -> Self {
        Self {
            version: PAYLOAD_SCHEMA_VERSION,
            origin,
            portfolio: None,
            policy: None,
        }
    }

    pub fn decode(payload: &str) -> Result<Self, EngineError> {
        let context: WorkflowContext = serde_json::from_str(payload)?;
        if context.version != PAYLOAD_SCHEMA_VERSION {
            return Err(EngineError::Database(format!(
                "Unsupported workflow context version {}",
                context.version
            )));
        }
        Ok(context)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRecord {
    pub id: String,
    pub ticker: String,
    pub user_id: String,
    pub status: AnalysisStatus,
    pub phase: Option<Phase>,
    pub decision: Option<String>,
    pub confidence: Option<f64>,
    pub insights: BTreeMap<Phase, PhaseInsight>,
    pub context: WorkflowContext,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn is_canceled(&self) -> bool {
        self.status == AnalysisStatus::Canceled
    }
}

/// Input for creating an analysis
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub id: String,
    pub ticker: String,
    pub user_id: String,
    pub context: WorkflowContext,
}

impl NewAnalysis {
    pub fn new(ticker: &str, user_id: &str, origin: AnalysisOrigin) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ticker: ticker.to_ascii_uppercase(),
            user_id: user_id.to_string(),
            context: WorkflowContext::new(origin),
        }
    }
}
