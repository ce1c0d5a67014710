//! Phase handlers
//!
//! Each handler is a stateless invocation: everything it needs is read from
//! the analysis store, and everything it produces is written back under its
//! own insight key before it reports completion.

pub mod agent_phase;
pub mod execution_phase;
pub mod portfolio_phase;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::domain::entities::analysis::Phase;
use crate::domain::errors::EngineError;
use crate::domain::value_objects::api_settings::ApiSettings;

pub use agent_phase::AgentPhase;
pub use execution_phase::ExecutionPhase;
pub use portfolio_phase::PortfolioPhase;

/// Identity and settings of one phase invocation
#[derive(Clone)]
pub struct PhaseContext {
    pub analysis_id: String,
    pub ticker: String,
    pub user_id: String,
    pub settings: Arc<ApiSettings>,
    /// 1 for the first invocation, incremented by each re-invocation
    pub attempt: u32,
}

impl PhaseContext {
    pub fn new(analysis_id: &str, ticker: &str, user_id: &str, settings: ApiSettings) -> Self {
        Self {
            analysis_id: analysis_id.to_string(),
            ticker: ticker.trim().to_ascii_uppercase(),
            user_id: user_id.to_string(),
            settings: Arc::new(settings),
            attempt: 1,
        }
    }
}

impl fmt::Debug for PhaseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseContext")
            .field("analysis_id", &self.analysis_id)
            .field("ticker", &self.ticker)
            .field("user_id", &self.user_id)
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// How a phase invocation ended, when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    /// The analysis was canceled or deleted; nothing was written
    Canceled,
}

#[async_trait]
pub trait PhaseHandler: Send + Sync {
    fn phase(&self) -> Phase;

    async fn run(&self, ctx: &PhaseContext) -> Result<PhaseOutcome, EngineError>;
}
