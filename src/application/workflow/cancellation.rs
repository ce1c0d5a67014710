//! Cooperative cancellation
//!
//! Phases poll the store at their checkpoints; a canceled or deleted analysis
//! stops the phase before its next side effect.

use std::sync::Arc;
use tracing::info;

use crate::domain::entities::analysis::AnalysisRecord;
use crate::domain::errors::EngineError;
use crate::domain::repositories::analysis_store::AnalysisStore;

#[derive(Debug, Clone, PartialEq)]
pub enum GuardState {
    Active(Box<AnalysisRecord>),
    Canceled,
}

#[derive(Clone)]
pub struct CancellationGuard {
    store: Arc<dyn AnalysisStore>,
}

impl CancellationGuard {
    pub fn new(store: Arc<dyn AnalysisStore>) -> Self {
        Self { store }
    }

    /// Re-read the analysis; `checkpoint` names the side effect about to happen
    pub async fn check(&self, analysis_id: &str, checkpoint: &str) -> Result<GuardState, EngineError> {
        match self.store.read_analysis(analysis_id).await? {
            None => {
                info!("Analysis {} no longer exists, stopping at {}", analysis_id, checkpoint);
                Ok(GuardState::Canceled)
            }
            Some(record) if record.is_canceled() => {
                info!("Analysis {} was canceled, stopping at {}", analysis_id, checkpoint);
                Ok(GuardState::Canceled)
            }
            Some(record) => Ok(GuardState::Active(Box::new(record))),
        }
    }
}
