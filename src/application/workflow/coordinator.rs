//! Workflow coordinator
//!
//! Drives one analysis through market → research → risk → portfolio →
//! execution. Each phase runs under the retry guard; the coordinator owns
//! the record's status transitions and publishes one event per outcome.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::cancellation::{CancellationGuard, GuardState};
use super::phases::{PhaseContext, PhaseHandler, PhaseOutcome};
use super::retry_guard::RetryTimeoutGuard;
use crate::domain::entities::analysis::{AnalysisStatus, Phase};
use crate::domain::errors::{EngineError, ErrorKind};
use crate::domain::repositories::analysis_store::AnalysisStore;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notification published for every phase and workflow outcome
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowEvent {
    PhaseCompleted {
        analysis_id: String,
        phase: Phase,
    },
    Canceled {
        analysis_id: String,
        phase: Option<Phase>,
    },
    Failed {
        analysis_id: String,
        phase: Phase,
        kind: ErrorKind,
        message: String,
    },
    Completed {
        analysis_id: String,
    },
}

impl WorkflowEvent {
    pub fn analysis_id(&self) -> &str {
        match self {
            WorkflowEvent::PhaseCompleted { analysis_id, .. }
            | WorkflowEvent::Canceled { analysis_id, .. }
            | WorkflowEvent::Failed { analysis_id, .. }
            | WorkflowEvent::Completed { analysis_id } => analysis_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutcome {
    Completed,
    Canceled { phase: Option<Phase> },
    Failed { phase: Phase, error: EngineError },
}

pub struct WorkflowCoordinator {
    store: Arc<dyn AnalysisStore>,
    phases: BTreeMap<Phase, Arc<dyn PhaseHandler>>,
    guard: RetryTimeoutGuard,
    cancellation: CancellationGuard,
    events: broadcast::Sender<WorkflowEvent>,
}

impl WorkflowCoordinator {
    pub fn new(store: Arc<dyn AnalysisStore>, guard: RetryTimeoutGuard) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            cancellation: CancellationGuard::new(store.clone()),
            store,
            phases: BTreeMap::new(),
            guard,
            events,
        }
    }

    /// Register the handler of one phase; phases without a handler are skipped
    pub fn with_phase(mut self, handler: Arc<dyn PhaseHandler>) -> Self {
        self.phases.insert(handler.phase(), handler);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &Arc<dyn AnalysisStore> {
        &self.store
    }

    fn publish(&self, event: WorkflowEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Run the workflow in the background
    pub fn spawn_from(self: &Arc<Self>, ctx: PhaseContext, start: Phase) -> JoinHandle<WorkflowOutcome> {
        let coordinator = self.clone();
        tokio::spawn(async move { coordinator.run_from(ctx, start).await })
    }

    /// Run every registered phase from `start` to the end of the workflow
    pub async fn run_from(&self, ctx: PhaseContext, start: Phase) -> WorkflowOutcome {
        let id = ctx.analysis_id.clone();
        info!("Starting workflow for {} ({}) at {} phase", id, ctx.ticker, start);

        match self.cancellation.check(&id, "workflow start").await {
            Ok(GuardState::Active(_)) => {}
            Ok(GuardState::Canceled) => return self.canceled(&id, None).await,
            Err(e) => return self.failed(&id, start, e).await,
        }
        if let Err(e) = self.store.update_status(&id, AnalysisStatus::Running).await {
            return self.failed(&id, start, e).await;
        }

        let mut next = Some(start);
        while let Some(phase) = next {
            next = phase.next();
            let Some(handler) = self.phases.get(&phase).cloned() else {
                continue;
            };

            match self.cancellation.check(&id, "phase start").await {
                Ok(GuardState::Active(_)) => {}
                Ok(GuardState::Canceled) => return self.canceled(&id, Some(phase)).await,
                Err(e) => return self.failed(&id, phase, e).await,
            }
            if let Err(e) = self
                .store
                .update_phase(&id, phase, &format!("{} phase started", phase))
                .await
            {
                return self.failed(&id, phase, e).await;
            }

            match self.guard.run(handler, ctx.clone()).await {
                Ok(PhaseOutcome::Completed) => {
                    info!("{} phase finished for {} ({})", phase, id, ctx.ticker);
                    self.publish(WorkflowEvent::PhaseCompleted {
                        analysis_id: id.clone(),
                        phase,
                    });
                }
                Ok(PhaseOutcome::Canceled) => return self.canceled(&id, Some(phase)).await,
                Err(e) => return self.failed(&id, phase, e).await,
            }
        }

        if let Err(e) = self.store.update_status(&id, AnalysisStatus::Completed).await {
            error!("Could not mark {} completed: {}", id, e);
        }
        info!("Workflow completed for {} ({})", id, ctx.ticker);
        self.publish(WorkflowEvent::Completed { analysis_id: id });
        WorkflowOutcome::Completed
    }

    async fn canceled(&self, id: &str, phase: Option<Phase>) -> WorkflowOutcome {
        info!("Workflow for {} canceled at {:?}", id, phase);
        // A deleted record has nowhere to write to; that is fine
        if let Some(phase) = phase {
            let _ = self
                .store
                .update_phase(id, phase, &format!("{} phase canceled", phase))
                .await;
        }
        let _ = self.store.update_status(id, AnalysisStatus::Canceled).await;
        self.publish(WorkflowEvent::Canceled {
            analysis_id: id.to_string(),
            phase,
        });
        WorkflowOutcome::Canceled { phase }
    }

    async fn failed(&self, id: &str, phase: Phase, error: EngineError) -> WorkflowOutcome {
        let kind = error.kind();
        let message = format!("{} phase failed [{}]: {}", phase, kind, error);
        error!("Workflow for {}: {}", id, message);

        if let Err(e) = self.store.update_phase(id, phase, &message).await {
            warn!("Could not record failure message for {}: {}", id, e);
        }
        if let Err(e) = self.store.update_status(id, AnalysisStatus::Error).await {
            warn!("Could not mark {} as error: {}", id, e);
        }
        self.publish(WorkflowEvent::Failed {
            analysis_id: id.to_string(),
            phase,
            kind,
            message,
        });
        WorkflowOutcome::Failed { phase, error }
    }
}
