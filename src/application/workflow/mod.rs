pub mod cancellation;
pub mod coordinator;
pub mod idempotency;
pub mod phases;
pub mod retry_guard;

pub use cancellation::{CancellationGuard, GuardState};
pub use coordinator::{WorkflowCoordinator, WorkflowEvent, WorkflowOutcome};
pub use idempotency::IdempotencyGate;
pub use phases::{PhaseContext, PhaseHandler, PhaseOutcome};
pub use retry_guard::{RetryPolicy, RetryTimeoutGuard};
