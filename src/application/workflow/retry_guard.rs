//! Supervised phase invocation with a deadline and bounded retries
//!
//! Every attempt runs as its own task. When an attempt misses its deadline
//! it is left running and a fresh attempt starts next to it; whichever
//! attempt finishes first decides the outcome. A phase may therefore run
//! more than once, and phases rely on the idempotency gate, not on this
//! guard, for exactly-once effects. Once the guard gives up, attempts still
//! in flight are aborted so a failed phase leaves nothing behind.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{error, info, warn};

use super::phases::{PhaseContext, PhaseHandler, PhaseOutcome};
use crate::config::EngineConfig;
use crate::domain::errors::EngineError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Wall-clock budget of one attempt
    pub timeout: Duration,
    /// Re-invocations after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            timeout: config.phase_timeout(),
            max_retries: config.phase_max_retries,
            initial_backoff: Duration::from_millis(config.retry_initial_backoff_milliseconds),
            max_backoff: Duration::from_millis(config.retry_max_backoff_milliseconds),
        }
    }

    /// Delay before re-running after the `failures`-th failed attempt, with up to 50% jitter
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let base = self
            .initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff);
        let jitter_cap = (base.as_millis() / 2) as u64;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        (base + Duration::from_millis(jitter)).min(self.max_backoff.max(base))
    }
}

enum Failure {
    TimedOut,
    Failed(EngineError),
}

#[derive(Debug, Clone)]
pub struct RetryTimeoutGuard {
    policy: RetryPolicy,
}

impl RetryTimeoutGuard {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `handler` until one attempt finishes, a non-retryable error
    /// occurs, or `max_retries` re-invocations are used up
    pub async fn run(
        &self,
        handler: Arc<dyn PhaseHandler>,
        ctx: PhaseContext,
    ) -> Result<PhaseOutcome, EngineError> {
        let phase = handler.phase();
        let max_attempts = self.policy.max_retries.saturating_add(1);
        let mut in_flight: JoinSet<Result<PhaseOutcome, EngineError>> = JoinSet::new();
        let mut attempt = 0u32;
        let mut failures = 0u32;
        let mut last_failure = Failure::TimedOut;

        loop {
            attempt += 1;
            let mut attempt_ctx = ctx.clone();
            attempt_ctx.attempt = attempt;
            let attempt_handler = handler.clone();
            in_flight.spawn(async move { attempt_handler.run(&attempt_ctx).await });

            if attempt > 1 {
                info!(
                    "Re-invoking {} phase for {} ({}), attempt {}/{}",
                    phase, ctx.analysis_id, ctx.ticker, attempt, max_attempts
                );
            }

            let deadline = Instant::now() + self.policy.timeout;
            let mut timed_out = false;

            while !in_flight.is_empty() {
                match timeout_at(deadline, in_flight.join_next()).await {
                    Ok(Some(Ok(Ok(outcome)))) => {
                        // Slower attempts keep running to their own end
                        in_flight.detach_all();
                        return Ok(outcome);
                    }
                    Ok(Some(Ok(Err(e)))) => {
                        if !e.is_retryable() {
                            error!(
                                "{} phase for {} failed with non-retryable error: {}",
                                phase, ctx.analysis_id, e
                            );
                            in_flight.abort_all();
                            return Err(e);
                        }
                        warn!("{} phase for {} failed: {}", phase, ctx.analysis_id, e);
                        last_failure = Failure::Failed(e);
                    }
                    Ok(Some(Err(join_error))) => {
                        error!("{} phase task for {} aborted: {}", phase, ctx.analysis_id, join_error);
                        last_failure =
                            Failure::Failed(EngineError::Other(format!("Phase task aborted: {}", join_error)));
                    }
                    Ok(None) => break,
                    Err(_) => {
                        warn!(
                            "{} phase for {} exceeded {:?} (attempt {})",
                            phase, ctx.analysis_id, self.policy.timeout, attempt
                        );
                        last_failure = Failure::TimedOut;
                        timed_out = true;
                        break;
                    }
                }
            }

            if attempt >= max_attempts {
                in_flight.abort_all();
                let error = match last_failure {
                    Failure::TimedOut => EngineError::Timeout {
                        phase,
                        attempts: attempt,
                    },
                    Failure::Failed(e) => e,
                };
                error!(
                    "{} phase for {} gave up after {} attempt(s): {}",
                    phase, ctx.analysis_id, attempt, error
                );
                return Err(error);
            }

            if !timed_out {
                failures += 1;
                sleep(self.policy.backoff(failures)).await;
            }
        }
    }
}
