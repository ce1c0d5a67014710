/// Task Runner with Circuit Breaker Pattern
///
/// Keeps periodic background tasks (the near-limit sweep) alive: failures
/// back off exponentially, successes reset the breaker, and a task that
/// keeps failing is given up on instead of spinning forever.
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

/// Circuit breaker configuration for background tasks
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the task is abandoned
    pub max_consecutive_failures: u32,
    /// Initial delay between retries
    pub initial_retry_delay: Duration,
    /// Maximum delay between retries
    pub max_retry_delay: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 10,
            initial_retry_delay: Duration::from_secs(5),
            max_retry_delay: Duration::from_secs(300),
        }
    }
}

/// Why the runner stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExit {
    /// The task asked to stop
    Finished,
    /// Circuit opened after too many consecutive failures
    CircuitOpen { last_error: String },
}

/// One iteration's verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStep {
    Continue,
    Stop,
}

#[derive(Debug)]
struct CircuitBreakerState {
    consecutive_failures: u32,
    current_retry_delay: Duration,
}

impl CircuitBreakerState {
    fn new(initial_delay: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            current_retry_delay: initial_delay,
        }
    }

    fn record_failure(&mut self, max_delay: Duration) -> Duration {
        self.consecutive_failures += 1;
        let delay = self.current_retry_delay;
        self.current_retry_delay = std::cmp::min(self.current_retry_delay * 2, max_delay);
        delay
    }

    fn reset(&mut self, initial_delay: Duration) {
        self.consecutive_failures = 0;
        self.current_retry_delay = initial_delay;
    }
}

/// Run a background task with circuit breaker protection
///
/// `task_fn` executes one iteration (it does its own waiting between
/// iterations, e.g. on an interval). Errors are retried after an exponential
/// backoff; after `max_consecutive_failures` in a row the runner returns
/// [`TaskExit::CircuitOpen`] and the caller decides what that means.
pub async fn run_with_circuit_breaker<F, Fut>(
    task_name: &str,
    config: CircuitBreakerConfig,
    mut task_fn: F,
) -> TaskExit
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<TaskStep, String>>,
{
    let mut state = CircuitBreakerState::new(config.initial_retry_delay);

    loop {
        match task_fn().await {
            Ok(step) => {
                if state.consecutive_failures > 0 {
                    warn!(
                        "Task '{}' recovered after {} failures",
                        task_name, state.consecutive_failures
                    );
                }
                state.reset(config.initial_retry_delay);
                if step == TaskStep::Stop {
                    return TaskExit::Finished;
                }
            }
            Err(e) => {
                let delay = state.record_failure(config.max_retry_delay);
                error!(
                    "Task '{}' failed (attempt {}/{}): {}",
                    task_name, state.consecutive_failures, config.max_consecutive_failures, e
                );

                if state.consecutive_failures >= config.max_consecutive_failures {
                    error!(
                        "Task '{}' exceeded maximum consecutive failures ({}), giving up",
                        task_name, config.max_consecutive_failures
                    );
                    return TaskExit::CircuitOpen { last_error: e };
                }

                warn!("Task '{}' will retry in {:?}", task_name, delay);
                sleep(delay).await;
            }
        }
    }
}
