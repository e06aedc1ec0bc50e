//! Per-task retry loop: bounded timeout per call, exponential backoff
//! between calls, only the last failure is reported.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;

use crate::executor::{Executor, ExecutorError, ExecutorOutput};
use crate::task::TaskId;

/// How a single task is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    /// Total executor calls allowed (at least one call is always made).
    pub attempts: u32,
    pub timeout: Duration,
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    /// Delay after the failed call with zero-based index `attempt`:
    /// `backoff_unit * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Final outcome of the retry loop for one task.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RetryOutcome {
    pub result: Result<ExecutorOutput, String>,
    /// Executor calls actually made.
    pub attempts: u32,
}

/// Call `executor` until it succeeds, fails fatally, or the attempt budget
/// is spent. A panicking call counts as one retryable failed attempt.
pub(crate) async fn run_with_retry(
    task_id: &TaskId,
    executor: &dyn Executor,
    input: &Value,
    policy: RetryPolicy,
) -> RetryOutcome {
    let max_attempts = policy.attempts.max(1);
    let mut last_error = String::new();

    for attempt in 0..max_attempts {
        if attempt > 0 {
            let delay = policy.backoff(attempt - 1);
            tracing::info!(
                task_id = %task_id,
                attempt = attempt + 1,
                max_attempts,
                backoff_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %last_error,
                "retrying task after backoff"
            );
            tokio::time::sleep(delay).await;
        }

        let call = AssertUnwindSafe(executor.execute(input)).catch_unwind();
        match tokio::time::timeout(policy.timeout, call).await {
            Ok(Ok(Ok(output))) if output.success => {
                return RetryOutcome {
                    result: Ok(output),
                    attempts: attempt + 1,
                };
            }
            Ok(Ok(Ok(output))) => {
                last_error = output
                    .error
                    .unwrap_or_else(|| "executor reported failure".to_string());
            }
            Ok(Ok(Err(ExecutorError::Retryable(message)))) => {
                last_error = message;
            }
            Ok(Ok(Err(ExecutorError::Fatal(message)))) => {
                tracing::warn!(
                    task_id = %task_id,
                    attempt = attempt + 1,
                    error = %message,
                    "executor failed fatally, not retrying"
                );
                return RetryOutcome {
                    result: Err(message),
                    attempts: attempt + 1,
                };
            }
            Ok(Err(_panic)) => {
                last_error = "executor panicked".to_string();
            }
            Err(_elapsed) => {
                last_error = format!("timed out after {:?}", policy.timeout);
            }
        }

        tracing::debug!(
            task_id = %task_id,
            attempt = attempt + 1,
            error = %last_error,
            "task attempt failed"
        );
    }

    RetryOutcome {
        result: Err(last_error),
        attempts: max_attempts,
    }
}
