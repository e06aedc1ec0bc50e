//! The [`Executor`] trait definition.
//!
//! Each task capability is served by one implementation of this trait. The
//! trait is object-safe so it can be stored as `Arc<dyn Executor>` in the
//! [`super::ExecutorRegistry`] and shared by concurrently running tasks.

use async_trait::async_trait;
use serde_json::Value;

use super::types::{ExecutorError, ExecutorOutput};

/// Performs the work behind a task capability.
///
/// Implementations must be safe to call concurrently: the orchestrator may
/// invoke a single instance for several tasks of the same capability at
/// once. The orchestrator bounds every call with the task's timeout; a call
/// that overruns is abandoned and counted as a retryable failure.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run the task with its opaque input payload.
    ///
    /// - `Ok` with `success == true` completes the task.
    /// - `Ok` with `success == false` and `Err(ExecutorError::Retryable)`
    ///   are retried with backoff.
    /// - `Err(ExecutorError::Fatal)` fails the task immediately.
    async fn execute(&self, input: &Value) -> Result<ExecutorOutput, ExecutorError>;
}

// Compile-time assertion: Executor must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Executor) {}
};
