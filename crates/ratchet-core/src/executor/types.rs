//! Types shared by executors and the orchestrator.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use thiserror::Error;

use super::trait_def::Executor;

/// What an executor hands back for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorOutput {
    pub success: bool,
    pub data: Value,
    /// Self-reported confidence; clamped to [0, 1] when stored.
    pub confidence: Option<f64>,
    /// Failure description when `success` is false.
    pub error: Option<String>,
    /// Objective ids satisfied by this run, on top of the task's own.
    pub objectives: Vec<String>,
}

impl ExecutorOutput {
    /// A successful run carrying `data`.
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data,
            confidence: None,
            error: None,
            objectives: Vec::new(),
        }
    }

    /// An unsuccessful run. The orchestrator retries these.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            confidence: None,
            error: Some(message.into()),
            objectives: Vec::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_objectives<I, S>(mut self, objectives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.objectives = objectives.into_iter().map(Into::into).collect();
        self
    }
}

/// Errors an executor can raise.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// Transient; the orchestrator retries with backoff.
    #[error("{0}")]
    Retryable(String),
    /// Permanent; the task fails without further attempts.
    #[error("{0}")]
    Fatal(String),
}

impl ExecutorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

type BoxedFn =
    Box<dyn Fn(Value) -> BoxFuture<'static, Result<ExecutorOutput, ExecutorError>> + Send + Sync>;

/// Adapts an async closure into an [`Executor`].
///
/// ```ignore
/// let exec = FnExecutor::new(|input| async move {
///     Ok(ExecutorOutput::success(input))
/// });
/// ```
pub struct FnExecutor {
    f: BoxedFn,
}

impl FnExecutor {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ExecutorOutput, ExecutorError>> + Send + 'static,
    {
        Self {
            f: Box::new(move |input| f(input).boxed()),
        }
    }
}

impl fmt::Debug for FnExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnExecutor").finish_non_exhaustive()
    }
}

#[async_trait]
impl Executor for FnExecutor {
    async fn execute(&self, input: &Value) -> Result<ExecutorOutput, ExecutorError> {
        (self.f)(input.clone()).await
    }
}
