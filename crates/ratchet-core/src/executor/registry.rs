//! Executor registry -- maps capability names to executors.
//!
//! The orchestrator resolves a task's `capability` through the registry at
//! dispatch time. Registration is a configuration-time operation: the
//! registry is owned by the orchestrator and can only be mutated through
//! `&mut`, so it cannot change while a drain is in progress.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use super::trait_def::Executor;
use super::types::{ExecutorError, ExecutorOutput, FnExecutor};

/// A collection of [`Executor`] implementations keyed by capability.
///
/// # Example
///
/// ```ignore
/// let mut registry = ExecutorRegistry::new();
/// registry.register("search", SearchExecutor::new());
/// let executor = registry.get("search").unwrap();
/// ```
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `executor` to `capability`.
    ///
    /// Last write wins: if the capability is already bound, the previous
    /// executor is replaced and returned.
    pub fn register(
        &mut self,
        capability: impl Into<String>,
        executor: impl Executor + 'static,
    ) -> Option<Arc<dyn Executor>> {
        self.register_arc(capability, Arc::new(executor))
    }

    /// Bind an already shared executor to `capability`.
    pub fn register_arc(
        &mut self,
        capability: impl Into<String>,
        executor: Arc<dyn Executor>,
    ) -> Option<Arc<dyn Executor>> {
        self.executors.insert(capability.into(), executor)
    }

    /// Bind an async closure to `capability`.
    pub fn register_fn<F, Fut>(
        &mut self,
        capability: impl Into<String>,
        f: F,
    ) -> Option<Arc<dyn Executor>>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ExecutorOutput, ExecutorError>> + Send + 'static,
    {
        self.register(capability, FnExecutor::new(f))
    }

    /// Look up the executor for a capability.
    pub fn get(&self, capability: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(capability).cloned()
    }

    /// Registered capability names, sorted.
    pub fn capabilities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.executors.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
