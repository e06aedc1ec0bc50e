//! Orchestrator error taxonomy.
//!
//! Configuration errors (`InvalidTask`, `CyclicDependency`,
//! `ExecutorNotFound`) are fatal to a single task. `Unschedulable` is the
//! stuck-queue condition surfaced by [`crate::Orchestrator::drain`] and is
//! fatal to the current loop iteration.

use thiserror::Error;

use crate::task::{TaskId, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestratorError {
    #[error("invalid task {task_id:?}: {reason}")]
    InvalidTask { task_id: TaskId, reason: String },

    #[error("task {task_id:?} would create a dependency cycle: {}", cycle.join(" -> "))]
    CyclicDependency { task_id: TaskId, cycle: Vec<TaskId> },

    #[error("no executor registered for capability {capability:?} (task {task_id:?})")]
    ExecutorNotFound { task_id: TaskId, capability: String },

    #[error(
        "circular dependency: {} pending task(s) cannot be scheduled and nothing is running: {}",
        stuck.len(),
        stuck.join(", ")
    )]
    Unschedulable { stuck: Vec<TaskId> },

    #[error("task {0:?} not found")]
    UnknownTask(TaskId),

    #[error("invalid state transition: {from} -> {to} for task {task_id:?}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
}

impl OrchestratorError {
    /// `true` for errors that are fatal to a single task only.
    pub fn is_task_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidTask { .. } | Self::CyclicDependency { .. } | Self::ExecutorNotFound { .. }
        )
    }
}
