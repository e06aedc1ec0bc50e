//! DAG-aware orchestrator: holds the task set, computes ready tasks, runs
//! them in bounded-concurrency batches with per-task retry and timeout.
//!
//! Executor calls run on spawned tokio tasks; their results come back over
//! a single mpsc channel and are applied to the task map one at a time, so
//! status transitions have exactly one writer.

mod graph;
mod retry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};

use crate::error::OrchestratorError;
use crate::evaluation::clamp_unit;
use crate::executor::{Executor, ExecutorRegistry};
use crate::state::TaskStateMachine;
use crate::task::{Task, TaskId, TaskResult, TaskStatus};

use retry::{RetryOutcome, RetryPolicy, run_with_retry};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of tasks running at once inside a drain.
    pub max_concurrent_tasks: usize,
    /// Wall time limit per executor call, unless the task overrides it.
    #[serde(rename = "task_timeout_secs", with = "crate::durations::secs")]
    pub task_timeout: Duration,
    /// Executor calls per task, unless the task overrides it.
    pub retry_attempts: u32,
    /// Backoff after the k-th failed call is `backoff_unit * 2^k`.
    #[serde(rename = "backoff_unit_ms", with = "crate::durations::millis")]
    pub backoff_unit: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            task_timeout: Duration::from_secs(300),
            retry_attempts: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

/// Counts per status plus the completion ratio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// `completed / total`, 0 when there are no tasks.
    pub progress_ratio: f64,
}

/// Summary of one successful [`Orchestrator::drain`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    /// Number of batches dispatched.
    pub batches: usize,
    /// Task ids in dispatch order.
    pub dispatched: Vec<TaskId>,
    /// Pending tasks cancelled because a dependency failed.
    pub cancelled: Vec<TaskId>,
    /// Highest number of tasks observed `Running` at once.
    pub peak_running: usize,
}

/// A task that has been moved to `running` and is ready to be executed.
struct Dispatch {
    task_id: TaskId,
    executor: Arc<dyn Executor>,
    input: Value,
    policy: RetryPolicy,
}

/// Message sent from spawned executions back to the consumer loop.
struct TaskDone {
    task_id: TaskId,
    outcome: RetryOutcome,
}

impl Dispatch {
    async fn run(self) -> TaskDone {
        let outcome =
            run_with_retry(&self.task_id, self.executor.as_ref(), &self.input, self.policy).await;

        TaskDone {
            task_id: self.task_id,
            outcome,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Owns the task map and every status transition in it.
#[derive(Debug)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: ExecutorRegistry,
    tasks: HashMap<TaskId, Task>,
}

impl Orchestrator {
    /// Create an orchestrator with an empty executor registry.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_registry(config, ExecutorRegistry::new())
    }

    pub fn with_registry(config: OrchestratorConfig, registry: ExecutorRegistry) -> Self {
        Self {
            config,
            registry,
            tasks: HashMap::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    /// Bind an executor to a capability (last write wins).
    pub fn register_executor(
        &mut self,
        capability: impl Into<String>,
        executor: impl Executor + 'static,
    ) -> Option<Arc<dyn Executor>> {
        self.registry.register(capability, executor)
    }

    /// Add a pending task.
    ///
    /// Dependencies may name tasks that are added later. Rejects:
    /// - an empty or already registered id, or a non-pending task
    ///   ([`OrchestratorError::InvalidTask`]);
    /// - a task that would close a dependency cycle among non-terminal
    ///   tasks, including depending on itself
    ///   ([`OrchestratorError::CyclicDependency`]).
    ///
    /// A rejected task leaves the task set unchanged.
    pub fn add_task(&mut self, task: Task) -> Result<(), OrchestratorError> {
        if task.id.trim().is_empty() {
            return Err(OrchestratorError::InvalidTask {
                task_id: task.id,
                reason: "task id must not be empty".to_string(),
            });
        }
        if self.tasks.contains_key(&task.id) {
            return Err(OrchestratorError::InvalidTask {
                reason: "a task with this id already exists".to_string(),
                task_id: task.id,
            });
        }
        if task.status != TaskStatus::Pending {
            return Err(OrchestratorError::InvalidTask {
                reason: format!("new tasks must be pending, got {}", task.status),
                task_id: task.id,
            });
        }
        if let Some(cycle) = graph::find_cycle(&self.tasks, &task) {
            tracing::warn!(task_id = %task.id, cycle = ?cycle, "rejected task: dependency cycle");
            return Err(OrchestratorError::CyclicDependency {
                task_id: task.id,
                cycle,
            });
        }

        tracing::debug!(
            task_id = %task.id,
            capability = %task.capability,
            dependencies = task.dependencies.len(),
            "task added"
        );
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// All tasks, ordered by id.
    pub fn tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        tasks
    }

    /// Owned copy of every task, ordered by id.
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks().into_iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Every pending task whose dependencies are all completed, ordered by
    /// `(priority desc, id asc)`. Read-only.
    pub fn get_ready_tasks(&self) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && graph::dependencies_met(&self.tasks, t))
            .collect();
        ready.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        ready
    }

    /// Ids of completed tasks, sorted.
    pub fn completed_ids(&self) -> Vec<TaskId> {
        self.ids_with_status(TaskStatus::Completed)
    }

    /// Ids of running tasks, sorted.
    pub fn active_ids(&self) -> Vec<TaskId> {
        self.ids_with_status(TaskStatus::Running)
    }

    /// Ids of failed tasks, sorted.
    pub fn failed_ids(&self) -> Vec<TaskId> {
        self.ids_with_status(TaskStatus::Failed)
    }

    fn ids_with_status(&self, status: TaskStatus) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.status == status)
            .map(|t| t.id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn count_status(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Counts per status and the `completed / total` ratio.
    pub fn progress_report(&self) -> ProgressReport {
        let mut report = ProgressReport {
            total: self.tasks.len(),
            ..ProgressReport::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => report.pending += 1,
                TaskStatus::Running => report.running += 1,
                TaskStatus::Completed => report.completed += 1,
                TaskStatus::Failed => report.failed += 1,
                TaskStatus::Cancelled => report.cancelled += 1,
            }
        }
        if report.total > 0 {
            report.progress_ratio = report.completed as f64 / report.total as f64;
        }
        report
    }

    /// Run one ready task to a terminal state, with retries.
    ///
    /// The task must be pending with all dependencies completed. An unknown
    /// capability fails the task without calling anything and is returned
    /// as [`OrchestratorError::ExecutorNotFound`].
    pub async fn execute_task(&mut self, id: &str) -> Result<&Task, OrchestratorError> {
        let task = self
            .tasks
            .get(id)
            .ok_or_else(|| OrchestratorError::UnknownTask(id.to_string()))?;

        if task.status != TaskStatus::Pending {
            return Err(OrchestratorError::InvalidTransition {
                task_id: task.id.clone(),
                from: task.status,
                to: TaskStatus::Running,
            });
        }
        if !graph::dependencies_met(&self.tasks, task) {
            return Err(OrchestratorError::InvalidTask {
                task_id: task.id.clone(),
                reason: "dependencies are not all completed".to_string(),
            });
        }

        let dispatch = self.dispatch(id)?;
        let done = dispatch.run().await;
        self.apply(done);

        self.tasks
            .get(id)
            .ok_or_else(|| OrchestratorError::UnknownTask(id.to_string()))
    }

    /// Run every schedulable task to a terminal state.
    ///
    /// Repeatedly takes up to `max_concurrent` ready tasks, executes them
    /// concurrently and waits for the whole batch to settle. Pending tasks
    /// whose dependencies failed are cancelled between batches. Stops when
    /// nothing is pending; if pending tasks remain but none is ready and
    /// nothing is running, returns [`OrchestratorError::Unschedulable`]
    /// with the stuck ids. Progress made before that point is kept.
    pub async fn drain(&mut self, max_concurrent: usize) -> Result<DrainReport, OrchestratorError> {
        let limit = max_concurrent.max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let (tx, mut rx) = mpsc::channel::<TaskDone>(limit * 2);
        let mut report = DrainReport::default();

        loop {
            report.cancelled.extend(self.cancel_blocked());

            let batch: Vec<TaskId> = self
                .get_ready_tasks()
                .into_iter()
                .take(limit)
                .map(|t| t.id.clone())
                .collect();

            if batch.is_empty() {
                let stuck = self.ids_with_status(TaskStatus::Pending);
                if stuck.is_empty() {
                    break;
                }
                tracing::error!(stuck = ?stuck, "no ready tasks and nothing running");
                return Err(OrchestratorError::Unschedulable { stuck });
            }

            report.batches += 1;
            let mut in_flight: usize = 0;

            for task_id in batch {
                let dispatch = match self.dispatch(&task_id) {
                    Ok(dispatch) => dispatch,
                    Err(e) => {
                        tracing::error!(task_id = %task_id, error = %e, "task not dispatched");
                        continue;
                    }
                };
                report.dispatched.push(task_id);
                in_flight += 1;

                let semaphore = Arc::clone(&semaphore);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let done = dispatch.run().await;
                    let _ = tx.send(done).await;
                });
            }

            report.peak_running = report
                .peak_running
                .max(self.count_status(TaskStatus::Running));

            // Settle the batch: results are applied one at a time here.
            while in_flight > 0 {
                let Some(done) = rx.recv().await else {
                    break;
                };
                in_flight -= 1;
                self.apply(done);
            }
        }

        report.cancelled.sort();
        Ok(report)
    }

    /// Cancel every pending task. Used when the surrounding loop stops.
    pub fn cancel_pending(&mut self, reason: &str) -> Vec<TaskId> {
        let ids = self.ids_with_status(TaskStatus::Pending);
        for id in &ids {
            self.cancel(id, reason.to_string());
        }
        ids
    }

    /// Move a pending task to `running` and resolve its executor.
    ///
    /// An unknown capability fails the task on the spot.
    fn dispatch(&mut self, id: &str) -> Result<Dispatch, OrchestratorError> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::UnknownTask(id.to_string()))?;

        TaskStateMachine::transition(task, TaskStatus::Running)?;

        let Some(executor) = self.registry.get(&task.capability) else {
            let err = OrchestratorError::ExecutorNotFound {
                task_id: task.id.clone(),
                capability: task.capability.clone(),
            };
            task.error = Some(err.to_string());
            TaskStateMachine::transition(task, TaskStatus::Failed)?;
            return Err(err);
        };

        let policy = RetryPolicy {
            attempts: task.retry_attempts.unwrap_or(self.config.retry_attempts),
            timeout: task.timeout.unwrap_or(self.config.task_timeout),
            backoff_unit: self.config.backoff_unit,
        };

        tracing::info!(
            task_id = %task.id,
            capability = %task.capability,
            max_attempts = policy.attempts,
            "dispatching task"
        );

        Ok(Dispatch {
            task_id: task.id.clone(),
            executor,
            input: task.input.clone(),
            policy,
        })
    }

    /// Apply a finished execution to the task map.
    fn apply(&mut self, done: TaskDone) {
        let Some(task) = self.tasks.get_mut(&done.task_id) else {
            tracing::warn!(task_id = %done.task_id, "result for unknown task dropped");
            return;
        };

        task.attempts = done.outcome.attempts;
        let transition = match done.outcome.result {
            Ok(output) => {
                task.result = Some(TaskResult {
                    data: output.data,
                    confidence: output.confidence.map(clamp_unit),
                    objectives: output.objectives,
                });
                tracing::info!(
                    task_id = %task.id,
                    attempts = task.attempts,
                    "task completed"
                );
                TaskStateMachine::transition(task, TaskStatus::Completed)
            }
            Err(message) => {
                tracing::warn!(
                    task_id = %task.id,
                    attempts = task.attempts,
                    error = %message,
                    "task failed"
                );
                task.error = Some(message);
                TaskStateMachine::transition(task, TaskStatus::Failed)
            }
        };

        if let Err(e) = transition {
            tracing::error!(task_id = %done.task_id, error = %e, "could not record task result");
        }
    }

    /// Cancel pending tasks that depend on a failed or cancelled task,
    /// repeating until no more are found.
    fn cancel_blocked(&mut self) -> Vec<TaskId> {
        let mut cancelled = Vec::new();

        loop {
            let blocked: Vec<(TaskId, String)> = self
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Pending)
                .filter_map(|t| {
                    graph::dead_dependency(&self.tasks, t)
                        .map(|dep| (t.id.clone(), format!("dependency {:?} {}", dep.id, dep.status)))
                })
                .collect();

            if blocked.is_empty() {
                break;
            }

            for (id, reason) in blocked {
                tracing::info!(task_id = %id, reason = %reason, "cancelling blocked task");
                self.cancel(&id, reason);
                cancelled.push(id);
            }
        }

        cancelled
    }

    fn cancel(&mut self, id: &str, reason: String) {
        if let Some(task) = self.tasks.get_mut(id) {
            match TaskStateMachine::transition(task, TaskStatus::Cancelled) {
                Ok(()) => task.error = Some(reason),
                Err(e) => tracing::warn!(task_id = %id, error = %e, "cancel skipped"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutorError, ExecutorOutput};

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrent_tasks: 2,
            task_timeout: Duration::from_secs(5),
            retry_attempts: 1,
            backoff_unit: Duration::from_millis(1),
        }
    }

    fn echo_orchestrator() -> Orchestrator {
        let mut orch = Orchestrator::new(fast_config());
        orch.registry.register_fn("echo", |input| async move {
            Ok(ExecutorOutput::success(input).with_confidence(1.5))
        });
        orch.registry.register_fn("boom", |_| async {
            Err(ExecutorError::Fatal("boom".into()))
        });
        orch
    }

    struct PanickingExecutor;

    #[async_trait::async_trait]
    impl Executor for PanickingExecutor {
        async fn execute(&self, _input: &Value) -> Result<ExecutorOutput, ExecutorError> {
            panic!("executor bug");
        }
    }

    fn ready_ids(orch: &Orchestrator) -> Vec<String> {
        orch.get_ready_tasks().iter().map(|t| t.id.clone()).collect()
    }

    #[test]
    fn config_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_tasks, 4);
        assert_eq!(config.task_timeout, Duration::from_secs(300));
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.backoff_unit, Duration::from_secs(1));
    }

    #[test]
    fn config_parses_partial_toml() {
        let config: OrchestratorConfig =
            toml::from_str("max_concurrent_tasks = 8\nbackoff_unit_ms = 20\n").unwrap();
        assert_eq!(config.max_concurrent_tasks, 8);
        assert_eq!(config.backoff_unit, Duration::from_millis(20));
        assert_eq!(config.retry_attempts, 3);
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut orch = echo_orchestrator();
        orch.add_task(Task::new("a", "echo")).unwrap();
        let err = orch.add_task(Task::new("a", "echo")).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTask { .. }));
        assert_eq!(orch.len(), 1);
    }

    #[test]
    fn empty_id_rejected() {
        let mut orch = echo_orchestrator();
        let err = orch.add_task(Task::new("  ", "echo")).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTask { .. }));
        assert!(orch.is_empty());
    }

    #[test]
    fn non_pending_task_rejected() {
        let mut orch = echo_orchestrator();
        let mut task = Task::new("a", "echo");
        task.status = TaskStatus::Completed;
        assert!(matches!(
            orch.add_task(task),
            Err(OrchestratorError::InvalidTask { .. })
        ));
    }

    #[test]
    fn ready_tasks_ordered_by_priority_then_id() {
        let mut orch = echo_orchestrator();
        orch.add_task(Task::new("c", "echo").with_priority(1)).unwrap();
        orch.add_task(Task::new("b", "echo").with_priority(5)).unwrap();
        orch.add_task(Task::new("a", "echo").with_priority(1)).unwrap();
        orch.add_task(Task::new("d", "echo").with_dependencies(["a"])).unwrap();

        assert_eq!(ready_ids(&orch), vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn execute_task_stores_clamped_result() {
        let mut orch = echo_orchestrator();
        orch.add_task(Task::new("a", "echo").with_input(serde_json::json!({"x": 1})))
            .unwrap();

        let task = orch.execute_task("a").await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.attempts, 1);
        let result = task.result.as_ref().unwrap();
        assert_eq!(result.data["x"], 1);
        assert_eq!(result.confidence, Some(1.0));
        assert!(task.error.is_none());
    }

    #[tokio::test]
    async fn execute_task_requires_completed_dependencies() {
        let mut orch = echo_orchestrator();
        orch.add_task(Task::new("a", "echo")).unwrap();
        orch.add_task(Task::new("b", "echo").with_dependencies(["a"])).unwrap();

        let err = orch.execute_task("b").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTask { .. }));
        assert_eq!(orch.task("b").unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn execute_task_twice_is_rejected() {
        let mut orch = echo_orchestrator();
        orch.add_task(Task::new("a", "echo")).unwrap();
        orch.execute_task("a").await.unwrap();

        let err = orch.execute_task("a").await.unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::InvalidTransition {
                task_id: "a".into(),
                from: TaskStatus::Completed,
                to: TaskStatus::Running,
            }
        );
    }

    #[tokio::test]
    async fn unknown_capability_fails_task() {
        let mut orch = echo_orchestrator();
        orch.add_task(Task::new("a", "missing")).unwrap();

        let err = orch.execute_task("a").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ExecutorNotFound { .. }));

        let task = orch.task("a").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap().contains("missing"));
        assert_eq!(task.attempts, 0);
    }

    #[tokio::test]
    async fn execute_unknown_task() {
        let mut orch = echo_orchestrator();
        assert_eq!(
            orch.execute_task("nope").await.unwrap_err(),
            OrchestratorError::UnknownTask("nope".into())
        );
    }

    #[tokio::test]
    async fn drain_runs_chain_in_order() {
        let mut orch = echo_orchestrator();
        orch.add_task(Task::new("c", "echo").with_dependencies(["b"])).unwrap();
        orch.add_task(Task::new("b", "echo").with_dependencies(["a"])).unwrap();
        orch.add_task(Task::new("a", "echo")).unwrap();

        let report = orch.drain(4).await.unwrap();

        assert_eq!(report.dispatched, vec!["a", "b", "c"]);
        assert_eq!(report.batches, 3);
        assert_eq!(report.peak_running, 1);
        assert_eq!(orch.completed_ids(), vec!["a", "b", "c"]);
        assert!(orch.active_ids().is_empty());
    }

    #[tokio::test]
    async fn drain_cancels_dependents_of_failed_task() {
        let mut orch = echo_orchestrator();
        orch.add_task(Task::new("a", "boom")).unwrap();
        orch.add_task(Task::new("b", "echo").with_dependencies(["a"])).unwrap();
        orch.add_task(Task::new("c", "echo").with_dependencies(["b"])).unwrap();
        orch.add_task(Task::new("d", "echo")).unwrap();

        let report = orch.drain(2).await.unwrap();

        assert_eq!(report.cancelled, vec!["b", "c"]);
        assert_eq!(orch.failed_ids(), vec!["a"]);
        assert_eq!(orch.completed_ids(), vec!["d"]);
        let b = orch.task("b").unwrap();
        assert_eq!(b.status, TaskStatus::Cancelled);
        assert!(b.error.as_deref().unwrap().contains("\"a\""));
    }

    #[tokio::test]
    async fn drain_reports_unschedulable_for_missing_dependency() {
        let mut orch = echo_orchestrator();
        orch.add_task(Task::new("a", "echo")).unwrap();
        orch.add_task(Task::new("b", "echo").with_dependencies(["ghost"])).unwrap();

        let err = orch.drain(2).await.unwrap_err();

        assert_eq!(
            err,
            OrchestratorError::Unschedulable {
                stuck: vec!["b".into()]
            }
        );
        // Progress made before the stall is kept.
        assert_eq!(orch.completed_ids(), vec!["a"]);
    }

    #[tokio::test]
    async fn drain_with_zero_concurrency_still_progresses() {
        let mut orch = echo_orchestrator();
        orch.add_task(Task::new("a", "echo")).unwrap();
        orch.add_task(Task::new("b", "echo")).unwrap();

        let report = orch.drain(0).await.unwrap();
        assert_eq!(report.batches, 2);
        assert_eq!(report.peak_running, 1);
    }

    #[tokio::test]
    async fn drain_on_empty_set_is_a_noop() {
        let mut orch = echo_orchestrator();
        let report = orch.drain(3).await.unwrap();
        assert_eq!(report, DrainReport::default());
        assert_eq!(orch.progress_report().progress_ratio, 0.0);
    }

    #[tokio::test]
    async fn panicking_executor_fails_only_its_task() {
        let mut orch = echo_orchestrator();
        orch.registry.register("panic", PanickingExecutor);
        orch.add_task(Task::new("a", "panic")).unwrap();
        orch.add_task(Task::new("b", "echo")).unwrap();

        orch.drain(2).await.unwrap();

        assert_eq!(orch.task("a").unwrap().status, TaskStatus::Failed);
        assert_eq!(orch.task("b").unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn cancel_pending_marks_all_pending() {
        let mut orch = echo_orchestrator();
        orch.add_task(Task::new("a", "echo")).unwrap();
        orch.add_task(Task::new("b", "echo")).unwrap();

        let cancelled = orch.cancel_pending("loop terminated");

        assert_eq!(cancelled, vec!["a", "b"]);
        let report = orch.progress_report();
        assert_eq!(report.cancelled, 2);
        assert_eq!(report.pending, 0);
        assert_eq!(
            orch.task("a").unwrap().error.as_deref(),
            Some("loop terminated")
        );
    }

    #[tokio::test]
    async fn progress_report_counts() {
        let mut orch = echo_orchestrator();
        orch.add_task(Task::new("a", "echo")).unwrap();
        orch.add_task(Task::new("b", "boom")).unwrap();
        orch.add_task(Task::new("c", "echo")).unwrap();
        orch.add_task(Task::new("d", "echo")).unwrap();

        orch.drain(4).await.unwrap();

        let report = orch.progress_report();
        assert_eq!(report.total, 4);
        assert_eq!(report.completed, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.pending + report.running, 0);
        assert!((report.progress_ratio - 0.75).abs() < 1e-9);
    }
}
