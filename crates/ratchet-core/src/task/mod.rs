//! The unit-of-work record scheduled by the orchestrator.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unique, immutable task identifier.
pub type TaskId = String;

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// `Completed`, `Failed` and `Cancelled` are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------
// TaskResult
// ---------------------------------------------------------------------------

/// Payload stored on a task when it completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Opaque executor output.
    pub data: Value,
    /// Self-reported confidence in [0, 1], if the executor gave one.
    pub confidence: Option<f64>,
    /// Objective ids the executor reported as satisfied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objectives: Vec<String>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A schedulable unit of work with declared dependencies.
///
/// `result` and `error` are written exactly once, on the terminal
/// transition. Status changes go through
/// [`crate::state::TaskStateMachine`], which also stamps the timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: String,
    /// Name of the executor capability required to run this task.
    pub capability: String,
    /// Ids that must reach `Completed` before this task is eligible.
    pub dependencies: BTreeSet<TaskId>,
    /// Tie-break among ready tasks; higher runs first.
    pub priority: i32,
    pub status: TaskStatus,
    pub input: Value,
    /// Objectives this task satisfies when it completes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objectives: Vec<String>,
    /// Per-task override of the orchestrator timeout.
    #[serde(default, with = "crate::durations::opt_secs", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Per-task override of the orchestrator retry budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
    /// Executor invocations consumed so far.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending task bound to `capability`.
    pub fn new(id: impl Into<TaskId>, capability: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            capability: capability.into(),
            dependencies: BTreeSet::new(),
            priority: 0,
            status: TaskStatus::Pending,
            input: Value::Null,
            objectives: Vec::new(),
            timeout: None,
            retry_attempts: None,
            result: None,
            error: None,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
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

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = Some(attempts);
        self
    }

    /// Self-reported confidence of the stored result, if any.
    pub fn confidence(&self) -> Option<f64> {
        self.result.as_ref().and_then(|r| r.confidence)
    }

    /// Wall time between start and terminal transition.
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.started_at?)
    }
}

// ---------------------------------------------------------------------------
// TaskOutcome
// ---------------------------------------------------------------------------

/// Snapshot of a task after an iteration's drain, keyed back to its plan
/// entry. This is what iteration history and quality criteria see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    /// Plan key the task was materialised from.
    pub key: String,
    pub name: String,
    pub capability: String,
    pub status: TaskStatus,
    pub data: Value,
    pub confidence: Option<f64>,
    pub error: Option<String>,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Objectives satisfied: the task's own plus any the executor reported.
    /// Empty unless the task completed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objectives: Vec<String>,
}

impl TaskOutcome {
    pub fn from_task(task: &Task, key: impl Into<String>) -> Self {
        let (data, confidence, mut objectives) = match (&task.result, task.status) {
            (Some(result), TaskStatus::Completed) => {
                let mut objectives = task.objectives.clone();
                objectives.extend(result.objectives.iter().cloned());
                (result.data.clone(), result.confidence, objectives)
            }
            _ => (Value::Null, None, Vec::new()),
        };
        objectives.sort();
        objectives.dedup();

        Self {
            task_id: task.id.clone(),
            key: key.into(),
            name: task.name.clone(),
            capability: task.capability.clone(),
            status: task.status,
            data,
            confidence,
            error: task.error.clone(),
            attempts: task.attempts,
            started_at: task.started_at,
            completed_at: task.completed_at,
            objectives,
        }
    }

    /// The task was handed to an executor (or failed trying).
    pub fn was_dispatched(&self) -> bool {
        self.started_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_roundtrips_through_from_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.to_string().parse::<TaskStatus>().unwrap(), status);
        }
    }

    #[test]
    fn status_parse_rejects_unknown() {
        let err = "exploded".parse::<TaskStatus>().unwrap_err();
        assert_eq!(err.to_string(), "invalid task status: \"exploded\"");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn builder_sets_fields() {
        let task = Task::new("b", "search")
            .with_name("Search")
            .with_dependencies(["a"])
            .with_priority(3)
            .with_input(serde_json::json!({"q": "rust"}))
            .with_retry_attempts(5);

        assert_eq!(task.id, "b");
        assert_eq!(task.name, "Search");
        assert_eq!(task.capability, "search");
        assert!(task.dependencies.contains("a"));
        assert_eq!(task.priority, 3);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_attempts, Some(5));
        assert!(task.result.is_none());
        assert!(task.duration().is_none());
    }

    #[test]
    fn outcome_merges_objectives_of_completed_task() {
        let mut task = Task::new("i0/a", "echo").with_objectives(["x", "y"]);
        task.status = TaskStatus::Completed;
        task.started_at = Some(Utc::now());
        task.result = Some(TaskResult {
            data: serde_json::json!(1),
            confidence: Some(0.9),
            objectives: vec!["y".into(), "z".into()],
        });

        let outcome = TaskOutcome::from_task(&task, "a");
        assert_eq!(outcome.key, "a");
        assert_eq!(outcome.objectives, vec!["x", "y", "z"]);
        assert_eq!(outcome.confidence, Some(0.9));
        assert!(outcome.was_dispatched());
    }

    #[test]
    fn outcome_of_failed_task_has_no_objectives() {
        let mut task = Task::new("i0/a", "echo").with_objectives(["x"]);
        task.status = TaskStatus::Failed;
        task.error = Some("boom".into());

        let outcome = TaskOutcome::from_task(&task, "a");
        assert!(outcome.objectives.is_empty());
        assert_eq!(outcome.error.as_deref(), Some("boom"));
        assert!(!outcome.was_dispatched());
    }

    #[test]
    fn task_serializes_status_snake_case() {
        let task = Task::new("a", "echo");
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["status"], "pending");
        assert!(json.get("timeout").is_none());
    }
}
