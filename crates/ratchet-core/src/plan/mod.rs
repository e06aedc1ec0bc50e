//! Plans: the task set the loop controller executes each iteration and the
//! replanner rewrites on adaptation.
//!
//! A plan refers to tasks by *key*. Each iteration materialises the plan
//! into fresh [`Task`]s with iteration-scoped ids (`i{n}/{key}`), so a
//! replanned task is always a new task and never a reset of an old one.

pub mod parser;
pub mod toml_format;

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::{Task, TaskId};

pub use parser::{PlanParseError, parse_plan_toml};

/// One task template within a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub capability: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default, with = "crate::durations::opt_secs", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    #[serde(default)]
    pub input: Value,
}

impl TaskSpec {
    pub fn new(key: impl Into<String>, capability: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            description: String::new(),
            capability: capability.into(),
            depends_on: Vec::new(),
            priority: 0,
            objectives: Vec::new(),
            timeout: None,
            retry_attempts: None,
            input: Value::Null,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_depends_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
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

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
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
}

/// A named set of task templates plus the objectives the loop tracks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    /// Objective ids that must all be satisfied for objective convergence.
    /// An empty list never triggers that stop condition.
    #[serde(default)]
    pub objectives: Vec<String>,
    pub tasks: Vec<TaskSpec>,
}

impl Plan {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objectives: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn with_objectives<I, S>(mut self, objectives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.objectives = objectives.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_task(mut self, task: TaskSpec) -> Self {
        self.tasks.push(task);
        self
    }

    /// Parse and validate a plan from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, PlanParseError> {
        parse_plan_toml(content)
    }

    /// Structural validation: non-empty, unique keys, known dependencies,
    /// no self-dependency, no cycle.
    pub fn validate(&self) -> Result<(), PlanParseError> {
        parser::validate(self)
    }

    pub fn task(&self, key: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.key == key)
    }

    /// Tasks in an order where dependencies come first, ties broken by
    /// `(priority desc, key asc)`.
    pub fn ready_order(&self) -> Result<Vec<&TaskSpec>, PlanParseError> {
        let order = parser::topological_order(self)?;
        Ok(order.into_iter().map(|i| &self.tasks[i]).collect())
    }

    /// Tracked objectives, deduplicated.
    pub fn tracked_objectives(&self) -> HashSet<&str> {
        self.objectives.iter().map(String::as_str).collect()
    }

    /// Id a task with `key` gets in iteration `iteration`.
    pub fn task_id(iteration: u32, key: &str) -> TaskId {
        format!("i{iteration}/{key}")
    }

    /// Fresh pending tasks for iteration `iteration`, in plan order.
    pub fn materialize(&self, iteration: u32) -> Vec<Task> {
        self.tasks
            .iter()
            .map(|spec| {
                let mut task = Task::new(Self::task_id(iteration, &spec.key), spec.capability.clone())
                    .with_name(spec.name.clone())
                    .with_description(spec.description.clone())
                    .with_dependencies(spec.depends_on.iter().map(|dep| Self::task_id(iteration, dep)))
                    .with_priority(spec.priority)
                    .with_input(spec.input.clone())
                    .with_objectives(spec.objectives.iter().cloned());
                task.timeout = spec.timeout;
                task.retry_attempts = spec.retry_attempts;
                task
            })
            .collect()
    }
}
