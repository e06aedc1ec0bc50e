//! Plan TOML parser with validation.
//!
//! Parses a `plan.toml` string into a [`Plan`] and validates:
//! - The plan has at least one task.
//! - Task keys are non-empty and unique.
//! - `depends_on` references point to existing keys, never the task itself.
//! - Timeouts and retry budgets are non-zero when given.
//! - The dependency graph is acyclic (Kahn's algorithm).

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use super::toml_format::{PlanToml, TaskToml};
use super::{Plan, TaskSpec};

/// Errors that can occur during plan parsing and validation.
#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("plan must contain at least one task")]
    NoTasks,

    #[error("task key must not be empty")]
    EmptyKey,

    #[error("duplicate task key: {0:?}")]
    DuplicateTaskKey(String),

    #[error("task {task:?} depends on unknown task {dependency:?}")]
    UnknownDependency { task: String, dependency: String },

    #[error("task {0:?} depends on itself")]
    SelfDependency(String),

    #[error("invalid {field} on task {task:?}: {reason}")]
    InvalidField {
        task: String,
        field: &'static str,
        reason: String,
    },

    #[error("dependency cycle detected involving tasks: {0}")]
    CycleDetected(String),
}

/// Parse and validate a `plan.toml` string.
pub fn parse_plan_toml(content: &str) -> Result<Plan, PlanParseError> {
    let raw: PlanToml = toml::from_str(content)?;
    let plan = Plan {
        name: raw.plan.name,
        objectives: raw.plan.objectives,
        tasks: raw.tasks.into_iter().map(task_from_toml).collect(),
    };
    validate(&plan)?;
    Ok(plan)
}

fn task_from_toml(raw: TaskToml) -> TaskSpec {
    TaskSpec {
        name: raw.name.unwrap_or_else(|| raw.key.clone()),
        key: raw.key,
        description: raw.description,
        capability: raw.capability,
        depends_on: raw.depends_on,
        priority: raw.priority,
        objectives: raw.objectives,
        timeout: raw.timeout_secs.map(Duration::from_secs),
        retry_attempts: raw.retry_attempts,
        input: raw.input.unwrap_or(Value::Null),
    }
}

/// Validate plan structure. Shared by the parser and [`Plan::validate`].
pub(crate) fn validate(plan: &Plan) -> Result<(), PlanParseError> {
    if plan.tasks.is_empty() {
        return Err(PlanParseError::NoTasks);
    }

    let mut seen = HashSet::new();
    for task in &plan.tasks {
        if task.key.trim().is_empty() {
            return Err(PlanParseError::EmptyKey);
        }
        if !seen.insert(task.key.as_str()) {
            return Err(PlanParseError::DuplicateTaskKey(task.key.clone()));
        }
    }

    for task in &plan.tasks {
        if task.capability.trim().is_empty() {
            return Err(PlanParseError::InvalidField {
                task: task.key.clone(),
                field: "capability",
                reason: "must not be empty".to_string(),
            });
        }
        if task.timeout.is_some_and(|t| t.is_zero()) {
            return Err(PlanParseError::InvalidField {
                task: task.key.clone(),
                field: "timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if task.retry_attempts == Some(0) {
            return Err(PlanParseError::InvalidField {
                task: task.key.clone(),
                field: "retry_attempts",
                reason: "must be at least 1".to_string(),
            });
        }

        for dep in &task.depends_on {
            if dep == &task.key {
                return Err(PlanParseError::SelfDependency(task.key.clone()));
            }
            if !seen.contains(dep.as_str()) {
                return Err(PlanParseError::UnknownDependency {
                    task: task.key.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    topological_order(plan).map(|_| ())
}

/// Order task indices so every task comes after its dependencies.
///
/// Uses Kahn's algorithm. Among tasks that are ready at the same time the
/// order is `(priority desc, key asc)`, matching the orchestrator's ready
/// ordering. Assumes keys are unique and dependencies known.
pub(crate) fn topological_order(plan: &Plan) -> Result<Vec<usize>, PlanParseError> {
    let key_to_idx: HashMap<&str, usize> = plan
        .tasks
        .iter()
        .enumerate()
        .map(|(i, t)| (t.key.as_str(), i))
        .collect();

    let n = plan.tasks.len();
    let mut in_degree = vec![0usize; n];
    let mut adj: Vec<Vec<usize>> = vec![vec![]; n];

    for (task_idx, task) in plan.tasks.iter().enumerate() {
        for dep in &task.depends_on {
            let Some(&dep_idx) = key_to_idx.get(dep.as_str()) else {
                return Err(PlanParseError::UnknownDependency {
                    task: task.key.clone(),
                    dependency: dep.clone(),
                });
            };
            // Edge: dep -> task.
            adj[dep_idx].push(task_idx);
            in_degree[task_idx] += 1;
        }
    }

    let mut ready: Vec<usize> = (0..n).filter(|i| in_degree[*i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while !ready.is_empty() {
        ready.sort_by(|a, b| {
            let (ta, tb) = (&plan.tasks[*a], &plan.tasks[*b]);
            tb.priority
                .cmp(&ta.priority)
                .then_with(|| ta.key.cmp(&tb.key))
        });
        let node = ready.remove(0);
        order.push(node);
        for &neighbor in &adj[node] {
            in_degree[neighbor] -= 1;
            if in_degree[neighbor] == 0 {
                ready.push(neighbor);
            }
        }
    }

    if order.len() != n {
        let cycle_tasks: Vec<&str> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, deg)| **deg > 0)
            .map(|(i, _)| plan.tasks[i].key.as_str())
            .collect();
        return Err(PlanParseError::CycleDetected(cycle_tasks.join(", ")));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_plan() {
        let toml_str = r#"
[plan]
name = "research"
objectives = ["sources", "summary"]

[[tasks]]
key = "collect"
capability = "shell"
objectives = ["sources"]
input = { command = "echo", args = ["hi"] }

[[tasks]]
key = "summarise"
name = "Summarise findings"
capability = "echo"
depends_on = ["collect"]
timeout_secs = 10
objectives = ["summary"]
"#;
        let plan = parse_plan_toml(toml_str).expect("should parse");
        assert_eq!(plan.name, "research");
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[0].name, "collect");
        assert_eq!(plan.tasks[0].input["command"], "echo");
        assert_eq!(plan.tasks[1].name, "Summarise findings");
        assert_eq!(plan.tasks[1].timeout, Some(Duration::from_secs(10)));
        assert_eq!(plan.tasks[1].input, Value::Null);
    }

    #[test]
    fn rejects_plan_without_tasks() {
        let err = parse_plan_toml("[plan]\nname = \"empty\"\n").unwrap_err();
        assert!(matches!(err, PlanParseError::NoTasks));
    }

    #[test]
    fn rejects_duplicate_keys() {
        let toml_str = r#"
[plan]
name = "dup"

[[tasks]]
key = "a"
capability = "echo"

[[tasks]]
key = "a"
capability = "echo"
"#;
        let err = parse_plan_toml(toml_str).unwrap_err();
        assert!(matches!(err, PlanParseError::DuplicateTaskKey(ref k) if k == "a"));
    }

    #[test]
    fn rejects_unknown_dependency() {
        let toml_str = r#"
[plan]
name = "unknown"

[[tasks]]
key = "a"
capability = "echo"
depends_on = ["ghost"]
"#;
        let err = parse_plan_toml(toml_str).unwrap_err();
        assert!(matches!(
            err,
            PlanParseError::UnknownDependency { ref task, ref dependency }
                if task == "a" && dependency == "ghost"
        ));
    }

    #[test]
    fn rejects_self_dependency() {
        let toml_str = r#"
[plan]
name = "self"

[[tasks]]
key = "a"
capability = "echo"
depends_on = ["a"]
"#;
        let err = parse_plan_toml(toml_str).unwrap_err();
        assert!(matches!(err, PlanParseError::SelfDependency(ref k) if k == "a"));
    }

    #[test]
    fn rejects_zero_retry_attempts() {
        let toml_str = r#"
[plan]
name = "zero"

[[tasks]]
key = "a"
capability = "echo"
retry_attempts = 0
"#;
        let err = parse_plan_toml(toml_str).unwrap_err();
        assert!(matches!(
            err,
            PlanParseError::InvalidField { field: "retry_attempts", .. }
        ));
    }

    #[test]
    fn rejects_cycle() {
        let toml_str = r#"
[plan]
name = "cycle"

[[tasks]]
key = "a"
capability = "echo"
depends_on = ["c"]

[[tasks]]
key = "b"
capability = "echo"
depends_on = ["a"]

[[tasks]]
key = "c"
capability = "echo"
depends_on = ["b"]

[[tasks]]
key = "free"
capability = "echo"
"#;
        let err = parse_plan_toml(toml_str).unwrap_err();
        match err {
            PlanParseError::CycleDetected(names) => {
                assert!(names.contains('a'));
                assert!(names.contains('b'));
                assert!(names.contains('c'));
                assert!(!names.contains("free"));
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn topological_order_respects_priority_among_ready() {
        let toml_str = r#"
[plan]
name = "order"

[[tasks]]
key = "z"
capability = "echo"

[[tasks]]
key = "urgent"
capability = "echo"
priority = 9

[[tasks]]
key = "after-z"
capability = "echo"
depends_on = ["z"]
priority = 100

[[tasks]]
key = "a"
capability = "echo"
"#;
        let plan = parse_plan_toml(toml_str).unwrap();
        let keys: Vec<&str> = topological_order(&plan)
            .unwrap()
            .into_iter()
            .map(|i| plan.tasks[i].key.as_str())
            .collect();
        assert_eq!(keys, vec!["urgent", "a", "z", "after-z"]);
    }
}
