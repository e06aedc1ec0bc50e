//! The replanning collaborator invoked when an iteration needs adaptation.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::evaluation::EvaluationResult;
use crate::plan::Plan;
use crate::task::{TaskOutcome, TaskStatus};

use super::AdaptationPlan;

/// What the replanner gets to see about the iteration that triggered it.
#[derive(Debug, Clone, Copy)]
pub struct IterationFeedback<'a> {
    pub iteration_number: u32,
    pub confidence_score: f64,
    pub outcomes: &'a [TaskOutcome],
    pub evaluation: &'a EvaluationResult,
}

/// Produces the next iteration's plan from the current one.
///
/// The returned plan is validated by the controller before use. An error
/// (or an invalid plan) fails the loop.
#[async_trait]
pub trait Replanner: Send + Sync {
    async fn replan(
        &self,
        current: &Plan,
        adaptation: &AdaptationPlan,
        feedback: &IterationFeedback<'_>,
    ) -> anyhow::Result<Plan>;
}

// Compile-time assertion: Replanner must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Replanner) {}
};

/// Reruns only what did not complete.
///
/// Keeps every plan task whose outcome was not `Completed`, drops
/// dependencies on tasks that already completed, and grants each kept task
/// one more retry attempt than it had. When everything completed the plan
/// is returned unchanged.
#[derive(Debug, Clone, Copy)]
pub struct FocusFailedReplanner {
    default_retry_attempts: u32,
}

impl FocusFailedReplanner {
    /// `default_retry_attempts` is the budget assumed for tasks that do not
    /// override it (normally the orchestrator's `retry_attempts`).
    pub fn new(default_retry_attempts: u32) -> Self {
        Self {
            default_retry_attempts,
        }
    }
}

#[async_trait]
impl Replanner for FocusFailedReplanner {
    async fn replan(
        &self,
        current: &Plan,
        adaptation: &AdaptationPlan,
        feedback: &IterationFeedback<'_>,
    ) -> anyhow::Result<Plan> {
        let completed: HashSet<&str> = feedback
            .outcomes
            .iter()
            .filter(|o| o.status == TaskStatus::Completed)
            .map(|o| o.key.as_str())
            .collect();

        let keep: HashSet<&str> = current
            .tasks
            .iter()
            .map(|t| t.key.as_str())
            .filter(|k| !completed.contains(k))
            .collect();

        if keep.is_empty() {
            tracing::debug!(plan = %current.name, "all tasks completed; rerunning full plan");
            return Ok(current.clone());
        }

        let tasks = current
            .tasks
            .iter()
            .filter(|t| keep.contains(t.key.as_str()))
            .map(|t| {
                let mut task = t.clone();
                task.depends_on.retain(|dep| keep.contains(dep.as_str()));
                let budget = t.retry_attempts.unwrap_or(self.default_retry_attempts).max(1);
                task.retry_attempts = Some(budget.saturating_add(1));
                task
            })
            .collect::<Vec<_>>();

        tracing::info!(
            plan = %current.name,
            iteration = feedback.iteration_number,
            kept = tasks.len(),
            issues = adaptation.current_issues.len(),
            "replanned around unfinished tasks"
        );

        Ok(Plan {
            name: current.name.clone(),
            objectives: current.objectives.clone(),
            tasks,
        })
    }
}
