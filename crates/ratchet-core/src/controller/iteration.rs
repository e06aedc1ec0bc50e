//! Iteration history records.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adaptation::AdaptationPlan;
use crate::evaluation::EvaluationResult;
use crate::task::{TaskId, TaskOutcome};

use super::decision::StopReason;

/// What the controller did after an iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum IterationDecision {
    /// The loop converged or hit its ceiling.
    Stop { reason: StopReason },
    /// A new plan was requested from the replanner.
    Adapt,
    /// The same plan runs again.
    Continue,
    /// The loop failed (replanner error or invalid replanned plan).
    Abort,
}

/// One pass of plan, execute, evaluate and decide.
///
/// Appended to history when the iteration ends and never changed after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchIteration {
    pub iteration_number: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Ids of tasks handed to an executor, in dispatch order.
    pub tasks_run: Vec<TaskId>,
    /// Outcome of every task materialised this iteration, in plan order.
    pub results: Vec<TaskOutcome>,
    pub confidence_score: f64,
    pub completed_objectives: BTreeSet<String>,
    pub adaptation_needed: bool,
    /// Reasons joined with `"; "`; empty when no adaptation was needed.
    pub adaptation_reason: String,
    pub evaluation: EvaluationResult,
    /// Present when the replanner was invoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adaptation: Option<AdaptationPlan>,
    /// Tasks left unschedulable when the drain stalled.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stuck: Vec<TaskId>,
    pub decision: IterationDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResearchIteration {
    /// The drain stalled or the loop failed during this iteration.
    pub fn is_failed(&self) -> bool {
        !self.stuck.is_empty() || self.error.is_some()
    }
}
