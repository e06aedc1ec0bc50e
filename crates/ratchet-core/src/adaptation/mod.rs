//! Adaptation: why an iteration needs a new plan, what should change, and
//! the [`Replanner`] collaborator that produces the next plan.

pub mod replanner;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::evaluation::{EvaluationResult, clamp_unit};

pub use replanner::{FocusFailedReplanner, IterationFeedback, Replanner};

// ---------------------------------------------------------------------------
// AdaptationReason
// ---------------------------------------------------------------------------

/// A condition that marks an iteration as needing adaptation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdaptationReason {
    /// Overall quality score below the adaptation threshold.
    LowQuality { overall_score: f64, threshold: f64 },
    /// Iteration confidence below the divergence threshold.
    Diverging { confidence: f64, threshold: f64 },
    /// Too many dispatched tasks failed.
    FailureRatio {
        failed: usize,
        dispatched: usize,
        threshold: f64,
    },
    /// The drain stopped with tasks that could never be scheduled.
    Unschedulable { stuck: usize },
}

impl AdaptationReason {
    /// Urgency used for the adaptation plan priority.
    pub fn priority(&self) -> i32 {
        match self {
            Self::Unschedulable { .. } => 3,
            Self::FailureRatio { .. } | Self::Diverging { .. } => 2,
            Self::LowQuality { .. } => 1,
        }
    }
}

impl fmt::Display for AdaptationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowQuality {
                overall_score,
                threshold,
            } => write!(
                f,
                "overall score {overall_score:.2} below adaptation threshold {threshold:.2}"
            ),
            Self::Diverging {
                confidence,
                threshold,
            } => write!(
                f,
                "confidence {confidence:.2} below divergence threshold {threshold:.2}"
            ),
            Self::FailureRatio {
                failed,
                dispatched,
                threshold,
            } => {
                let ratio = if *dispatched == 0 {
                    0.0
                } else {
                    *failed as f64 / *dispatched as f64
                };
                write!(
                    f,
                    "failure ratio {:.0}% ({failed} of {dispatched} tasks failed) exceeds {:.0}%",
                    ratio * 100.0,
                    threshold * 100.0
                )
            }
            Self::Unschedulable { stuck } => {
                write!(f, "{stuck} task(s) could not be scheduled")
            }
        }
    }
}

/// Join reasons into the iteration's `adaptation_reason` string.
pub fn describe_reasons(reasons: &[AdaptationReason]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// AdaptationPlan
// ---------------------------------------------------------------------------

/// One suggested change, addressed to a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedChange {
    pub component: String,
    pub change: String,
    pub details: String,
}

impl ProposedChange {
    fn new(
        component: impl Into<String>,
        change: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            change: change.into(),
            details: details.into(),
        }
    }
}

/// What went wrong in an iteration and what the replanner should change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationPlan {
    pub current_issues: Vec<String>,
    pub proposed_changes: Vec<ProposedChange>,
    /// Confidence gap to the target, in [0, 1].
    pub expected_impact: f64,
    pub priority: i32,
}

impl AdaptationPlan {
    /// Build a plan from the triggering reasons and the criteria that
    /// scored below the evaluation threshold.
    pub fn build(
        reasons: &[AdaptationReason],
        evaluation: &EvaluationResult,
        confidence: f64,
        target_confidence: f64,
    ) -> Self {
        let mut current_issues: Vec<String> = reasons.iter().map(ToString::to_string).collect();
        let mut proposed_changes = Vec::new();

        for reason in reasons {
            match reason {
                AdaptationReason::FailureRatio { failed, .. } => {
                    proposed_changes.push(ProposedChange::new(
                        "orchestrator",
                        "retry_failed_tasks",
                        format!("rerun the {failed} failed task(s) with a larger retry budget"),
                    ));
                }
                AdaptationReason::Unschedulable { stuck } => {
                    proposed_changes.push(ProposedChange::new(
                        "plan",
                        "repair_dependencies",
                        format!("{stuck} task(s) wait on dependencies that can never complete"),
                    ));
                }
                AdaptationReason::Diverging { confidence, .. } => {
                    proposed_changes.push(ProposedChange::new(
                        "executors",
                        "increase_result_confidence",
                        format!("iteration confidence fell to {confidence:.2}"),
                    ));
                }
                AdaptationReason::LowQuality { .. } => {}
            }
        }

        for (name, recommendation) in evaluation
            .weak_criteria
            .iter()
            .zip(evaluation.recommendations.iter())
        {
            let score = evaluation.scores.get(name).copied().unwrap_or(0.0);
            current_issues.push(format!("criterion {name} scored {score:.2}"));
            proposed_changes.push(ProposedChange::new(
                format!("criterion:{name}"),
                "improve_quality",
                recommendation.clone(),
            ));
        }

        Self {
            current_issues,
            proposed_changes,
            expected_impact: clamp_unit(target_confidence - confidence),
            priority: reasons.iter().map(AdaptationReason::priority).max().unwrap_or(0),
        }
    }
}
