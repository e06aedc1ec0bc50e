//! The per-iteration decision: stop, adapt, or run the same plan again.
//!
//! Pure: no I/O, no controller state. Stop conditions are checked first;
//! adaptation reasons are collected regardless so the iteration record
//! always says whether adaptation was warranted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::adaptation::AdaptationReason;

use super::LoopConfig;

/// Why the loop converged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    ConfidenceReached,
    QualityReached,
    ObjectivesComplete,
    IterationCeiling,
    Terminated,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ConfidenceReached => "target confidence reached",
            Self::QualityReached => "evaluation threshold reached",
            Self::ObjectivesComplete => "all objectives complete",
            Self::IterationCeiling => "iteration ceiling reached",
            Self::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Figures the decision is made from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionInput {
    pub iteration_number: u32,
    pub confidence_score: f64,
    /// Overall quality score; `None` when quality control is off.
    pub overall_score: Option<f64>,
    pub dispatched: usize,
    pub failed: usize,
    /// Number of unschedulable tasks when the drain stalled.
    pub stuck: Option<usize>,
    /// Every tracked objective has been satisfied in some iteration.
    pub objectives_complete: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub stop: Option<StopReason>,
    /// Empty when no adaptation is warranted.
    pub adaptation: Vec<AdaptationReason>,
}

impl Decision {
    pub fn adaptation_needed(&self) -> bool {
        !self.adaptation.is_empty()
    }
}

/// Decide what follows iteration `input.iteration_number`.
///
/// `max_iterations` is the effective ceiling (lowered on terminate). A
/// stalled iteration never converges on confidence or quality.
pub fn decide(input: &DecisionInput, config: &LoopConfig, max_iterations: u32) -> Decision {
    let stalled = input.stuck.is_some();

    let stop = if !stalled && input.confidence_score >= config.target_confidence_score {
        Some(StopReason::ConfidenceReached)
    } else if !stalled
        && input
            .overall_score
            .is_some_and(|score| score >= config.evaluation_threshold)
    {
        Some(StopReason::QualityReached)
    } else if input.objectives_complete {
        Some(StopReason::ObjectivesComplete)
    } else if input.iteration_number >= max_iterations.saturating_sub(1) {
        Some(StopReason::IterationCeiling)
    } else {
        None
    };

    let mut adaptation = Vec::new();
    if let Some(stuck) = input.stuck {
        adaptation.push(AdaptationReason::Unschedulable { stuck });
    }
    if let Some(score) = input.overall_score {
        if score < config.adaptation_threshold {
            adaptation.push(AdaptationReason::LowQuality {
                overall_score: score,
                threshold: config.adaptation_threshold,
            });
        }
    }
    if input.confidence_score < config.divergence_threshold {
        adaptation.push(AdaptationReason::Diverging {
            confidence: input.confidence_score,
            threshold: config.divergence_threshold,
        });
    }
    if input.dispatched > 0
        && input.failed as f64 / input.dispatched as f64 > config.failure_ratio_threshold
    {
        adaptation.push(AdaptationReason::FailureRatio {
            failed: input.failed,
            dispatched: input.dispatched,
            threshold: config.failure_ratio_threshold,
        });
    }

    Decision { stop, adaptation }
}
