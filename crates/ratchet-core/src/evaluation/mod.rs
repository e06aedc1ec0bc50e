//! Iteration scoring: confidence from task outcomes, quality from pluggable
//! criteria, aggregated into an [`EvaluationResult`].
//!
//! The controller only aggregates. What a criterion measures is up to the
//! caller; the built-ins in [`criteria`] cover the case where the caller
//! has no domain criteria of its own.

pub mod criteria;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::task::{TaskOutcome, TaskStatus};

pub use criteria::{FnCriterion, ResultConfidenceCriterion, SuccessRateCriterion};

/// Weight of the success rate in the iteration confidence.
pub const SUCCESS_RATE_WEIGHT: f64 = 0.6;
/// Weight of the mean result confidence in the iteration confidence.
pub const RESULT_CONFIDENCE_WEIGHT: f64 = 0.4;
/// Confidence assumed for a completed result that reported none.
pub const DEFAULT_RESULT_CONFIDENCE: f64 = 0.5;

/// Clamp to [0, 1]; NaN becomes 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// EvaluationContext
// ---------------------------------------------------------------------------

/// Everything a criterion may look at for one iteration.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub iteration_number: u32,
    pub outcomes: &'a [TaskOutcome],
    /// Tasks handed to an executor this iteration.
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    /// `completed / dispatched`, 0 when nothing was dispatched.
    pub success_rate: f64,
    /// Mean self-reported confidence over completed results.
    pub mean_result_confidence: f64,
    /// `0.6 * success_rate + 0.4 * mean_result_confidence`, or 0 if stalled.
    pub confidence_score: f64,
    /// Objectives satisfied this iteration.
    pub completed_objectives: &'a BTreeSet<String>,
    /// The drain stopped on an unschedulable queue.
    pub stalled: bool,
}

impl<'a> EvaluationContext<'a> {
    /// Derive the iteration statistics from its task outcomes.
    ///
    /// Only dispatched tasks count toward the rates; tasks cancelled before
    /// they started are ignored. A result without a confidence counts as
    /// [`DEFAULT_RESULT_CONFIDENCE`].
    pub fn from_outcomes(
        iteration_number: u32,
        outcomes: &'a [TaskOutcome],
        completed_objectives: &'a BTreeSet<String>,
        stalled: bool,
    ) -> Self {
        let dispatched = outcomes.iter().filter(|o| o.was_dispatched()).count();
        let completed: Vec<&TaskOutcome> = outcomes
            .iter()
            .filter(|o| o.status == TaskStatus::Completed)
            .collect();
        let failed = outcomes
            .iter()
            .filter(|o| o.was_dispatched() && o.status == TaskStatus::Failed)
            .count();

        let success_rate = if dispatched == 0 {
            0.0
        } else {
            clamp_unit(completed.len() as f64 / dispatched as f64)
        };

        let mean_result_confidence = if completed.is_empty() {
            0.0
        } else {
            let sum: f64 = completed
                .iter()
                .map(|o| clamp_unit(o.confidence.unwrap_or(DEFAULT_RESULT_CONFIDENCE)))
                .sum();
            clamp_unit(sum / completed.len() as f64)
        };

        let confidence_score = if stalled {
            0.0
        } else {
            clamp_unit(
                SUCCESS_RATE_WEIGHT * success_rate
                    + RESULT_CONFIDENCE_WEIGHT * mean_result_confidence,
            )
        };

        Self {
            iteration_number,
            outcomes,
            dispatched,
            completed: completed.len(),
            failed,
            success_rate,
            mean_result_confidence,
            confidence_score,
            completed_objectives,
            stalled,
        }
    }

    /// `failed / dispatched`, 0 when nothing was dispatched.
    pub fn failure_ratio(&self) -> f64 {
        if self.dispatched == 0 {
            0.0
        } else {
            self.failed as f64 / self.dispatched as f64
        }
    }
}

// ---------------------------------------------------------------------------
// QualityCriterion
// ---------------------------------------------------------------------------

/// A named quality measure scored per iteration.
///
/// Scores outside [0, 1] (and NaN) are clamped by the [`Evaluator`].
pub trait QualityCriterion: Send + Sync {
    fn name(&self) -> &str;

    fn score(&self, ctx: &EvaluationContext<'_>) -> f64;

    /// Suggestion recorded when this criterion scores below the
    /// evaluation threshold.
    fn recommendation(&self, score: f64) -> String {
        format!("improve {} (scored {:.2})", self.name(), score)
    }
}

// Compile-time assertion: QualityCriterion must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn QualityCriterion) {}
};

// ---------------------------------------------------------------------------
// EvaluationResult
// ---------------------------------------------------------------------------

/// Aggregated verdict for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Criterion name to clamped score.
    pub scores: BTreeMap<String, f64>,
    pub overall_score: f64,
    pub needs_adaptation: bool,
    /// Lowest-scoring criterion first.
    pub recommendations: Vec<String>,
    /// Criteria that scored below the evaluation threshold, lowest first.
    pub weak_criteria: Vec<String>,
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Scores an iteration against a set of criteria.
///
/// `overall_score` is the weighted mean of the criterion scores, with a
/// missing weight counting as 1 (so no weights at all gives the arithmetic
/// mean). With no criteria the overall score is the iteration confidence.
pub struct Evaluator {
    criteria: Vec<Box<dyn QualityCriterion>>,
    weights: HashMap<String, f64>,
    evaluation_threshold: f64,
    adaptation_threshold: f64,
}

impl Evaluator {
    pub fn new(evaluation_threshold: f64, adaptation_threshold: f64) -> Self {
        Self {
            criteria: Vec::new(),
            weights: HashMap::new(),
            evaluation_threshold,
            adaptation_threshold,
        }
    }

    pub fn with_criterion(mut self, criterion: impl QualityCriterion + 'static) -> Self {
        self.add_criterion(Box::new(criterion));
        self
    }

    pub fn with_weights(mut self, weights: HashMap<String, f64>) -> Self {
        self.weights = weights;
        self
    }

    pub fn add_criterion(&mut self, criterion: Box<dyn QualityCriterion>) {
        self.criteria.push(criterion);
    }

    pub fn criterion_names(&self) -> Vec<&str> {
        self.criteria.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> EvaluationResult {
        let mut scores = BTreeMap::new();
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;
        let mut weak: Vec<(f64, &dyn QualityCriterion)> = Vec::new();

        for criterion in &self.criteria {
            let score = clamp_unit(criterion.score(ctx));
            let weight = self
                .weights
                .get(criterion.name())
                .copied()
                .filter(|w| w.is_finite() && *w >= 0.0)
                .unwrap_or(1.0);

            weighted_sum += weight * score;
            total_weight += weight;
            scores.insert(criterion.name().to_string(), score);

            if score < self.evaluation_threshold {
                weak.push((score, criterion.as_ref()));
            }
        }

        let overall_score = if self.criteria.is_empty() {
            ctx.confidence_score
        } else if total_weight > 0.0 {
            clamp_unit(weighted_sum / total_weight)
        } else {
            0.0
        };

        weak.sort_by(|a, b| a.0.total_cmp(&b.0));

        EvaluationResult {
            scores,
            overall_score,
            needs_adaptation: overall_score < self.adaptation_threshold,
            recommendations: weak
                .iter()
                .map(|(score, c)| c.recommendation(*score))
                .collect(),
            weak_criteria: weak.iter().map(|(_, c)| c.name().to_string()).collect(),
        }
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("criteria", &self.criterion_names())
            .field("weights", &self.weights)
            .field("evaluation_threshold", &self.evaluation_threshold)
            .field("adaptation_threshold", &self.adaptation_threshold)
            .finish()
    }
}
