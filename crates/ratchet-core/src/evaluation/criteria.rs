//! Built-in quality criteria.

use super::{EvaluationContext, QualityCriterion};

/// Share of dispatched tasks that completed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuccessRateCriterion;

impl QualityCriterion for SuccessRateCriterion {
    fn name(&self) -> &str {
        "success_rate"
    }

    fn score(&self, ctx: &EvaluationContext<'_>) -> f64 {
        ctx.success_rate
    }

    fn recommendation(&self, score: f64) -> String {
        format!(
            "only {:.0}% of dispatched tasks completed; retry or repair failing tasks",
            score * 100.0
        )
    }
}

/// Mean self-reported confidence of completed results.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultConfidenceCriterion;

impl QualityCriterion for ResultConfidenceCriterion {
    fn name(&self) -> &str {
        "result_confidence"
    }

    fn score(&self, ctx: &EvaluationContext<'_>) -> f64 {
        ctx.mean_result_confidence
    }

    fn recommendation(&self, score: f64) -> String {
        format!("executors report low confidence ({score:.2}); refine task inputs")
    }
}

/// Adapts a closure into a [`QualityCriterion`].
pub struct FnCriterion {
    name: String,
    f: Box<dyn Fn(&EvaluationContext<'_>) -> f64 + Send + Sync>,
}

impl FnCriterion {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&EvaluationContext<'_>) -> f64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

impl std::fmt::Debug for FnCriterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCriterion")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl QualityCriterion for FnCriterion {
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, ctx: &EvaluationContext<'_>) -> f64 {
        (self.f)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    #[test]
    fn builtins_read_context_fields() {
        let objectives = BTreeSet::new();
        let mut ctx = EvaluationContext::from_outcomes(0, &[], &objectives, false);
        ctx.success_rate = 0.4;
        ctx.mean_result_confidence = 0.9;

        assert_eq!(SuccessRateCriterion.score(&ctx), 0.4);
        assert_eq!(ResultConfidenceCriterion.score(&ctx), 0.9);
        assert!(SuccessRateCriterion.recommendation(0.4).contains("40%"));
    }

    #[test]
    fn fn_criterion_uses_closure() {
        let criterion = FnCriterion::new("objectives", |ctx| ctx.completed_objectives.len() as f64);
        let objectives: BTreeSet<String> = ["a".to_string()].into();
        let ctx = EvaluationContext::from_outcomes(0, &[], &objectives, false);

        assert_eq!(criterion.name(), "objectives");
        assert_eq!(criterion.score(&ctx), 1.0);
        assert!(criterion.recommendation(0.1).contains("objectives"));
    }
}
