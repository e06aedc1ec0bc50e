//! Loop controller configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::orchestrator::OrchestratorConfig;

/// Configuration for the adaptive loop.
///
/// Every field has a default, so a partial TOML table is valid. Tables
/// (`criterion_weights`, `orchestrator`) come last so the struct
/// serializes back to TOML cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Hard ceiling on iterations.
    pub max_iterations: u32,
    /// Stop once an iteration's confidence reaches this.
    pub target_confidence_score: f64,
    /// Stop once the overall quality score reaches this.
    pub evaluation_threshold: f64,
    /// Adapt when the overall quality score falls below this.
    pub adaptation_threshold: f64,
    /// Adapt when iteration confidence falls below this.
    pub divergence_threshold: f64,
    /// Adapt when more than this share of dispatched tasks failed.
    pub failure_ratio_threshold: f64,
    /// Pause between iterations.
    #[serde(rename = "iteration_delay_ms", with = "crate::durations::millis")]
    pub iteration_delay: Duration,
    /// Call the replanner when adaptation is needed. When off, the loop
    /// reruns the same plan.
    pub enable_adaptive_learning: bool,
    /// Score iterations against quality criteria. When off, the overall
    /// score is the iteration confidence and the quality stop is skipped.
    pub enable_quality_control: bool,
    /// Criterion name to weight; missing criteria weigh 1.
    pub criterion_weights: BTreeMap<String, f64>,
    pub orchestrator: OrchestratorConfig,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            target_confidence_score: 0.85,
            evaluation_threshold: 0.8,
            adaptation_threshold: 0.6,
            divergence_threshold: 0.3,
            failure_ratio_threshold: 0.3,
            iteration_delay: Duration::ZERO,
            enable_adaptive_learning: true,
            enable_quality_control: true,
            criterion_weights: BTreeMap::new(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

impl LoopConfig {
    /// Reject configurations the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            bail!("max_iterations must be at least 1");
        }
        if self.orchestrator.max_concurrent_tasks == 0 {
            bail!("max_concurrent_tasks must be at least 1");
        }
        if self.orchestrator.retry_attempts == 0 {
            bail!("retry_attempts must be at least 1");
        }
        if self.orchestrator.task_timeout.is_zero() {
            bail!("task_timeout_secs must be greater than zero");
        }

        for (name, value) in [
            ("target_confidence_score", self.target_confidence_score),
            ("evaluation_threshold", self.evaluation_threshold),
            ("adaptation_threshold", self.adaptation_threshold),
            ("divergence_threshold", self.divergence_threshold),
            ("failure_ratio_threshold", self.failure_ratio_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("{name} must be within [0, 1], got {value}");
            }
        }

        for (name, weight) in &self.criterion_weights {
            if !weight.is_finite() || *weight < 0.0 {
                bail!("weight for criterion {name:?} must be a non-negative number, got {weight}");
            }
        }

        Ok(())
    }
}
