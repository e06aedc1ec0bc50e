//! Cumulative loop statistics.
//!
//! Updated incrementally once per finished iteration from that iteration's
//! data only; never recomputed from history.

use serde::{Deserialize, Serialize};

use crate::evaluation::clamp_unit;

/// Per-iteration figures folded into [`LoopMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IterationSample {
    /// Tasks handed to an executor.
    pub tasks_run: usize,
    pub successes: usize,
    pub failures: usize,
    pub confidence: f64,
    /// The iteration stalled or its replan failed.
    pub failed: bool,
    /// The iteration ended with an adaptation.
    pub adapted: bool,
}

/// Totals and running averages over all finished iterations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoopMetrics {
    pub total_iterations: u32,
    pub completed_iterations: u32,
    pub failed_iterations: u32,
    pub total_tasks_run: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Running mean of iteration confidence.
    pub average_confidence: f64,
    pub adaptation_count: u32,
    /// `total_successes / total_tasks_run`.
    pub success_rate: f64,
    /// `success_rate * average_confidence`.
    pub efficiency: f64,
}

impl LoopMetrics {
    /// Fold one iteration into the totals.
    pub fn record_iteration(&mut self, sample: IterationSample) {
        self.total_iterations += 1;
        if sample.failed {
            self.failed_iterations += 1;
        } else {
            self.completed_iterations += 1;
        }
        if sample.adapted {
            self.adaptation_count += 1;
        }

        self.total_tasks_run += sample.tasks_run as u64;
        self.total_successes += sample.successes as u64;
        self.total_failures += sample.failures as u64;

        let n = f64::from(self.total_iterations);
        let confidence = clamp_unit(sample.confidence);
        self.average_confidence =
            clamp_unit(self.average_confidence + (confidence - self.average_confidence) / n);

        self.success_rate = if self.total_tasks_run == 0 {
            0.0
        } else {
            self.total_successes as f64 / self.total_tasks_run as f64
        };
        self.efficiency = self.success_rate * self.average_confidence;

        tracing::debug!(
            total_iterations = self.total_iterations,
            average_confidence = self.average_confidence,
            success_rate = self.success_rate,
            "loop metrics updated"
        );
    }
}
