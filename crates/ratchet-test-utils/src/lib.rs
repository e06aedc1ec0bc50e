//! Shared test doubles for ratchet integration tests.
//!
//! Executors with scripted or instrumented behaviour, a fixed-score quality
//! criterion, replanners that record or fail, and an in-memory state sink.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use ratchet_core::adaptation::IterationFeedback;
use ratchet_core::evaluation::EvaluationContext;
use ratchet_core::{
    AdaptationPlan, Executor, ExecutorError, ExecutorOutput, LoopSnapshot, Plan,
    QualityCriterion, Replanner, StateSink,
};

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

/// Replays a fixed script of responses, one per call. The last response
/// repeats once the script runs out.
pub struct ScriptedExecutor {
    script: Vec<Result<ExecutorOutput, ExecutorError>>,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<Result<ExecutorOutput, ExecutorError>>) -> Self {
        assert!(!script.is_empty(), "script must have at least one response");
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always succeeds with the given confidence, echoing the input.
    pub fn always_ok(confidence: f64) -> Self {
        Self::new(vec![Ok(
            ExecutorOutput::success(Value::Null).with_confidence(confidence)
        )])
    }

    /// Fails retryably `failures` times, then succeeds.
    pub fn flaky(failures: usize) -> Self {
        let mut script: Vec<_> = (1..=failures)
            .map(|n| Err(ExecutorError::Retryable(format!("transient failure {n}"))))
            .collect();
        script.push(Ok(ExecutorOutput::success(Value::from("recovered"))));
        Self::new(script)
    }

    /// Always fails with a retryable error.
    pub fn always_failing(message: &str) -> Self {
        Self::new(vec![Err(ExecutorError::Retryable(message.to_owned()))])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, input: &Value) -> Result<ExecutorOutput, ExecutorError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = &self.script[n.min(self.script.len() - 1)];
        match step {
            Ok(output) if output.success && output.data.is_null() => Ok(ExecutorOutput {
                data: input.clone(),
                ..output.clone()
            }),
            other => other.clone(),
        }
    }
}

/// Sleeps for a fixed delay while tracking how many calls overlap, and
/// records the `"key"` field of each input in start order.
pub struct ConcurrencyProbe {
    delay: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl ConcurrencyProbe {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    /// Highest number of calls observed in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Input keys in the order calls started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for ConcurrencyProbe {
    async fn execute(&self, input: &Value) -> Result<ExecutorOutput, ExecutorError> {
        let key = input["key"].as_str().unwrap_or_default().to_owned();
        self.started.lock().unwrap().push(key);

        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.current.fetch_sub(1, Ordering::SeqCst);

        Ok(ExecutorOutput::success(input.clone()).with_confidence(1.0))
    }
}

// ---------------------------------------------------------------------------
// Criteria
// ---------------------------------------------------------------------------

/// A criterion that always reports the same score.
#[derive(Debug, Clone)]
pub struct FixedCriterion {
    name: String,
    score: f64,
}

impl FixedCriterion {
    pub fn new(name: &str, score: f64) -> Self {
        Self {
            name: name.to_owned(),
            score,
        }
    }
}

impl QualityCriterion for FixedCriterion {
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, _ctx: &EvaluationContext<'_>) -> f64 {
        self.score
    }
}

// ---------------------------------------------------------------------------
// Replanners
// ---------------------------------------------------------------------------

/// Returns `next` (or the current plan when `None`) and records every call.
#[derive(Default)]
pub struct RecordingReplanner {
    next: Option<Plan>,
    calls: Mutex<Vec<RecordedReplan>>,
}

/// One call seen by [`RecordingReplanner`].
#[derive(Debug, Clone)]
pub struct RecordedReplan {
    pub iteration_number: u32,
    pub confidence_score: f64,
    pub plan_name: String,
    pub issues: Vec<String>,
}

impl RecordingReplanner {
    /// Replans to the same plan.
    pub fn same_plan() -> Self {
        Self::default()
    }

    /// Replans to `next`.
    pub fn returning(next: Plan) -> Self {
        Self {
            next: Some(next),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedReplan> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Replanner for RecordingReplanner {
    async fn replan(
        &self,
        current: &Plan,
        adaptation: &AdaptationPlan,
        feedback: &IterationFeedback<'_>,
    ) -> anyhow::Result<Plan> {
        self.calls.lock().unwrap().push(RecordedReplan {
            iteration_number: feedback.iteration_number,
            confidence_score: feedback.confidence_score,
            plan_name: current.name.clone(),
            issues: adaptation.current_issues.clone(),
        });
        Ok(self.next.clone().unwrap_or_else(|| current.clone()))
    }
}

/// Always fails.
pub struct FailingReplanner;

#[async_trait]
impl Replanner for FailingReplanner {
    async fn replan(
        &self,
        _current: &Plan,
        _adaptation: &AdaptationPlan,
        _feedback: &IterationFeedback<'_>,
    ) -> anyhow::Result<Plan> {
        anyhow::bail!("replanning backend unavailable")
    }
}

// ---------------------------------------------------------------------------
// State sink
// ---------------------------------------------------------------------------

/// Keeps every snapshot in memory. Can be told to fail every save.
#[derive(Default)]
pub struct MemorySink {
    snapshots: Mutex<Vec<LoopSnapshot>>,
    fail: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose saves all fail.
    pub fn failing() -> Self {
        Self {
            snapshots: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn snapshots(&self) -> Vec<LoopSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<LoopSnapshot> {
        self.snapshots.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl StateSink for MemorySink {
    async fn save_state(&self, snapshot: &LoopSnapshot) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("disk full");
        }
        self.snapshots.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}
