//! Adaptive loop controller: runs iterations of plan, execute, evaluate and
//! decide over one [`Orchestrator`], replanning when quality falls short.
//!
//! ```text
//!            +-----------------------------------------------+
//!            |                                               |
//!  idle -> planning -> executing -> evaluating --continue----+
//!                                      |   \
//!                                      |    adapting --replan--> planning
//!                                      v
//!                               completed | failed
//! ```
//!
//! The controller is the only writer of iteration history, metrics and the
//! published [`LoopStatus`]. Callers observe and steer a running loop
//! through a [`LoopHandle`]; pause and terminate are honoured at iteration
//! boundaries only.

pub mod config;
pub mod decision;
pub mod handle;
pub mod iteration;

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adaptation::{AdaptationPlan, IterationFeedback, Replanner, describe_reasons};
use crate::error::OrchestratorError;
use crate::evaluation::{EvaluationContext, EvaluationResult, Evaluator, QualityCriterion};
use crate::executor::ExecutorRegistry;
use crate::metrics::{IterationSample, LoopMetrics};
use crate::orchestrator::Orchestrator;
use crate::persistence::{LoopSnapshot, StateSink};
use crate::plan::Plan;
use crate::task::{TaskId, TaskOutcome};

pub use config::LoopConfig;
pub use decision::{Decision, DecisionInput, StopReason, decide};
pub use handle::{LoopHandle, LoopState, LoopStateParseError, LoopStatus};
pub use iteration::{IterationDecision, ResearchIteration};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Final result of a loop run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopReport {
    pub run_id: Uuid,
    pub final_state: LoopState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub status: LoopStatus,
    pub metrics: LoopMetrics,
    pub iterations: Vec<ResearchIteration>,
    /// Loop-level error when the loop ended `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The plan that would have run next.
    pub final_plan: Plan,
}

/// Mutable state of one run, owned by the controller task.
struct RunState {
    orchestrator: Orchestrator,
    plan: Plan,
    history: Vec<ResearchIteration>,
    metrics: LoopMetrics,
    status: LoopStatus,
    /// Union of objectives satisfied across all iterations so far.
    objectives_done: BTreeSet<String>,
    stop_reason: Option<StopReason>,
    error: Option<String>,
}

/// What follows an iteration.
enum Step {
    Next,
    Finish(LoopState),
}

// ---------------------------------------------------------------------------
// LoopController
// ---------------------------------------------------------------------------

pub struct LoopController {
    config: LoopConfig,
    registry: ExecutorRegistry,
    evaluator: Evaluator,
    replanner: Arc<dyn Replanner>,
    sink: Option<Arc<dyn StateSink>>,
    run_id: Uuid,
    pause_tx: Arc<watch::Sender<bool>>,
    cancel: CancellationToken,
    status_tx: watch::Sender<LoopStatus>,
}

impl LoopController {
    /// Create a controller. Criteria default to none, in which case the
    /// overall quality score is the iteration confidence.
    pub fn new(config: LoopConfig, registry: ExecutorRegistry, replanner: Arc<dyn Replanner>) -> Self {
        let evaluator = Evaluator::new(config.evaluation_threshold, config.adaptation_threshold)
            .with_weights(config.criterion_weights.clone().into_iter().collect());
        let (status_tx, _) = watch::channel(LoopStatus::default());
        let (pause_tx, _) = watch::channel(false);

        Self {
            config,
            registry,
            evaluator,
            replanner,
            sink: None,
            run_id: Uuid::new_v4(),
            pause_tx: Arc::new(pause_tx),
            cancel: CancellationToken::new(),
            status_tx,
        }
    }

    pub fn with_criterion(mut self, criterion: impl QualityCriterion + 'static) -> Self {
        self.evaluator.add_criterion(Box::new(criterion));
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn StateSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// A control and status handle for this controller's run.
    pub fn handle(&self) -> LoopHandle {
        LoopHandle::new(
            Arc::clone(&self.pause_tx),
            self.cancel.clone(),
            self.status_tx.subscribe(),
        )
    }

    /// Spawn the loop on the tokio runtime.
    pub fn start(self, plan: Plan) -> (LoopHandle, JoinHandle<Result<LoopReport>>) {
        let handle = self.handle();
        let join = tokio::spawn(self.run(plan));
        (handle, join)
    }

    /// Run the loop to a terminal state.
    ///
    /// Returns `Err` only when the configuration or the initial plan is
    /// invalid; nothing runs in that case. Every other failure ends the
    /// loop `Failed` and is reported in [`LoopReport::error`].
    pub async fn run(self, plan: Plan) -> Result<LoopReport> {
        let orchestrator =
            Orchestrator::with_registry(self.config.orchestrator.clone(), self.registry.clone());
        let mut run = RunState {
            orchestrator,
            plan,
            history: Vec::new(),
            metrics: LoopMetrics::default(),
            status: LoopStatus::default(),
            objectives_done: BTreeSet::new(),
            stop_reason: None,
            error: None,
        };

        let preflight = self
            .config
            .validate()
            .context("invalid loop configuration")
            .and_then(|()| run.plan.validate().context("invalid initial plan"));
        if let Err(e) = preflight {
            tracing::error!(run_id = %self.run_id, error = %format!("{e:#}"), "loop not started");
            self.set_state(&mut run, LoopState::Failed);
            return Err(e);
        }

        tracing::info!(
            run_id = %self.run_id,
            plan = %run.plan.name,
            tasks = run.plan.tasks.len(),
            max_iterations = self.config.max_iterations,
            "adaptive loop started"
        );

        let mut pause_rx = self.pause_tx.subscribe();
        let mut n: u32 = 0;

        let final_state = loop {
            // Iteration boundary.
            if n > 0 && !self.config.iteration_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.iteration_delay) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }

            let paused = *pause_rx.borrow();
            if paused && !self.cancel.is_cancelled() {
                self.set_state(&mut run, LoopState::Paused);
                tracing::info!(run_id = %self.run_id, iteration = n, "loop paused");
                tokio::select! {
                    _ = async {
                        let _ = pause_rx.wait_for(|paused| !*paused).await;
                    } => {}
                    _ = self.cancel.cancelled() => {}
                }
                tracing::info!(run_id = %self.run_id, iteration = n, "loop resumed");
            }

            if n >= self.effective_max_iterations(n) {
                tracing::info!(run_id = %self.run_id, iteration = n, "terminate requested; stopping");
                run.stop_reason = Some(StopReason::Terminated);
                break LoopState::Completed;
            }

            match self.run_iteration(&mut run, n).await {
                Step::Next => n += 1,
                Step::Finish(state) => break state,
            }
        };

        run.orchestrator.cancel_pending("loop finished");
        self.set_state(&mut run, final_state);

        tracing::info!(
            run_id = %self.run_id,
            state = %final_state,
            iterations = run.history.len(),
            average_confidence = run.metrics.average_confidence,
            stop_reason = ?run.stop_reason,
            "adaptive loop finished"
        );

        self.persist(&run).await;

        Ok(LoopReport {
            run_id: self.run_id,
            final_state,
            stop_reason: run.stop_reason,
            status: run.status,
            metrics: run.metrics,
            iterations: run.history,
            error: run.error,
            final_plan: run.plan,
        })
    }

    /// The iteration ceiling, lowered to the number of iterations started
    /// so far once terminate has been requested.
    fn effective_max_iterations(&self, started: u32) -> u32 {
        if self.cancel.is_cancelled() {
            self.config.max_iterations.min(started)
        } else {
            self.config.max_iterations
        }
    }

    async fn run_iteration(&self, run: &mut RunState, n: u32) -> Step {
        let start_time = Utc::now();
        run.status.iteration_number = n;

        // 1. Plan.
        self.set_state(run, LoopState::Planning);
        tracing::info!(
            run_id = %self.run_id,
            iteration = n,
            plan = %run.plan.name,
            tasks = run.plan.tasks.len(),
            "iteration started"
        );

        let mut keys: Vec<(TaskId, String)> = Vec::with_capacity(run.plan.tasks.len());
        for (task, spec) in run.plan.materialize(n).into_iter().zip(run.plan.tasks.iter()) {
            let task_id = task.id.clone();
            match run.orchestrator.add_task(task) {
                Ok(()) => keys.push((task_id, spec.key.clone())),
                Err(e) => {
                    tracing::error!(iteration = n, task_id = %task_id, error = %e, "task rejected")
                }
            }
        }

        // 2. Execute.
        self.set_state(run, LoopState::Executing);
        let mut stuck: Vec<TaskId> = Vec::new();
        match run
            .orchestrator
            .drain(self.config.orchestrator.max_concurrent_tasks)
            .await
        {
            Ok(report) => {
                tracing::debug!(
                    iteration = n,
                    batches = report.batches,
                    dispatched = report.dispatched.len(),
                    cancelled = report.cancelled.len(),
                    peak_running = report.peak_running,
                    "drain finished"
                );
            }
            Err(OrchestratorError::Unschedulable { stuck: ids }) => {
                tracing::error!(iteration = n, stuck = ?ids, "iteration stalled on unschedulable tasks");
                run.orchestrator
                    .cancel_pending("unschedulable: dependencies can never complete");
                stuck = ids;
            }
            Err(e) => {
                let message = format!("drain failed: {e}");
                tracing::error!(iteration = n, error = %message, "iteration aborted");
                run.error = Some(message);
                return Step::Finish(LoopState::Failed);
            }
        }

        // 3. Evaluate.
        self.set_state(run, LoopState::Evaluating);
        let results: Vec<TaskOutcome> = keys
            .iter()
            .filter_map(|(id, key)| {
                run.orchestrator
                    .task(id)
                    .map(|task| TaskOutcome::from_task(task, key.clone()))
            })
            .collect();

        let mut tasks_run: Vec<&TaskOutcome> = results.iter().filter(|o| o.was_dispatched()).collect();
        tasks_run.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        let tasks_run: Vec<TaskId> = tasks_run.into_iter().map(|o| o.task_id.clone()).collect();

        let completed_objectives: BTreeSet<String> = results
            .iter()
            .flat_map(|o| o.objectives.iter().cloned())
            .collect();
        run.objectives_done
            .extend(completed_objectives.iter().cloned());

        let stalled = !stuck.is_empty();
        let ctx = EvaluationContext::from_outcomes(n, &results, &completed_objectives, stalled);
        let confidence = ctx.confidence_score;
        let (dispatched, completed, failed) = (ctx.dispatched, ctx.completed, ctx.failed);

        let evaluation = if self.config.enable_quality_control {
            self.evaluator.evaluate(&ctx)
        } else {
            EvaluationResult {
                scores: Default::default(),
                overall_score: confidence,
                needs_adaptation: false,
                recommendations: Vec::new(),
                weak_criteria: Vec::new(),
            }
        };

        let objectives_complete = {
            let tracked = run.plan.tracked_objectives();
            !tracked.is_empty() && tracked.iter().all(|o| run.objectives_done.contains(*o))
        };

        // 4. Decide.
        let input = DecisionInput {
            iteration_number: n,
            confidence_score: confidence,
            overall_score: self
                .config
                .enable_quality_control
                .then_some(evaluation.overall_score),
            dispatched,
            failed,
            stuck: stalled.then_some(stuck.len()),
            objectives_complete,
        };
        let decision = decide(&input, &self.config, self.effective_max_iterations(n + 1));
        let adaptation_reason = describe_reasons(&decision.adaptation);

        tracing::info!(
            run_id = %self.run_id,
            iteration = n,
            confidence,
            overall_score = evaluation.overall_score,
            dispatched,
            completed,
            failed,
            "iteration evaluated"
        );
        if decision.adaptation_needed() {
            tracing::warn!(iteration = n, reason = %adaptation_reason, "adaptation needed");
        }

        // 5. Adapt, stop or continue.
        let mut adaptation = None;
        let mut error = None;
        let (iteration_decision, step) = if let Some(reason) = decision.stop {
            let reason = if reason == StopReason::IterationCeiling
                && self.cancel.is_cancelled()
                && n + 1 < self.config.max_iterations
            {
                StopReason::Terminated
            } else {
                reason
            };
            tracing::info!(iteration = n, reason = %reason, "loop converged");
            run.stop_reason = Some(reason);
            (IterationDecision::Stop { reason }, Step::Finish(LoopState::Completed))
        } else if decision.adaptation_needed() && self.config.enable_adaptive_learning {
            self.set_state(run, LoopState::Adapting);
            let adaptation_plan = AdaptationPlan::build(
                &decision.adaptation,
                &evaluation,
                confidence,
                self.config.target_confidence_score,
            );
            let feedback = IterationFeedback {
                iteration_number: n,
                confidence_score: confidence,
                outcomes: &results,
                evaluation: &evaluation,
            };

            let replanned = self
                .replanner
                .replan(&run.plan, &adaptation_plan, &feedback)
                .await
                .and_then(|next| {
                    next.validate()
                        .context("replanner returned an invalid plan")?;
                    Ok(next)
                });
            adaptation = Some(adaptation_plan);

            match replanned {
                Ok(next) => {
                    tracing::info!(
                        iteration = n,
                        plan = %next.name,
                        tasks = next.tasks.len(),
                        "plan adapted"
                    );
                    run.plan = next;
                    (IterationDecision::Adapt, Step::Next)
                }
                Err(e) => {
                    let message = format!("replanning failed: {e:#}");
                    tracing::error!(iteration = n, error = %message, "loop failed");
                    error = Some(message.clone());
                    run.error = Some(message);
                    (IterationDecision::Abort, Step::Finish(LoopState::Failed))
                }
            }
        } else {
            (IterationDecision::Continue, Step::Next)
        };

        run.metrics.record_iteration(IterationSample {
            tasks_run: dispatched,
            successes: completed,
            failures: failed,
            confidence,
            failed: stalled || error.is_some(),
            adapted: iteration_decision == IterationDecision::Adapt,
        });

        run.history.push(ResearchIteration {
            iteration_number: n,
            start_time,
            end_time: Utc::now(),
            tasks_run,
            results,
            confidence_score: confidence,
            completed_objectives,
            adaptation_needed: decision.adaptation_needed(),
            adaptation_reason,
            evaluation,
            adaptation,
            stuck,
            decision: iteration_decision,
            error,
        });

        run.status.completed_iterations = run.metrics.completed_iterations;
        run.status.failed_iterations = run.metrics.failed_iterations;
        run.status.total_adaptations = run.metrics.adaptation_count;
        run.status.average_confidence = run.metrics.average_confidence;
        self.publish(run);
        self.persist(run).await;

        step
    }

    fn set_state(&self, run: &mut RunState, to: LoopState) {
        let from = run.status.state;
        if from != to && !from.can_transition_to(to) {
            tracing::error!(from = %from, to = %to, "unexpected loop state transition");
        }
        run.status.state = to;
        tracing::debug!(run_id = %self.run_id, from = %from, to = %to, "loop state changed");
        self.publish(run);
    }

    fn publish(&self, run: &mut RunState) {
        run.status.progress = run.orchestrator.progress_report();
        self.status_tx.send_replace(run.status.clone());
    }

    async fn persist(&self, run: &RunState) {
        let Some(sink) = &self.sink else {
            return;
        };

        let snapshot = LoopSnapshot {
            run_id: self.run_id,
            plan_name: run.plan.name.clone(),
            status: run.status.clone(),
            metrics: run.metrics.clone(),
            iterations: run.history.clone(),
            progress: run.orchestrator.progress_report(),
            tasks: run.orchestrator.snapshot(),
            saved_at: Utc::now(),
        };

        if let Err(e) = sink.save_state(&snapshot).await {
            tracing::warn!(
                run_id = %self.run_id,
                error = %format!("{e:#}"),
                "failed to save loop state"
            );
        }
    }
}

impl std::fmt::Debug for LoopController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopController")
            .field("run_id", &self.run_id)
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("evaluator", &self.evaluator)
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}
