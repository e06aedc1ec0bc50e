//! Integration tests for the adaptive loop controller: convergence, the
//! iteration ceiling, adaptation triggers, replanner failures, pause and
//! terminate, persistence and metrics bookkeeping.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use ratchet_core::controller::{IterationDecision, StopReason};
use ratchet_core::evaluation::{ResultConfidenceCriterion, SuccessRateCriterion};
use ratchet_core::{
    ExecutorRegistry, FocusFailedReplanner, LoopConfig, LoopController, LoopState, Plan,
    Replanner, TaskSpec,
};
use ratchet_test_utils::{
    ConcurrencyProbe, FailingReplanner, FixedCriterion, MemorySink, RecordingReplanner,
    ScriptedExecutor,
};

// ===========================================================================
// Helpers
// ===========================================================================

fn fast_config() -> LoopConfig {
    let mut config = LoopConfig::default();
    config.orchestrator.retry_attempts = 1;
    config.orchestrator.backoff_unit = Duration::from_millis(1);
    config.orchestrator.task_timeout = Duration::from_secs(5);
    config
}

/// `ok` succeeds with the given confidence; `bad` always fails.
fn registry(ok_confidence: f64) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register("ok", ScriptedExecutor::always_ok(ok_confidence));
    registry.register("bad", ScriptedExecutor::always_failing("upstream error"));
    registry
}

/// A plan with `good` successful tasks followed by `bad` failing ones.
fn mixed_plan(good: usize, bad: usize) -> Plan {
    let mut plan = Plan::new("mixed");
    for n in 0..good {
        plan = plan.with_task(TaskSpec::new(format!("good{n}"), "ok"));
    }
    for n in 0..bad {
        plan = plan.with_task(TaskSpec::new(format!("bad{n}"), "bad"));
    }
    plan
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

// ===========================================================================
// Stop conditions
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stops_after_first_iteration_when_confidence_target_met() {
    let config = LoopConfig {
        target_confidence_score: 0.7,
        ..fast_config()
    };
    // 0.6 * 1.0 + 0.4 * 0.375 = 0.75
    let controller = LoopController::new(
        config,
        registry(0.375),
        Arc::new(RecordingReplanner::same_plan()),
    );

    let report = controller.run(mixed_plan(2, 0)).await.unwrap();

    assert_eq!(report.final_state, LoopState::Completed);
    assert_eq!(report.stop_reason, Some(StopReason::ConfidenceReached));
    assert_eq!(report.metrics.total_iterations, 1);
    assert!(approx(report.iterations[0].confidence_score, 0.75));
    assert_eq!(report.status.completed_iterations, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn runs_exactly_max_iterations_when_nothing_converges() {
    let config = LoopConfig {
        max_iterations: 3,
        ..fast_config()
    };
    // Confidence 0.6 sits below every stop threshold and above every
    // adaptation trigger.
    let controller = LoopController::new(
        config,
        registry(0.0),
        Arc::new(RecordingReplanner::same_plan()),
    );

    let report = controller.run(mixed_plan(3, 0)).await.unwrap();

    assert_eq!(report.final_state, LoopState::Completed);
    assert_eq!(report.stop_reason, Some(StopReason::IterationCeiling));
    assert_eq!(report.iterations.len(), 3);
    let decisions: Vec<_> = report.iterations.iter().map(|i| i.decision.clone()).collect();
    assert_eq!(
        decisions,
        vec![
            IterationDecision::Continue,
            IterationDecision::Continue,
            IterationDecision::Stop {
                reason: StopReason::IterationCeiling
            },
        ]
    );
    let numbers: Vec<u32> = report.iterations.iter().map(|i| i.iteration_number).collect();
    assert_eq!(numbers, vec![0, 1, 2]);
    assert!(approx(report.metrics.average_confidence, 0.6));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn objectives_accumulate_across_iterations() {
    let mut registry = ExecutorRegistry::new();
    registry.register("ok", ScriptedExecutor::always_ok(0.0));
    // Fails the first call, succeeds once granted a second attempt.
    registry.register("flaky", ScriptedExecutor::flaky(1));

    let config = LoopConfig {
        target_confidence_score: 0.95,
        evaluation_threshold: 0.95,
        ..fast_config()
    };
    let plan = Plan::new("objectives")
        .with_objectives(["collect", "summarise"])
        .with_task(TaskSpec::new("collect", "ok").with_objectives(["collect"]))
        .with_task(TaskSpec::new("summarise", "flaky").with_objectives(["summarise"]));

    let report = LoopController::new(config, registry, Arc::new(FocusFailedReplanner::new(1)))
        .run(plan)
        .await
        .unwrap();

    assert_eq!(report.iterations.len(), 2);
    assert_eq!(
        report.iterations[0].completed_objectives,
        BTreeSet::from(["collect".to_string()])
    );
    assert_eq!(report.iterations[0].decision, IterationDecision::Adapt);
    assert_eq!(
        report.iterations[1].completed_objectives,
        BTreeSet::from(["summarise".to_string()])
    );
    assert_eq!(report.stop_reason, Some(StopReason::ObjectivesComplete));
}

// ===========================================================================
// Adaptation
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failure_ratio_above_threshold_requests_adaptation() {
    let config = LoopConfig {
        max_iterations: 2,
        ..fast_config()
    };
    let replanner = Arc::new(RecordingReplanner::same_plan());
    let controller = LoopController::new(config, registry(1.0), Arc::clone(&replanner) as _);

    let report = controller.run(mixed_plan(6, 4)).await.unwrap();

    let first = &report.iterations[0];
    assert_eq!(first.tasks_run.len(), 10);
    assert!(first.adaptation_needed);
    assert_eq!(
        first.adaptation_reason,
        "failure ratio 40% (4 of 10 tasks failed) exceeds 30%"
    );
    assert_eq!(first.decision, IterationDecision::Adapt);

    let calls = replanner.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].iteration_number, 0);
    assert_eq!(calls[0].issues, vec![first.adaptation_reason.clone()]);
    assert_eq!(report.metrics.adaptation_count, 1);
    assert_eq!(report.status.total_adaptations, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failure_ratio_is_reported_even_when_confidence_stops_the_loop() {
    let config = LoopConfig {
        target_confidence_score: 0.7,
        ..fast_config()
    };
    let replanner = Arc::new(RecordingReplanner::same_plan());
    let controller = LoopController::new(config, registry(1.0), Arc::clone(&replanner) as _);

    // 0.6 * 0.6 + 0.4 * 1.0 = 0.76
    let report = controller.run(mixed_plan(6, 4)).await.unwrap();

    assert_eq!(report.stop_reason, Some(StopReason::ConfidenceReached));
    let only = &report.iterations[0];
    assert!(only.adaptation_needed);
    assert!(only.adaptation_reason.contains("failure ratio 40%"));
    assert!(replanner.calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn weighted_criteria_drive_low_quality_adaptation() {
    let config = LoopConfig {
        max_iterations: 2,
        criterion_weights: BTreeMap::from([("precision".to_string(), 3.0)]),
        ..fast_config()
    };
    let replanner = Arc::new(RecordingReplanner::same_plan());
    let controller = LoopController::new(config, registry(0.0), Arc::clone(&replanner) as _)
        .with_criterion(FixedCriterion::new("precision", 0.2))
        .with_criterion(FixedCriterion::new("coverage", 1.0));

    let report = controller.run(mixed_plan(2, 0)).await.unwrap();

    let evaluation = &report.iterations[0].evaluation;
    // (3 * 0.2 + 1 * 1.0) / 4
    assert!(approx(evaluation.overall_score, 0.4));
    assert!(evaluation.needs_adaptation);
    assert_eq!(evaluation.weak_criteria, vec!["precision"]);
    assert_eq!(evaluation.scores.len(), 2);

    let adaptation = report.iterations[0].adaptation.as_ref().unwrap();
    assert!(adaptation.current_issues[0].contains("0.40"));
    assert_eq!(replanner.calls().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn quality_control_off_skips_criteria() {
    let config = LoopConfig {
        max_iterations: 2,
        enable_quality_control: false,
        ..fast_config()
    };
    let controller = LoopController::new(
        config,
        registry(0.0),
        Arc::new(RecordingReplanner::same_plan()),
    )
    .with_criterion(FixedCriterion::new("precision", 0.0));

    let report = controller.run(mixed_plan(2, 0)).await.unwrap();

    let first = &report.iterations[0];
    assert!(first.evaluation.scores.is_empty());
    assert!(approx(first.evaluation.overall_score, first.confidence_score));
    assert!(!first.adaptation_needed);
    assert_eq!(first.decision, IterationDecision::Continue);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn builtin_criteria_score_the_iteration() {
    let config = LoopConfig {
        max_iterations: 1,
        ..fast_config()
    };
    let controller = LoopController::new(
        config,
        registry(0.5),
        Arc::new(RecordingReplanner::same_plan()),
    )
    .with_criterion(SuccessRateCriterion)
    .with_criterion(ResultConfidenceCriterion);

    let report = controller.run(mixed_plan(3, 1)).await.unwrap();

    let scores = &report.iterations[0].evaluation.scores;
    assert!(approx(scores["success_rate"], 0.75));
    assert!(approx(scores["result_confidence"], 0.5));
    assert_eq!(report.stop_reason, Some(StopReason::IterationCeiling));
}

// ===========================================================================
// Failures
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn replanner_error_fails_the_loop() {
    let controller = LoopController::new(fast_config(), registry(1.0), Arc::new(FailingReplanner));
    let handle = controller.handle();

    let report = controller.run(mixed_plan(1, 1)).await.unwrap();

    assert_eq!(report.final_state, LoopState::Failed);
    assert_eq!(report.stop_reason, None);
    assert!(report.error.as_deref().unwrap().contains("replanning backend unavailable"));
    assert_eq!(report.iterations.len(), 1);
    assert_eq!(report.iterations[0].decision, IterationDecision::Abort);
    assert!(report.iterations[0].is_failed());
    assert_eq!(report.metrics.failed_iterations, 1);
    assert_eq!(handle.status().state, LoopState::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_replanned_plan_fails_the_loop() {
    let replanner: Arc<dyn Replanner> = Arc::new(RecordingReplanner::returning(Plan::new("empty")));
    let controller = LoopController::new(fast_config(), registry(1.0), replanner);

    let report = controller.run(mixed_plan(1, 1)).await.unwrap();

    assert_eq!(report.final_state, LoopState::Failed);
    assert!(report.error.as_deref().unwrap().contains("invalid plan"));
    // The rejected plan is never adopted.
    assert_eq!(report.final_plan.name, "mixed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_initial_plan_is_an_error() {
    let plan = Plan::new("broken").with_task(TaskSpec::new("a", "ok").with_depends_on(["missing"]));
    let controller = LoopController::new(
        fast_config(),
        registry(1.0),
        Arc::new(RecordingReplanner::same_plan()),
    );

    let err = controller.run(plan).await.unwrap_err();
    assert!(format!("{err:#}").contains("invalid initial plan"));
}

// ===========================================================================
// Control
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pause_holds_the_loop_until_resumed() {
    let controller = LoopController::new(
        LoopConfig {
            target_confidence_score: 0.5,
            ..fast_config()
        },
        registry(1.0),
        Arc::new(RecordingReplanner::same_plan()),
    );
    let handle = controller.handle();
    handle.pause();

    let (_, join) = controller.start(mixed_plan(1, 0));

    let paused = handle
        .wait_for(|s| s.state == LoopState::Paused)
        .await
        .unwrap();
    assert_eq!(paused.completed_iterations, 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.status().state, LoopState::Paused);

    handle.resume();
    let report = join.await.unwrap().unwrap();

    assert_eq!(report.final_state, LoopState::Completed);
    assert_eq!(report.iterations.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn terminate_finishes_the_current_iteration_then_stops() {
    let probe = Arc::new(ConcurrencyProbe::new(Duration::from_millis(100)));
    let mut registry = ExecutorRegistry::new();
    registry.register_arc("slow", Arc::clone(&probe) as _);
    registry.register("bad", ScriptedExecutor::always_failing("upstream error"));

    let config = LoopConfig {
        max_iterations: 10,
        // Never converge on confidence or quality.
        target_confidence_score: 1.0,
        evaluation_threshold: 1.0,
        ..fast_config()
    };
    let controller =
        LoopController::new(config, registry, Arc::new(RecordingReplanner::same_plan()));
    let plan = Plan::new("slow")
        .with_task(TaskSpec::new("wait", "slow"))
        .with_task(TaskSpec::new("broken", "bad"));

    let (handle, join) = controller.start(plan);
    handle
        .wait_for(|s| s.state == LoopState::Executing)
        .await
        .unwrap();
    handle.terminate();

    let report = join.await.unwrap().unwrap();

    assert_eq!(report.final_state, LoopState::Completed);
    assert_eq!(report.stop_reason, Some(StopReason::Terminated));
    assert_eq!(report.iterations.len(), 1);
    // The in-flight drain was not interrupted.
    assert_eq!(report.iterations[0].results[0].status, ratchet_core::TaskStatus::Completed);
}

// ===========================================================================
// Persistence and metrics
// ===========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn snapshot_saved_per_iteration_and_on_termination() {
    let sink = Arc::new(MemorySink::new());
    let controller = LoopController::new(
        LoopConfig {
            max_iterations: 3,
            ..fast_config()
        },
        registry(0.0),
        Arc::new(RecordingReplanner::same_plan()),
    )
    .with_sink(Arc::clone(&sink) as _);
    let run_id = controller.run_id();

    let report = controller.run(mixed_plan(2, 0)).await.unwrap();

    let snapshots = sink.snapshots();
    assert_eq!(snapshots.len(), 4);
    assert!(snapshots.iter().all(|s| s.run_id == run_id));
    let history_lengths: Vec<usize> = snapshots.iter().map(|s| s.iterations.len()).collect();
    assert_eq!(history_lengths, vec![1, 2, 3, 3]);

    let last = sink.last().unwrap();
    assert_eq!(last.status.state, LoopState::Completed);
    assert_eq!(last.metrics, report.metrics);
    // Task ids are scoped per iteration: 2 tasks x 3 iterations.
    assert_eq!(last.tasks.len(), 6);
    assert_eq!(last.progress.completed, 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failing_sink_does_not_affect_the_run() {
    let controller = LoopController::new(
        LoopConfig {
            max_iterations: 2,
            ..fast_config()
        },
        registry(0.0),
        Arc::new(RecordingReplanner::same_plan()),
    )
    .with_sink(Arc::new(MemorySink::failing()));

    let report = controller.run(mixed_plan(1, 0)).await.unwrap();

    assert_eq!(report.final_state, LoopState::Completed);
    assert_eq!(report.iterations.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn metrics_are_recorded_once_per_iteration() {
    let controller = LoopController::new(
        LoopConfig {
            max_iterations: 3,
            target_confidence_score: 0.95,
            evaluation_threshold: 0.95,
            enable_adaptive_learning: false,
            ..fast_config()
        },
        registry(1.0),
        Arc::new(RecordingReplanner::same_plan()),
    );

    let report = controller.run(mixed_plan(3, 1)).await.unwrap();
    let metrics = &report.metrics;

    assert_eq!(metrics.total_iterations, 3);
    assert_eq!(metrics.completed_iterations, 3);
    assert_eq!(metrics.total_tasks_run, 12);
    assert_eq!(metrics.total_successes, 9);
    assert_eq!(metrics.total_failures, 3);
    assert!(approx(metrics.success_rate, 0.75));
    assert_eq!(metrics.adaptation_count, 0);

    let status = &report.status;
    assert_eq!(status.completed_iterations, 3);
    assert_eq!(status.iteration_number, 2);
    assert_eq!(status.progress.total, 12);
}
