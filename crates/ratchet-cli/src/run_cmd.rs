//! `ratchet run` command: run the adaptive loop over a plan file.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;

use ratchet_core::controller::{IterationDecision, LoopReport};
use ratchet_core::evaluation::{ResultConfidenceCriterion, SuccessRateCriterion};
use ratchet_core::{FocusFailedReplanner, LoopController, LoopState, LoopStatus, Plan};
use ratchet_store::JsonFileSink;

use crate::builtin::builtin_registry;
use crate::config::RatchetConfig;

/// Read a plan file and parse it.
pub fn load_plan(path: &Path) -> Result<Plan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plan file {}", path.display()))?;
    Plan::from_toml_str(&content)
        .with_context(|| format!("invalid plan file {}", path.display()))
}

/// Run the loop to completion. Ctrl-C requests termination after the
/// iteration in progress.
pub async fn run_plan(plan_path: &Path, config: RatchetConfig) -> Result<()> {
    let plan = load_plan(plan_path)?;

    let sink = Arc::new(JsonFileSink::from_config(&config.store));
    let retry_attempts = config.loop_config.orchestrator.retry_attempts;
    let controller = LoopController::new(
        config.loop_config,
        builtin_registry(),
        Arc::new(FocusFailedReplanner::new(retry_attempts)),
    )
    .with_criterion(SuccessRateCriterion)
    .with_criterion(ResultConfidenceCriterion)
    .with_sink(sink);

    println!(
        "Running plan {:?} ({} tasks), run {}",
        plan.name,
        plan.tasks.len(),
        controller.run_id()
    );
    println!("State file: {}", config.store.state_file.display());
    println!();

    let (handle, join) = controller.start(plan);

    let watcher = tokio::spawn(print_transitions(handle.subscribe()));
    let interrupt = {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupt received; stopping after the current iteration.");
                handle.terminate();
            }
        })
    };

    let result = join.await.context("loop task panicked")?;
    interrupt.abort();
    // The status stream ends once the controller is dropped.
    let _ = watcher.await;

    let report = result?;
    println!();
    print_report(&report);

    if report.final_state == LoopState::Failed {
        bail!(
            "loop failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Print one line per state change.
async fn print_transitions(mut statuses: WatchStream<LoopStatus>) {
    let mut last: Option<(LoopState, u32)> = None;
    while let Some(status) = statuses.next().await {
        let key = (status.state, status.iteration_number);
        if last == Some(key) {
            continue;
        }
        last = Some(key);

        let p = status.progress;
        println!(
            "  [iteration {}] {:<10} tasks: {} done, {} failed, {} cancelled, {} pending",
            status.iteration_number,
            status.state.to_string(),
            p.completed, p.failed, p.cancelled, p.pending
        );
    }
}

fn decision_label(decision: &IterationDecision) -> String {
    match decision {
        IterationDecision::Stop { reason } => format!("stop ({reason})"),
        IterationDecision::Adapt => "adapt".to_string(),
        IterationDecision::Continue => "continue".to_string(),
        IterationDecision::Abort => "abort".to_string(),
    }
}

pub fn print_report(report: &LoopReport) {
    println!("Run {}: {}", report.run_id, report.final_state);
    if let Some(reason) = report.stop_reason {
        println!("Stopped: {reason}");
    }
    if let Some(error) = &report.error {
        println!("Error: {error}");
    }
    println!();

    println!("Iterations:");
    for iteration in &report.iterations {
        let completed = iteration
            .results
            .iter()
            .filter(|o| o.status == ratchet_core::TaskStatus::Completed)
            .count();
        println!(
            "  #{:<3} ran {:>3}, completed {:>3}, confidence {:.2}, quality {:.2} -> {}",
            iteration.iteration_number,
            iteration.tasks_run.len(),
            completed,
            iteration.confidence_score,
            iteration.evaluation.overall_score,
            decision_label(&iteration.decision),
        );
        if iteration.adaptation_needed {
            println!("        adaptation: {}", iteration.adaptation_reason);
        }
    }
    println!();

    let m = &report.metrics;
    println!(
        "Metrics: {} iterations ({} failed), {} adaptations",
        m.total_iterations, m.failed_iterations, m.adaptation_count
    );
    println!(
        "  tasks run {}, succeeded {}, failed {}; success rate {:.0}%, average confidence {:.2}, efficiency {:.2}",
        m.total_tasks_run,
        m.total_successes,
        m.total_failures,
        m.success_rate * 100.0,
        m.average_confidence,
        m.efficiency,
    );
}
