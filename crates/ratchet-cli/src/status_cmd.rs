//! `ratchet status` command: show a saved loop snapshot.

use std::path::Path;

use anyhow::{Context, Result};

use ratchet_core::TaskStatus;
use ratchet_store::load_snapshot;

pub async fn run_status(path: &Path) -> Result<()> {
    let snapshot = load_snapshot(path)
        .await
        .with_context(|| format!("cannot show status from {}", path.display()))?;
    let status = &snapshot.status;

    println!("Run: {} ({})", snapshot.run_id, snapshot.plan_name);
    println!("State: {}", status.state);
    println!("Saved: {}", snapshot.saved_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!(
        "Iterations: {} completed, {} failed (current #{})",
        status.completed_iterations, status.failed_iterations, status.iteration_number
    );
    println!("Adaptations: {}", status.total_adaptations);
    println!("Average confidence: {:.2}", status.average_confidence);
    println!();

    let p = snapshot.progress;
    println!(
        "Progress: {}/{} completed ({:.0}%)",
        p.completed,
        p.total,
        p.progress_ratio * 100.0
    );
    println!(
        "  pending={} running={} completed={} failed={} cancelled={}",
        p.pending, p.running, p.completed, p.failed, p.cancelled
    );
    println!();

    println!("Tasks:");
    for task in &snapshot.tasks {
        let status_icon = match task.status {
            TaskStatus::Pending => ".",
            TaskStatus::Running => "*",
            TaskStatus::Completed => "+",
            TaskStatus::Failed => "!",
            TaskStatus::Cancelled => "x",
        };
        print!(
            "  [{}] {} ({}, attempt {})",
            status_icon, task.id, task.status, task.attempts
        );
        match &task.error {
            Some(error) => println!(": {error}"),
            None => println!(),
        }
    }

    Ok(())
}
