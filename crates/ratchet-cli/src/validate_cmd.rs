//! `ratchet validate` command: parse a plan and print its tasks in a ready order.

use std::path::Path;

use anyhow::Result;

use crate::run_cmd::load_plan;

pub fn run_validate(path: &Path) -> Result<()> {
    let plan = load_plan(path)?;
    let order = plan.ready_order()?;

    println!("Plan {:?} is valid: {} task(s)", plan.name, plan.tasks.len());
    if !plan.objectives.is_empty() {
        println!("Objectives: {}", plan.objectives.join(", "));
    }
    println!();

    println!("Ready order:");
    for (i, task) in order.iter().enumerate() {
        let deps = if task.depends_on.is_empty() {
            String::new()
        } else {
            format!(" after {}", task.depends_on.join(", "))
        };
        println!(
            "  {:>2}. {} [{}] priority {}{deps}",
            i + 1,
            task.key,
            task.capability,
            task.priority
        );
    }

    Ok(())
}
