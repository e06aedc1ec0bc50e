//! Dependency-graph queries over the orchestrator's task map.

use std::collections::{HashMap, HashSet};

use crate::task::{Task, TaskId, TaskStatus};

/// Find a cycle that `candidate` would close if it were added.
///
/// Walks the dependency edges depth-first, starting from the candidate's
/// dependencies and restricted to non-terminal tasks. Terminal tasks can
/// never block anything again, so edges through them are ignored.
/// Dependencies that are not registered yet are treated as leaves.
///
/// Returns the cycle as a path that starts and ends at the candidate.
pub(crate) fn find_cycle(tasks: &HashMap<TaskId, Task>, candidate: &Task) -> Option<Vec<TaskId>> {
    if candidate.dependencies.contains(&candidate.id) {
        return Some(vec![candidate.id.clone(), candidate.id.clone()]);
    }

    let mut visited = HashSet::new();
    let mut path = vec![candidate.id.clone()];

    for dep in &candidate.dependencies {
        if visit(tasks, dep, &candidate.id, &mut visited, &mut path) {
            return Some(path);
        }
    }

    None
}

fn visit(
    tasks: &HashMap<TaskId, Task>,
    node: &TaskId,
    target: &TaskId,
    visited: &mut HashSet<TaskId>,
    path: &mut Vec<TaskId>,
) -> bool {
    if node == target {
        path.push(node.clone());
        return true;
    }
    if !visited.insert(node.clone()) {
        return false;
    }
    let Some(task) = tasks.get(node) else {
        return false;
    };
    if task.status.is_terminal() {
        return false;
    }

    path.push(node.clone());
    for dep in &task.dependencies {
        if visit(tasks, dep, target, visited, path) {
            return true;
        }
    }
    path.pop();

    false
}

/// `true` when every dependency of `task` is registered and `Completed`.
pub(crate) fn dependencies_met(tasks: &HashMap<TaskId, Task>, task: &Task) -> bool {
    task.dependencies.iter().all(|dep| {
        tasks
            .get(dep)
            .is_some_and(|t| t.status == TaskStatus::Completed)
    })
}

/// First dependency of `task` that ended `Failed` or `Cancelled`.
pub(crate) fn dead_dependency<'a>(
    tasks: &'a HashMap<TaskId, Task>,
    task: &Task,
) -> Option<&'a Task> {
    task.dependencies
        .iter()
        .filter_map(|dep| tasks.get(dep))
        .find(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Cancelled))
}
