//! Task state machine transitions.
//!
//! Validates and applies status transitions, stamping `started_at` and
//! `completed_at` as the task moves through the graph.

use chrono::Utc;

use crate::error::OrchestratorError;
use crate::task::{Task, TaskStatus};

/// The task state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// pending -> running
/// running -> completed
/// running -> failed
/// pending -> cancelled
/// running -> cancelled
/// ```
///
/// Nothing leaves a terminal state. A replanned task is a new task with a
/// new id, never a reset of an old one.
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge
    /// in the state graph.
    pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        matches!(
            (from, to),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::Running, TaskStatus::Cancelled)
        )
    }

    /// Apply a transition to `task`.
    ///
    /// - Sets `started_at` on `pending -> running`.
    /// - Sets `completed_at` on any transition into a terminal state.
    pub fn transition(task: &mut Task, to: TaskStatus) -> Result<(), OrchestratorError> {
        let from = task.status;
        if !Self::is_valid_transition(from, to) {
            return Err(OrchestratorError::InvalidTransition {
                task_id: task.id.clone(),
                from,
                to,
            });
        }

        let now = Utc::now();
        if to == TaskStatus::Running {
            task.started_at = Some(now);
        }
        if to.is_terminal() {
            task.completed_at = Some(now);
        }
        task.status = to;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for from in ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(
                    !TaskStateMachine::is_valid_transition(from, to),
                    "{from} -> {to} should be rejected"
                );
            }
        }
    }

    #[test]
    fn nothing_reenters_pending() {
        for from in ALL {
            assert!(!TaskStateMachine::is_valid_transition(from, TaskStatus::Pending));
        }
    }

    #[test]
    fn pending_cannot_skip_running() {
        assert!(!TaskStateMachine::is_valid_transition(
            TaskStatus::Pending,
            TaskStatus::Completed
        ));
        assert!(!TaskStateMachine::is_valid_transition(
            TaskStatus::Pending,
            TaskStatus::Failed
        ));
    }

    #[test]
    fn transition_stamps_timestamps() {
        let mut task = Task::new("a", "echo");
        TaskStateMachine::transition(&mut task, TaskStatus::Running).unwrap();
        assert!(task.started_at.is_some());
        assert!(task.completed_at.is_none());

        TaskStateMachine::transition(&mut task, TaskStatus::Completed).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
    }

    #[test]
    fn invalid_transition_leaves_task_untouched() {
        let mut task = Task::new("a", "echo");
        let err = TaskStateMachine::transition(&mut task, TaskStatus::Completed).unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::InvalidTransition {
                task_id: "a".into(),
                from: TaskStatus::Pending,
                to: TaskStatus::Completed,
            }
        );
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.started_at.is_none());
    }
}
