//! Loop states, the committed status, and the control handle.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::ProgressReport;

// ---------------------------------------------------------------------------
// LoopState
// ---------------------------------------------------------------------------

/// State of the adaptive loop.
///
/// ```text
/// idle -> planning -> executing -> evaluating -> planning     (continue)
///                                            -> adapting -> planning
///                                            -> completed | failed
/// idle | evaluating | adapting -> paused -> planning
/// ```
///
/// `paused` is entered only between iterations. Any non-terminal state may
/// move to `completed` on terminate or to `failed` on a loop-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Idle,
    Planning,
    Executing,
    Evaluating,
    Adapting,
    Paused,
    Completed,
    Failed,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(self, to: LoopState) -> bool {
        use LoopState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, to),
            (Idle | Evaluating | Adapting | Paused, Planning)
                | (Planning, Executing)
                | (Executing, Evaluating)
                | (Evaluating, Adapting)
                | (Idle | Evaluating | Adapting, Paused)
                | (_, Completed)
                | (_, Failed)
        )
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Evaluating => "evaluating",
            Self::Adapting => "adapting",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for LoopState {
    type Err = LoopStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "planning" => Ok(Self::Planning),
            "executing" => Ok(Self::Executing),
            "evaluating" => Ok(Self::Evaluating),
            "adapting" => Ok(Self::Adapting),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(LoopStateParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`LoopState`] string.
#[derive(Debug, Clone)]
pub struct LoopStateParseError(pub String);

impl fmt::Display for LoopStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid loop state: {:?}", self.0)
    }
}

impl std::error::Error for LoopStateParseError {}

// ---------------------------------------------------------------------------
// LoopStatus
// ---------------------------------------------------------------------------

/// Last committed view of the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopStatus {
    pub state: LoopState,
    /// Current (or last) iteration number.
    pub iteration_number: u32,
    pub completed_iterations: u32,
    pub failed_iterations: u32,
    pub total_adaptations: u32,
    pub average_confidence: f64,
    /// Task counts across the whole run.
    pub progress: ProgressReport,
}

impl Default for LoopStatus {
    fn default() -> Self {
        Self {
            state: LoopState::Idle,
            iteration_number: 0,
            completed_iterations: 0,
            failed_iterations: 0,
            total_adaptations: 0,
            average_confidence: 0.0,
            progress: ProgressReport::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoopHandle
// ---------------------------------------------------------------------------

/// Cloneable control and status handle for a running loop.
///
/// `pause` and `terminate` take effect at the next iteration boundary;
/// neither interrupts a drain in progress.
#[derive(Debug, Clone)]
pub struct LoopHandle {
    pause_tx: Arc<watch::Sender<bool>>,
    cancel: CancellationToken,
    status_rx: watch::Receiver<LoopStatus>,
}

impl LoopHandle {
    pub(crate) fn new(
        pause_tx: Arc<watch::Sender<bool>>,
        cancel: CancellationToken,
        status_rx: watch::Receiver<LoopStatus>,
    ) -> Self {
        Self {
            pause_tx,
            cancel,
            status_rx,
        }
    }

    /// Hold the loop at the next iteration boundary.
    pub fn pause(&self) {
        self.pause_tx.send_replace(true);
    }

    pub fn resume(&self) {
        self.pause_tx.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_tx.borrow()
    }

    /// Stop after the iteration in progress (or before the next one).
    /// The loop ends `Completed`.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    pub fn is_terminated(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Last committed status.
    pub fn status(&self) -> LoopStatus {
        self.status_rx.borrow().clone()
    }

    /// Stream of committed statuses, starting with the current one.
    pub fn subscribe(&self) -> WatchStream<LoopStatus> {
        WatchStream::new(self.status_rx.clone())
    }

    /// Wait until the committed status satisfies `predicate`.
    ///
    /// Returns `None` if the loop finished without ever satisfying it.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Option<LoopStatus>
    where
        F: FnMut(&LoopStatus) -> bool,
    {
        let mut rx = self.status_rx.clone();
        let status = rx.wait_for(|status| predicate(status)).await.ok()?.clone();
        Some(status)
    }
}
