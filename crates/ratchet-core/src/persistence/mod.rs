//! The persistence contract: a best-effort sink the controller hands a
//! snapshot to once per iteration and once on termination.
//!
//! Sink failures are logged by the controller and never change control
//! flow. Storage engines live outside this crate (see `ratchet-store`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::controller::{LoopStatus, ResearchIteration};
use crate::metrics::LoopMetrics;
use crate::orchestrator::ProgressReport;
use crate::task::Task;

/// Everything needed to inspect a run after the fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSnapshot {
    pub run_id: Uuid,
    pub plan_name: String,
    pub status: LoopStatus,
    pub metrics: LoopMetrics,
    pub iterations: Vec<ResearchIteration>,
    pub progress: ProgressReport,
    /// Every task the orchestrator holds, ordered by id.
    pub tasks: Vec<Task>,
    pub saved_at: DateTime<Utc>,
}

/// Receives loop snapshots.
#[async_trait]
pub trait StateSink: Send + Sync {
    async fn save_state(&self, snapshot: &LoopSnapshot) -> anyhow::Result<()>;
}

// Compile-time assertion: StateSink must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn StateSink) {}
};
