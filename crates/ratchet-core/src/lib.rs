//! Core engine for ratchet: a dependency-aware task orchestrator wrapped in
//! an adaptive plan / execute / evaluate / replan loop.
//!
//! ```text
//! LoopController
//!     |  plan.materialize(n)
//!     v
//! Orchestrator --drain(max_concurrent)--> ExecutorRegistry --capability--> dyn Executor
//!     |
//!     v
//! Evaluator (QualityCriterion...) --> decide --> { converge | continue | adapt -> Replanner }
//! ```

pub mod adaptation;
pub mod controller;
pub mod durations;
pub mod error;
pub mod evaluation;
pub mod executor;
pub mod metrics;
pub mod orchestrator;
pub mod persistence;
pub mod plan;
pub mod state;
pub mod task;

pub use adaptation::{AdaptationPlan, FocusFailedReplanner, ProposedChange, Replanner};
pub use controller::{LoopConfig, LoopController, LoopHandle, LoopReport, LoopState, LoopStatus};
pub use error::OrchestratorError;
pub use evaluation::{EvaluationContext, EvaluationResult, Evaluator, QualityCriterion};
pub use executor::{Executor, ExecutorError, ExecutorOutput, ExecutorRegistry};
pub use metrics::LoopMetrics;
pub use orchestrator::{Orchestrator, OrchestratorConfig, ProgressReport};
pub use persistence::{LoopSnapshot, StateSink};
pub use plan::{Plan, TaskSpec};
pub use task::{Task, TaskId, TaskResult, TaskStatus};
