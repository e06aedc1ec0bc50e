//! Executor interface for task business logic.
//!
//! This module defines the [`Executor`] trait that task backends implement,
//! the [`ExecutorOutput`]/[`ExecutorError`] contract, the closure adapter
//! [`FnExecutor`], and the capability-keyed [`ExecutorRegistry`].
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!     |
//!     v
//! ExecutorRegistry --get("search")--> Arc<dyn Executor>
//!     |                                     |
//!     |   execute(input) -------------------+
//!     |        |
//!     |        v
//!     |   Ok(ExecutorOutput { success, data, confidence, .. })
//!     |   Err(ExecutorError::Retryable | ExecutorError::Fatal)
//! ```

pub mod registry;
pub mod trait_def;
pub mod types;

pub use registry::ExecutorRegistry;
pub use trait_def::Executor;
pub use types::{ExecutorError, ExecutorOutput, FnExecutor};
