//! TOML format types for plan files.
//!
//! These map one-to-one onto the on-disk `plan.toml` layout. Unknown keys
//! are rejected so typos surface as parse errors instead of silently
//! falling back to defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level structure of a `plan.toml` file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PlanToml {
    pub plan: PlanMeta,
    #[serde(default)]
    pub tasks: Vec<TaskToml>,
}

/// Plan-level metadata in `[plan]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PlanMeta {
    pub name: String,
    /// Objective ids the loop tracks for convergence.
    #[serde(default)]
    pub objectives: Vec<String>,
}

/// A single `[[tasks]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TaskToml {
    /// Unique key within the plan, referenced by `depends_on`.
    pub key: String,
    /// Display name; defaults to the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Executor capability that runs this task.
    pub capability: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    /// Opaque payload handed to the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}
