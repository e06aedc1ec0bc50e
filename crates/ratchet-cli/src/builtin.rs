//! Executors the `ratchet` binary registers out of the box.
//!
//! - `shell`: runs `input.command` with `input.args`; exit 0 succeeds with
//!   stdout as data, anything else is a retryable failure carrying stderr.
//! - `echo`: returns its input as data, with `input.confidence` and
//!   `input.objectives` passed through.

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use ratchet_core::{Executor, ExecutorError, ExecutorOutput, ExecutorRegistry};

/// Registry with every built-in capability.
pub fn builtin_registry() -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register("shell", ShellExecutor);
    registry.register("echo", EchoExecutor);
    registry
}

/// Optional confidence and objectives an input may declare for its output.
fn annotate(mut output: ExecutorOutput, input: &Value) -> ExecutorOutput {
    if let Some(confidence) = input.get("confidence").and_then(Value::as_f64) {
        output = output.with_confidence(confidence);
    }
    if let Some(objectives) = input.get("objectives").and_then(Value::as_array) {
        output = output.with_objectives(objectives.iter().filter_map(Value::as_str));
    }
    output
}

pub struct ShellExecutor;

#[async_trait]
impl Executor for ShellExecutor {
    async fn execute(&self, input: &Value) -> Result<ExecutorOutput, ExecutorError> {
        let Some(program) = input.get("command").and_then(Value::as_str) else {
            return Err(ExecutorError::Fatal(
                "shell task input needs a string `command`".to_string(),
            ));
        };
        let args: Vec<&str> = match input.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str().ok_or_else(|| {
                        ExecutorError::Fatal("shell task `args` must be strings".to_string())
                    })
                })
                .collect::<Result<_, _>>()?,
            Some(_) => {
                return Err(ExecutorError::Fatal(
                    "shell task `args` must be an array".to_string(),
                ));
            }
        };

        tracing::debug!(command = %program, args = ?args, "running shell task");

        let output = Command::new(program)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecutorError::Fatal(format!("failed to start {program:?}: {e}")))?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
            Ok(annotate(ExecutorOutput::success(Value::String(stdout)), input))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{program} exited with {}", output.status)
            } else {
                format!("{program} exited with {}: {stderr}", output.status)
            };
            Ok(ExecutorOutput::failure(message))
        }
    }
}

pub struct EchoExecutor;

#[async_trait]
impl Executor for EchoExecutor {
    async fn execute(&self, input: &Value) -> Result<ExecutorOutput, ExecutorError> {
        Ok(annotate(ExecutorOutput::success(input.clone()), input))
    }
}
