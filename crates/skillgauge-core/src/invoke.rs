//! Model invocation boundary.
//!
//! [`ModelInvoker`] is the seam between the orchestrator and the external
//! model CLI: one async call per evaluation unit, no retries. The production
//! implementation shells out to `claude -p`; tests inject stubs.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Failure of a single invocation. Caught per unit by the orchestrator and
/// folded into an errored result; never escalated to a run failure.
#[derive(Error, Debug)]
pub enum InvokeError {
    #[error("failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{binary}' exited with {code}: {stderr}")]
    NonZeroExit {
        binary: String,
        code: i32,
        stderr: String,
    },

    #[error("invocation I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One model response with its execution cost.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Raw response text (may or may not contain a scoring block).
    pub text: String,
    pub duration_secs: f64,
    /// Human-readable token/cost descriptor, e.g. `"input=812, output=2048"`.
    pub cost: String,
}

/// Async invocation capability consumed by the orchestrator.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Invocation, InvokeError>;
}

/// Invoker that shells out to the `claude` CLI in print mode.
#[derive(Debug, Clone)]
pub struct CliInvoker {
    binary: String,
}

impl CliInvoker {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for CliInvoker {
    fn default() -> Self {
        Self::new("claude")
    }
}

const STDERR_LIMIT: usize = 500;

#[async_trait]
impl ModelInvoker for CliInvoker {
    async fn invoke(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Invocation, InvokeError> {
        let start = Instant::now();
        let mut child = Command::new(&self.binary)
            .args([
                "-p",
                "--model",
                model,
                "--system-prompt",
                system_prompt,
                "--output-format",
                "json",
                "--no-session-persistence",
            ])
            // Unset to avoid the CLI's nested-session guard.
            .env("CLAUDECODE", "")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| InvokeError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(user_prompt.as_bytes()).await?;
        }
        let output = child.wait_with_output().await?;
        let duration_secs = start.elapsed().as_secs_f64();

        if !output.status.success() {
            let stderr: String = String::from_utf8_lossy(&output.stderr)
                .chars()
                .take(STDERR_LIMIT)
                .collect();
            return Err(InvokeError::NonZeroExit {
                binary: self.binary.clone(),
                code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }

        let raw = String::from_utf8_lossy(&output.stdout).into_owned();
        let (text, cost) = interpret_cli_output(&raw);
        debug!(model, duration_secs, cost = %cost, "model invocation finished");
        Ok(Invocation {
            text,
            duration_secs,
            cost,
        })
    }
}

/// Interpret the CLI's stdout. JSON envelopes yield the `result` field plus
/// a token-count descriptor; anything else is tolerated as raw text.
fn interpret_cli_output(raw: &str) -> (String, String) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => {
            let text = value
                .get("result")
                .and_then(|r| r.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| raw.to_string());
            let token = |key: &str| {
                value
                    .get(key)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "?".to_string())
            };
            let cost = format!(
                "input={}, output={}",
                token("input_tokens"),
                token("output_tokens")
            );
            (text, cost)
        }
        Err(_) => (raw.to_string(), "unknown (non-JSON output)".to_string()),
    }
}
