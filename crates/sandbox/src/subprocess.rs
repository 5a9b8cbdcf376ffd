//! Subprocess backend: script-engine isolation in a spawned child.
//!
//! Each request spawns the configured interpreter, writes the request
//! input as JSON to the child's stdin, and captures stdout/stderr with a
//! size cap. The child inherits nothing from the request except its
//! input; `kill_on_drop` guarantees the process dies when the deadline or
//! a cancellation fires.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::backend::SandboxBackend;
use crate::request::{NodeExecutionRequest, NodeExecutionResult};
use crate::sandbox::Sandbox;

/// Maximum stdout or stderr size captured per stream (10 MiB).
///
/// Output beyond this limit is truncated to prevent memory exhaustion
/// from extremely verbose node programs.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Sandbox that runs node logic in a child process.
///
/// `program`/`args` name the script engine to invoke; the node type and
/// input travel on stdin as a JSON envelope `{"node_type": ..,
/// "input": ..}` and the child's stdout is parsed as the JSON output.
pub struct SubprocessSandbox {
    program: String,
    args: Vec<String>,
}

impl SubprocessSandbox {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Sandbox for SubprocessSandbox {
    fn backend(&self) -> SandboxBackend {
        SandboxBackend::Subprocess
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        request: NodeExecutionRequest,
    ) -> NodeExecutionResult {
        let start = Instant::now();
        let elapsed = |s: Instant| s.elapsed().as_millis() as u64;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return NodeExecutionResult::failed(
                    request.id,
                    format!("failed to spawn {}: {e}", self.program),
                    elapsed(start),
                );
            }
        };
        tracing::debug!(program = %self.program, request_id = %request.id, "node subprocess spawned");

        // Write the JSON envelope to stdin, then close it. Best-effort: if
        // the child closes stdin early, ignore the error.
        if let Some(mut stdin) = child.stdin.take() {
            let envelope = serde_json::json!({
                "node_type": request.node_type,
                "input": request.input,
            });
            let bytes = serde_json::to_vec(&envelope).unwrap_or_default();
            let _ = stdin.write_all(&bytes).await;
            drop(stdin);
        }

        // Read stdout/stderr in spawned tasks so `child.wait()` can borrow
        // the child mutably.
        let stdout_handle = child.stdout.take();
        let stderr_handle = child.stderr.take();
        let stdout_task = tokio::spawn(async move { read_stream(stdout_handle).await });
        let stderr_task = tokio::spawn(async move { read_stream(stderr_handle).await });

        let deadline = Duration::from_millis(request.constraints.timeout_ms);
        let wait = tokio::select! {
            _ = cancel.cancelled() => {
                // Dropping `child` kills the process (kill_on_drop).
                return NodeExecutionResult::cancelled(request.id, elapsed(start));
            }
            wait = tokio::time::timeout(deadline, child.wait()) => wait,
        };

        match wait {
            Ok(Ok(status)) => {
                let duration_ms = elapsed(start);
                let stdout_bytes = stdout_task.await.unwrap_or_default();
                let stderr_bytes = stderr_task.await.unwrap_or_default();
                let stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
                let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

                if status.success() {
                    // Stdout that is not valid JSON is wrapped as a string
                    // value so the caller always gets structured output.
                    let output: Value = serde_json::from_str(stdout.trim())
                        .unwrap_or_else(|_| Value::String(stdout.trim().to_string()));
                    NodeExecutionResult::completed(request.id, output, duration_ms)
                } else {
                    let exit_code = status.code().unwrap_or(-1);
                    NodeExecutionResult::failed(
                        request.id,
                        format!("process exited with code {exit_code}: {stderr}"),
                        duration_ms,
                    )
                }
            }
            Ok(Err(e)) => NodeExecutionResult::failed(
                request.id,
                format!("I/O error: {e}"),
                elapsed(start),
            ),
            Err(_) => NodeExecutionResult::timed_out(request.id, elapsed(start)),
        }
    }
}

/// Read an entire output stream into a byte buffer, capped at
/// [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        let _ = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::request::{Constraints, SandboxStatus};

    fn request(timeout_ms: u64) -> NodeExecutionRequest {
        NodeExecutionRequest::new("script", json!({"n": 1})).with_constraints(Constraints {
            timeout_ms,
            memory_mb: None,
            cpu_millis: None,
        })
    }

    #[tokio::test]
    async fn cat_echoes_the_envelope_back() {
        let sb = SubprocessSandbox::new("cat", vec![]);
        let result = sb.execute(&CancellationToken::new(), request(5_000)).await;
        assert_eq!(result.status, SandboxStatus::Completed);
        let output = result.output.unwrap();
        assert_eq!(output["node_type"], "script");
        assert_eq!(output["input"]["n"], 1);
    }

    #[tokio::test]
    async fn missing_program_fails() {
        let sb = SubprocessSandbox::new("definitely-not-a-real-binary", vec![]);
        let result = sb.execute(&CancellationToken::new(), request(5_000)).await;
        assert_eq!(result.status, SandboxStatus::Failed);
        assert!(result.error.unwrap().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn slow_child_is_killed_on_timeout() {
        let sb = SubprocessSandbox::new("sleep", vec!["30".to_string()]);
        let result = sb.execute(&CancellationToken::new(), request(50)).await;
        assert_eq!(result.status, SandboxStatus::TimedOut);
    }

    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let sb = SubprocessSandbox::new("sleep", vec!["30".to_string()]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result = sb.execute(&cancel, request(60_000)).await;
        assert_eq!(result.status, SandboxStatus::Cancelled);
    }
}
