//! `shell.run` and `shell.persistent` (§4.4).
//!
//! One-shot execution is grounded on the teacher's `BashTool`: spawn via `tokio::process::Command`,
//! read stdout/stderr concurrently, enforce a wall-clock timeout. The persistent variant keeps a
//! live child process per session id in [`PersistentShellTable`], feeding it input over stdin and
//! draining whatever output has accumulated since the last `send`.

use crate::tool_protocol::{
    Tool, ToolContext, ToolHandler, ToolMetadata, ToolParameter, ToolParameterType, ToolResult,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

const ONE_SHOT_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_OUTPUT_BYTES: usize = 2 * 1024 * 1024;

struct PersistentSession {
    child: Child,
    accumulated: Vec<u8>,
}

/// Live persistent shell sessions keyed by an id the LLM chooses (usually the subtask id).
#[derive(Clone, Default)]
pub struct PersistentShellTable(Arc<Mutex<HashMap<String, PersistentSession>>>);

impl PersistentShellTable {
    pub fn new() -> Self {
        Self::default()
    }

    async fn start(&self, session_id: &str, work_dir: &std::path::Path) -> Result<(), String> {
        let mut sessions = self.0.lock().await;
        if sessions.contains_key(session_id) {
            return Err(format!("session '{}' is already running", session_id));
        }
        let child = Command::new("/bin/bash")
            .current_dir(work_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| e.to_string())?;
        sessions.insert(
            session_id.to_string(),
            PersistentSession {
                child,
                accumulated: Vec::new(),
            },
        );
        Ok(())
    }

    async fn send(&self, session_id: &str, input: &str, clear_first: bool) -> Result<String, String> {
        let mut sessions = self.0.lock().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| format!("no running session '{}'", session_id))?;

        if clear_first {
            session.accumulated.clear();
        }

        if let Some(stdin) = session.child.stdin.as_mut() {
            stdin
                .write_all(format!("{}\n", input).as_bytes())
                .await
                .map_err(|e| e.to_string())?;
        }

        // Give the command a moment to produce output, then drain whatever is buffered without
        // blocking indefinitely (the session stays alive for the next `send`).
        tokio::time::sleep(Duration::from_millis(300)).await;
        if let Some(stdout) = session.child.stdout.as_mut() {
            let mut buf = [0u8; 8192];
            loop {
                match tokio::time::timeout(Duration::from_millis(50), stdout.read(&mut buf)).await {
                    Ok(Ok(0)) | Err(_) => break,
                    Ok(Ok(n)) => {
                        if session.accumulated.len() + n > MAX_OUTPUT_BYTES {
                            break;
                        }
                        session.accumulated.extend_from_slice(&buf[..n]);
                    }
                    Ok(Err(_)) => break,
                }
            }
        }

        Ok(String::from_utf8_lossy(&session.accumulated).to_string())
    }

    async fn kill(&self, session_id: &str) -> Result<(), String> {
        let mut sessions = self.0.lock().await;
        let mut session = sessions
            .remove(session_id)
            .ok_or_else(|| format!("no running session '{}'", session_id))?;
        let _ = session.child.kill().await;
        Ok(())
    }
}

async fn run_one_shot(command: &str, work_dir: &std::path::Path) -> Result<(bool, String, String, i32), String> {
    if command.trim().is_empty() {
        return Err("command must not be empty".to_string());
    }

    let fut = async {
        let mut child = Command::new("/bin/bash")
            .arg("-c")
            .arg(command)
            .current_dir(work_dir)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| e.to_string())?;

        let mut stdout_pipe = child.stdout.take().expect("stdout piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr piped");
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let (_, _) = tokio::join!(
            stdout_pipe.read_to_end(&mut stdout_buf),
            stderr_pipe.read_to_end(&mut stderr_buf),
        );
        let status = child.wait().await.map_err(|e| e.to_string())?;

        Ok::<_, String>((
            status.success(),
            String::from_utf8_lossy(&stdout_buf).to_string(),
            String::from_utf8_lossy(&stderr_buf).to_string(),
            status.code().unwrap_or(-1),
        ))
    };

    match tokio::time::timeout(ONE_SHOT_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err("command timed out".to_string()),
    }
}

struct ShellRun;

#[async_trait]
impl ToolHandler for ShellRun {
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let Some(command) = args.get("command").and_then(|v| v.as_str()) else {
            return ToolResult::failure("missing required argument 'command'");
        };
        if ctx.workspace_dir.as_os_str().is_empty() {
            return ToolResult::failure("missing workDir");
        }
        match run_one_shot(command, &ctx.workspace_dir).await {
            Ok((success, stdout, stderr, exit_code)) => ToolResult::success(serde_json::json!({
                "success": success,
                "stdout": stdout,
                "stderr": stderr,
                "exitCode": exit_code,
            })),
            Err(e) => ToolResult::failure(e),
        }
    }
}

struct ShellPersistent;

#[async_trait]
impl ToolHandler for ShellPersistent {
    async fn call(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let session_id = ctx.subtask_id.clone().unwrap_or_else(|| "default".to_string());
        let Some(action) = args.get("action").and_then(|v| v.as_str()) else {
            return ToolResult::failure("missing required argument 'action'");
        };

        match action {
            "start" => match ctx.persistent_shells.start(&session_id, &ctx.workspace_dir).await {
                Ok(()) => ToolResult::success(serde_json::json!({ "started": true })),
                Err(e) => ToolResult::failure(e),
            },
            "send" => {
                let Some(input) = args.get("input").and_then(|v| v.as_str()) else {
                    return ToolResult::failure("missing required argument 'input'");
                };
                let clear_first = args.get("clearFirst").and_then(|v| v.as_bool()).unwrap_or(false);
                match ctx.persistent_shells.send(&session_id, input, clear_first).await {
                    Ok(output) => ToolResult::success(serde_json::json!({ "output": output })),
                    Err(e) => ToolResult::failure(e),
                }
            }
            "kill" => match ctx.persistent_shells.kill(&session_id).await {
                Ok(()) => ToolResult::success(serde_json::json!({ "killed": true })),
                Err(e) => ToolResult::failure(e),
            },
            other => ToolResult::failure(format!("unknown action '{}'", other)),
        }
    }
}

pub fn register(registry: &mut crate::tool_protocol::ToolRegistry) {
    registry.register(Tool::new(
        ToolMetadata::new("shell_run", "Run a one-shot shell command in the workspace.")
            .with_parameter(ToolParameter::new("command", ToolParameterType::String).required()),
        Arc::new(ShellRun),
    ));
    registry.register(Tool::new(
        ToolMetadata::new(
            "shell_persistent",
            "Manage a long-lived shell session: start, send input, or kill it.",
        )
        .with_parameter(ToolParameter::new("action", ToolParameterType::String).required())
        .with_parameter(ToolParameter::new("input", ToolParameterType::String))
        .with_parameter(ToolParameter::new("clearFirst", ToolParameterType::Boolean)),
        Arc::new(ShellPersistent),
    ));
}
