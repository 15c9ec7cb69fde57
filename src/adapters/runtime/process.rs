//! [`AgentRuntime`] that shells out to a subprocess per sandbox: a long-lived
//! child fed messages over stdin, its stdout drained as a message queue.

use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::{CoreError, DomainResult};
use crate::domain::models::EventPayload;
use crate::domain::ports::runtime::{AgentRuntime, MessageType, RuntimeMessage, SpawnRequest};
use crate::infrastructure::logging::SecretScrubber;

/// Configuration for the process-backed runtime.
#[derive(Debug, Clone)]
pub struct ProcessRuntimeConfig {
    /// Path to the sandbox-launching executable (defaults to `"swarmctl-agent"` on `PATH`).
    pub executable: String,
    pub working_dir: Option<std::path::PathBuf>,
}

impl Default for ProcessRuntimeConfig {
    fn default() -> Self {
        Self { executable: "swarmctl-agent".to_string(), working_dir: None }
    }
}

struct Sandbox {
    child: Child,
    stdout: tokio::io::BufReader<tokio::process::ChildStdout>,
}

/// Spawns a real OS process per sandbox, piping messages over stdin and
/// reading newline-delimited JSON lines back over stdout.
pub struct ProcessRuntime {
    config: ProcessRuntimeConfig,
    sandboxes: Arc<Mutex<HashMap<String, Sandbox>>>,
    scrubber: SecretScrubber,
}

impl ProcessRuntime {
    #[must_use]
    pub fn new(config: ProcessRuntimeConfig) -> Self {
        Self {
            config,
            sandboxes: Arc::new(Mutex::new(HashMap::new())),
            scrubber: SecretScrubber::new(),
        }
    }

    pub async fn is_executable_available(&self) -> bool {
        Command::new(&self.config.executable)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl AgentRuntime for ProcessRuntime {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn spawn(&self, request: SpawnRequest) -> DomainResult<String> {
        let sandbox_id = format!("proc-{}", Uuid::new_v4());

        let mut command = Command::new(&self.config.executable);
        command
            .arg("--task-id")
            .arg(request.task_id.to_string())
            .arg("--agent-id")
            .arg(request.agent_id.to_string())
            .arg("--kind")
            .arg(request.kind.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        if let Some(phase) = &request.phase {
            command.arg("--phase").arg(phase);
        }
        if let Some(project_id) = &request.project_id {
            command.arg("--project-id").arg(project_id);
        }
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        for (key, value) in &request.extra_env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| CoreError::Transient(format!("failed to spawn sandbox process: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CoreError::Permanent("sandbox process missing stdout".to_string()))?;

        let mut sandboxes = self.sandboxes.lock().await;
        sandboxes.insert(sandbox_id.clone(), Sandbox { child, stdout: BufReader::new(stdout) });

        Ok(sandbox_id)
    }

    async fn inject(
        &self,
        sandbox_id: &str,
        message: &str,
        message_type: MessageType,
    ) -> DomainResult<Uuid> {
        let queued_id = Uuid::new_v4();
        let envelope = serde_json::json!({
            "id": queued_id,
            "message_type": message_type,
            "content": message,
        });
        let line = format!("{}\n", serde_json::to_string(&envelope)?);

        let mut sandboxes = self.sandboxes.lock().await;
        let sandbox = sandboxes
            .get_mut(sandbox_id)
            .ok_or_else(|| CoreError::not_found("sandbox", sandbox_id))?;
        let stdin = sandbox
            .child
            .stdin
            .as_mut()
            .ok_or_else(|| CoreError::Permanent("sandbox process missing stdin".to_string()))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| CoreError::Transient(format!("failed to write to sandbox stdin: {e}")))?;

        Ok(queued_id)
    }

    async fn poll_messages(&self, sandbox_id: &str) -> DomainResult<Vec<RuntimeMessage>> {
        let mut sandboxes = self.sandboxes.lock().await;
        let sandbox = sandboxes
            .get_mut(sandbox_id)
            .ok_or_else(|| CoreError::not_found("sandbox", sandbox_id))?;

        let mut messages = Vec::new();
        loop {
            let mut line = String::new();
            let read = tokio::time::timeout(
                std::time::Duration::from_millis(10),
                sandbox.stdout.read_line(&mut line),
            )
            .await;
            match read {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(_)) => {
                    if let Ok(value) = serde_json::from_str::<serde_json::Value>(line.trim()) {
                        messages.push(RuntimeMessage {
                            queued_id: Uuid::new_v4(),
                            message_type: MessageType::System,
                            body: value.to_string(),
                        });
                    } else {
                        // Sandbox output can carry env dumps and tool echoes;
                        // scrub before it reaches the log.
                        tracing::debug!(
                            sandbox_id,
                            line = %self.scrubber.scrub(line.trim()),
                            "discarding non-JSON sandbox output"
                        );
                    }
                }
                Ok(Err(e)) => {
                    return Err(CoreError::Transient(format!("failed to read sandbox stdout: {e}")))
                }
            }
        }
        Ok(messages)
    }

    async fn post_event(&self, _sandbox_id: &str, event: EventPayload) -> DomainResult<()> {
        tracing::debug!(event_type = event.event_type(), "sandbox posted event to core");
        Ok(())
    }

    async fn terminate(&self, sandbox_id: &str, reason: &str) -> DomainResult<()> {
        let mut sandboxes = self.sandboxes.lock().await;
        if let Some(mut sandbox) = sandboxes.remove(sandbox_id) {
            tracing::info!(sandbox_id, reason, "terminating sandbox process");
            let _ = sandbox.child.kill().await;
        }
        Ok(())
    }

    async fn is_running(&self, sandbox_id: &str) -> DomainResult<bool> {
        let mut sandboxes = self.sandboxes.lock().await;
        match sandboxes.get_mut(sandbox_id) {
            Some(sandbox) => Ok(sandbox.child.try_wait().ok().flatten().is_none()),
            None => Ok(false),
        }
    }
}
