//! `AgentRuntime`: the sole boundary between the control plane and whatever
//! actually executes agent work. Any sandbox substrate that can spawn,
//! inject messages into, poll, and terminate an agent satisfies it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentKind, EventPayload};

/// Execution mode a task is spawned under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sandbox,
    InProcess,
}

/// Kind of message delivered via [`AgentRuntime::inject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    UserMessage,
    GuardianNudge,
    Interrupt,
    System,
}

/// A message waiting to be consumed via [`AgentRuntime::poll_messages`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeMessage {
    pub queued_id: Uuid,
    pub message_type: MessageType,
    pub body: String,
}

/// Parameters for [`AgentRuntime::spawn`].
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub task_id: Uuid,
    pub agent_id: Uuid,
    pub phase: Option<String>,
    pub kind: AgentKind,
    pub execution_mode: ExecutionMode,
    pub project_id: Option<String>,
    pub extra_env: Vec<(String, String)>,
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    /// Starts execution for a task; returns the sandbox id the core will
    /// thread through `Inject`/`PollMessages`/`Terminate` and persist on the
    /// `Task` row.
    async fn spawn(&self, request: SpawnRequest) -> DomainResult<String>;

    /// Delivers a message into a running sandbox/conversation.
    async fn inject(
        &self,
        sandbox_id: &str,
        message: &str,
        message_type: MessageType,
    ) -> DomainResult<Uuid>;

    /// Drains queued inbound messages (FIFO, consumed on read).
    async fn poll_messages(&self, sandbox_id: &str) -> DomainResult<Vec<RuntimeMessage>>;

    /// Accepts a typed `agent.*` event reported by the sandbox back into core.
    async fn post_event(&self, sandbox_id: &str, event: EventPayload) -> DomainResult<()>;

    async fn terminate(&self, sandbox_id: &str, reason: &str) -> DomainResult<()>;

    async fn is_running(&self, sandbox_id: &str) -> DomainResult<bool>;
}
