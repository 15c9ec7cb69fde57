//! In-memory [`AgentRuntime`] for tests and local development: simulates a
//! sandbox's spawn/inject/poll/terminate lifecycle without any real process.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{CoreError, DomainResult};
use crate::domain::models::EventPayload;
use crate::domain::ports::runtime::{AgentRuntime, MessageType, RuntimeMessage, SpawnRequest};

struct MockSandbox {
    running: bool,
    inbox: VecDeque<RuntimeMessage>,
    posted_events: Vec<EventPayload>,
}

/// Records every spawn/inject/terminate call so tests can assert on the
/// sequence of calls the control plane made.
#[derive(Default)]
pub struct MockRuntime {
    sandboxes: Arc<RwLock<HashMap<String, MockSandbox>>>,
}

impl MockRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn posted_events(&self, sandbox_id: &str) -> Vec<EventPayload> {
        let sandboxes = self.sandboxes.read().await;
        sandboxes
            .get(sandbox_id)
            .map(|s| s.posted_events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AgentRuntime for MockRuntime {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn spawn(&self, request: SpawnRequest) -> DomainResult<String> {
        let sandbox_id = format!("mock-sandbox-{}", Uuid::new_v4());
        let mut sandboxes = self.sandboxes.write().await;
        sandboxes.insert(
            sandbox_id.clone(),
            MockSandbox { running: true, inbox: VecDeque::new(), posted_events: Vec::new() },
        );
        tracing::debug!(task_id = %request.task_id, agent_id = %request.agent_id, sandbox_id, "mock runtime spawned sandbox");
        Ok(sandbox_id)
    }

    async fn inject(
        &self,
        sandbox_id: &str,
        message: &str,
        message_type: MessageType,
    ) -> DomainResult<Uuid> {
        let mut sandboxes = self.sandboxes.write().await;
        let sandbox = sandboxes
            .get_mut(sandbox_id)
            .ok_or_else(|| CoreError::not_found("sandbox", sandbox_id))?;
        let queued_id = Uuid::new_v4();
        sandbox.inbox.push_back(RuntimeMessage {
            queued_id,
            message_type,
            body: message.to_string(),
        });
        Ok(queued_id)
    }

    async fn poll_messages(&self, sandbox_id: &str) -> DomainResult<Vec<RuntimeMessage>> {
        let mut sandboxes = self.sandboxes.write().await;
        let sandbox = sandboxes
            .get_mut(sandbox_id)
            .ok_or_else(|| CoreError::not_found("sandbox", sandbox_id))?;
        Ok(sandbox.inbox.drain(..).collect())
    }

    async fn post_event(&self, sandbox_id: &str, event: EventPayload) -> DomainResult<()> {
        let mut sandboxes = self.sandboxes.write().await;
        let sandbox = sandboxes
            .get_mut(sandbox_id)
            .ok_or_else(|| CoreError::not_found("sandbox", sandbox_id))?;
        sandbox.posted_events.push(event);
        Ok(())
    }

    async fn terminate(&self, sandbox_id: &str, reason: &str) -> DomainResult<()> {
        let mut sandboxes = self.sandboxes.write().await;
        if let Some(sandbox) = sandboxes.get_mut(sandbox_id) {
            sandbox.running = false;
        }
        tracing::debug!(sandbox_id, reason, "mock runtime terminated sandbox");
        Ok(())
    }

    async fn is_running(&self, sandbox_id: &str) -> DomainResult<bool> {
        let sandboxes = self.sandboxes.read().await;
        Ok(sandboxes.get(sandbox_id).is_some_and(|s| s.running))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AgentKind;
    use crate::domain::ports::runtime::ExecutionMode;

    fn spawn_request() -> SpawnRequest {
        SpawnRequest {
            task_id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
            phase: None,
            kind: AgentKind::Worker,
            execution_mode: ExecutionMode::Sandbox,
            project_id: None,
            extra_env: vec![],
        }
    }

    #[tokio::test]
    async fn spawn_then_inject_then_poll_is_fifo() {
        let runtime = MockRuntime::new();
        let sandbox_id = runtime.spawn(spawn_request()).await.unwrap();

        runtime.inject(&sandbox_id, "first", MessageType::UserMessage).await.unwrap();
        runtime.inject(&sandbox_id, "second", MessageType::GuardianNudge).await.unwrap();

        let messages = runtime.poll_messages(&sandbox_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].body, "first");
        assert_eq!(messages[1].body, "second");

        let drained = runtime.poll_messages(&sandbox_id).await.unwrap();
        assert!(drained.is_empty());
    }

    #[tokio::test]
    async fn terminate_flips_is_running() {
        let runtime = MockRuntime::new();
        let sandbox_id = runtime.spawn(spawn_request()).await.unwrap();
        assert!(runtime.is_running(&sandbox_id).await.unwrap());

        runtime.terminate(&sandbox_id, "task complete").await.unwrap();
        assert!(!runtime.is_running(&sandbox_id).await.unwrap());
    }
}
