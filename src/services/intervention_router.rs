//! Routes a guardian steering message to whichever transport the target
//! agent's current task actually uses: `Runtime::inject` for sandboxed
//! tasks, the recorded in-process conversation handle for legacy ones. The
//! audit row and event are written either way; whether transport succeeded
//! is a separate flag on the record.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::errors::{CoreError, DomainResult};
use crate::domain::models::{AuthorityLevel, EntityType, EventPayload, GuardianAction, InterventionRecord, TaskStatus};
use crate::domain::ports::{AgentRuntime, Clock, GuardianRepository, MessageType, TaskRepository};
use crate::services::event_bus::EventBus;

pub struct InterventionRouter {
    task_repository: Arc<dyn TaskRepository>,
    guardian_repository: Arc<dyn GuardianRepository>,
    runtime: Arc<dyn AgentRuntime>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl InterventionRouter {
    #[must_use]
    pub fn new(
        task_repository: Arc<dyn TaskRepository>,
        guardian_repository: Arc<dyn GuardianRepository>,
        runtime: Arc<dyn AgentRuntime>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { task_repository, guardian_repository, runtime, event_bus, clock }
    }

    /// Steers `agent_id` with `message`. Always records an audit row and
    /// emits `guardian.steering.intervention`, win or lose on transport.
    pub async fn steer(&self, agent_id: Uuid, message: &str) -> DomainResult<InterventionRecord> {
        let active = self.task_repository.list_active_for_agent(agent_id).await?;
        let task = active
            .into_iter()
            .find(|t| matches!(t.status, TaskStatus::Assigned | TaskStatus::Running))
            .ok_or_else(|| CoreError::not_found("agent active task", agent_id.to_string()))?;

        let routed_to_sandbox = task.sandbox_id.is_some();
        let delivered = if let Some(sandbox_id) = &task.sandbox_id {
            self.runtime.inject(sandbox_id, message, MessageType::GuardianNudge).await.is_ok()
        } else {
            // Legacy in-process conversation: delivery is possible only if a
            // conversation handle was ever recorded for this task.
            task.conversation_id.is_some()
        };

        let record = InterventionRecord {
            id: Uuid::new_v4(),
            agent_id,
            task_id: task.id,
            message: message.to_string(),
            routed_to_sandbox,
            delivered,
            recorded_at: self.clock.now(),
        };
        self.guardian_repository.record_intervention(&record).await?;
        self.guardian_repository
            .record_action(&GuardianAction {
                id: Uuid::new_v4(),
                action_type: "steer_agent".to_string(),
                target: agent_id,
                reason: message.to_string(),
                initiated_by: "guardian".to_string(),
                authority_level: AuthorityLevel::Guardian,
                before: None,
                after: Some(serde_json::json!({
                    "routed_to_sandbox": routed_to_sandbox,
                    "delivered": delivered,
                })),
                executed_at: self.clock.now(),
                reverted_at: None,
            })
            .await?;

        self.event_bus
            .publish(
                EntityType::Agent,
                agent_id,
                EventPayload::GuardianInterventionRouted {
                    agent_id,
                    task_id: task.id,
                    routed_to_sandbox,
                    delivered,
                },
                serde_json::Value::Null,
            )
            .await?;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::runtime::MockRuntime;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteGuardianRepository, SqliteOutbox, SqliteTaskRepository};
    use crate::domain::models::{Task, TaskPriority};
    use crate::domain::ports::SystemClock;
    use crate::services::event_bus::EventBusConfig;
    use std::collections::HashSet;

    async fn make_router() -> (InterventionRouter, Arc<dyn TaskRepository>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let task_repo: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let guardian_repo: Arc<dyn GuardianRepository> = Arc::new(SqliteGuardianRepository::new(pool.clone()));
        let outbox = Arc::new(SqliteOutbox::new(pool));
        let event_bus = Arc::new(EventBus::new(outbox, EventBusConfig::default()));
        let runtime = Arc::new(MockRuntime::new());
        let router = InterventionRouter::new(task_repo.clone(), guardian_repo, runtime, event_bus, Arc::new(SystemClock));
        (router, task_repo)
    }

    #[tokio::test]
    async fn steers_sandboxed_task_via_inject() {
        let (router, task_repo) = make_router().await;
        let agent_id = Uuid::new_v4();
        let now = chrono::Utc::now();
        let mut task = Task::new(
            Uuid::new_v4(), Uuid::new_v4(), None, "standard", TaskPriority::Medium, "x",
            HashSet::new(), HashSet::new(), 3, 600, None, now,
        );
        task.assigned_agent_id = Some(agent_id);
        task.sandbox_id = Some("sb-1".to_string());
        task.transition_to(TaskStatus::Assigned, now).unwrap();
        task_repo.create(&task).await.unwrap();
        task_repo.update(&task).await.unwrap();

        let record = router.steer(agent_id, "focus").await.unwrap();
        assert!(record.routed_to_sandbox);
        assert!(record.delivered);
    }

    #[tokio::test]
    async fn steers_in_process_task_without_inject() {
        let (router, task_repo) = make_router().await;
        let agent_id = Uuid::new_v4();
        let now = chrono::Utc::now();
        let mut task = Task::new(
            Uuid::new_v4(), Uuid::new_v4(), None, "standard", TaskPriority::Medium, "x",
            HashSet::new(), HashSet::new(), 3, 600, None, now,
        );
        task.assigned_agent_id = Some(agent_id);
        task.conversation_id = Some(Uuid::new_v4());
        task.transition_to(TaskStatus::Assigned, now).unwrap();
        task_repo.create(&task).await.unwrap();
        task_repo.update(&task).await.unwrap();

        let record = router.steer(agent_id, "focus").await.unwrap();
        assert!(!record.routed_to_sandbox);
        assert!(record.delivered);
    }

    #[tokio::test]
    async fn no_active_task_is_not_found() {
        let (router, _task_repo) = make_router().await;
        assert!(router.steer(Uuid::new_v4(), "focus").await.is_err());
    }
}
