//! Replaces a failed agent: drains its in-flight tasks back to the queue,
//! registers a replacement with the same shape, terminates the old id, and
//! records the whole action in the audit trail. A cooldown gate stops the
//! orchestrator from thrashing on an agent that keeps failing.

use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use crate::domain::errors::{CoreError, DomainResult};
use crate::domain::models::{
    Agent, AgentStatus, AuthorityLevel, EntityType, EventPayload, GuardianAction, RestartAttempt, TaskStatus,
};
use crate::domain::ports::{AgentRepository, Clock, GuardianRepository, TaskRepository};
use crate::services::event_bus::EventBus;
use crate::services::status_manager::StatusManager;

#[derive(Debug, Clone, Copy)]
pub struct RestartConfig {
    pub cooldown_seconds: i64,
    pub max_restarts: u32,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self { cooldown_seconds: 60, max_restarts: 3 }
    }
}

pub struct RestartOrchestrator {
    agent_repository: Arc<dyn AgentRepository>,
    task_repository: Arc<dyn TaskRepository>,
    guardian_repository: Arc<dyn GuardianRepository>,
    status_manager: Arc<StatusManager>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: RestartConfig,
}

impl RestartOrchestrator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_repository: Arc<dyn AgentRepository>,
        task_repository: Arc<dyn TaskRepository>,
        guardian_repository: Arc<dyn GuardianRepository>,
        status_manager: Arc<StatusManager>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: RestartConfig,
    ) -> Self {
        Self { agent_repository, task_repository, guardian_repository, status_manager, event_bus, clock, config }
    }

    /// Replaces `failed_agent_id`. `forced` (guardian authority) bypasses the
    /// cooldown and restart-count gate; returns the created [`RestartAttempt`]
    /// or `None` if the gate rejected the restart.
    pub async fn restart(&self, failed_agent_id: Uuid, forced: bool) -> DomainResult<Option<RestartAttempt>> {
        let failed_agent = self
            .agent_repository
            .get(failed_agent_id)
            .await?
            .ok_or_else(|| CoreError::not_found("agent", failed_agent_id.to_string()))?;

        if !forced {
            if let Some(state) = self.guardian_repository.cooldown(failed_agent_id).await? {
                let now = self.clock.now();
                if now < state.until || state.attempt_count >= self.config.max_restarts {
                    tracing::info!(agent_id = %failed_agent_id, "restart rejected by cooldown gate");
                    return Ok(None);
                }
            }
        }

        let until = self.clock.now() + Duration::seconds(self.config.cooldown_seconds);
        self.guardian_repository.start_cooldown(failed_agent_id, until).await?;

        let reassigned_task_ids = self.drain(&failed_agent).await?;

        let replacement = self
            .status_manager
            .register(
                failed_agent.kind,
                failed_agent.phase.clone(),
                failed_agent.capabilities.clone(),
                failed_agent.capacity,
                failed_agent.tags.clone(),
            )
            .await?;

        self.status_manager
            .transition_status(failed_agent_id, AgentStatus::Terminated, "restart", "restart_orchestrator", None, None, true)
            .await?;

        let authority_level = if forced { AuthorityLevel::Guardian } else { AuthorityLevel::Monitor };
        let attempt = RestartAttempt {
            id: Uuid::new_v4(),
            failed_agent_id,
            replacement_agent_id: Some(replacement.id),
            reason: "unresponsive".to_string(),
            reassigned_task_ids: reassigned_task_ids.clone(),
            initiated_at: self.clock.now(),
            authority_level,
            forced,
        };
        self.guardian_repository.record_restart(&attempt).await?;
        self.guardian_repository
            .record_action(&GuardianAction {
                id: Uuid::new_v4(),
                action_type: "restart_agent".to_string(),
                target: failed_agent_id,
                reason: attempt.reason.clone(),
                initiated_by: "restart_orchestrator".to_string(),
                authority_level,
                before: Some(serde_json::json!({"status": failed_agent.status.as_str()})),
                after: Some(serde_json::json!({
                    "status": AgentStatus::Terminated.as_str(),
                    "replacement_agent_id": replacement.id,
                })),
                executed_at: self.clock.now(),
                reverted_at: None,
            })
            .await?;

        self.event_bus
            .publish(
                EntityType::Agent,
                failed_agent_id,
                EventPayload::AgentRestarted {
                    agent_id: failed_agent_id,
                    replacement_agent_id: replacement.id,
                    reassigned_task_ids,
                    reason: attempt.reason.clone(),
                },
                serde_json::Value::Null,
            )
            .await?;

        Ok(Some(attempt))
    }

    /// Puts every in-flight task assigned to the failed agent back to
    /// `pending` without touching `retry_count`, publishing `TASK_REASSIGNED`
    /// for each. In flight means `{assigned, running, needs_validation}` — a
    /// task mid-validation goes back through normal dispatch so a fresh
    /// validator picks it up.
    async fn drain(&self, failed_agent: &Agent) -> DomainResult<Vec<Uuid>> {
        let active = self.task_repository.list_active_for_agent(failed_agent.id).await?;
        let mut reassigned = Vec::new();
        for mut task in active {
            if !matches!(task.status, TaskStatus::Assigned | TaskStatus::Running | TaskStatus::NeedsValidation) {
                continue;
            }
            task.force_status(TaskStatus::Pending, self.clock.now());
            task.assigned_agent_id = None;
            task.sandbox_id = None;
            self.task_repository.update(&task).await?;
            self.event_bus
                .publish(
                    EntityType::Task,
                    task.id,
                    EventPayload::TaskReassigned { task_id: task.id, previous_agent_id: failed_agent.id },
                    serde_json::Value::Null,
                )
                .await?;
            reassigned.push(task.id);
        }
        Ok(reassigned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        create_migrated_test_pool, SqliteAgentRepository, SqliteGuardianRepository, SqliteOutbox, SqliteTaskRepository,
    };
    use crate::domain::models::{AgentKind, Task, TaskPriority};
    use crate::domain::ports::SystemClock;
    use crate::services::event_bus::EventBusConfig;
    use std::collections::HashSet;

    async fn make_orchestrator() -> (RestartOrchestrator, Arc<dyn AgentRepository>, Arc<dyn TaskRepository>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let agent_repo: Arc<dyn AgentRepository> = Arc::new(SqliteAgentRepository::new(pool.clone()));
        let task_repo: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let guardian_repo: Arc<dyn GuardianRepository> = Arc::new(SqliteGuardianRepository::new(pool.clone()));
        let outbox = Arc::new(SqliteOutbox::new(pool));
        let event_bus = Arc::new(EventBus::new(outbox, EventBusConfig::default()));
        let clock = Arc::new(SystemClock);
        let status_manager = Arc::new(StatusManager::new(agent_repo.clone(), event_bus.clone(), clock.clone()));
        let orchestrator = RestartOrchestrator::new(
            agent_repo.clone(), task_repo.clone(), guardian_repo, status_manager, event_bus, clock, RestartConfig::default(),
        );
        (orchestrator, agent_repo, task_repo)
    }

    #[tokio::test]
    async fn restart_drains_tasks_and_creates_replacement() {
        let (orchestrator, agent_repo, task_repo) = make_orchestrator().await;
        let now = chrono::Utc::now();
        let mut failed = Agent::register(Uuid::new_v4(), AgentKind::Worker, None, HashSet::new(), 1, vec![], now);
        failed.status = AgentStatus::Failed;
        agent_repo.create(&failed).await.unwrap();

        let mut task = Task::new(
            Uuid::new_v4(), Uuid::new_v4(), None, "standard", TaskPriority::Medium, "x",
            HashSet::new(), HashSet::new(), 3, 600, None, now,
        );
        task.assigned_agent_id = Some(failed.id);
        task.transition_to(TaskStatus::Assigned, now).unwrap();
        task_repo.create(&task).await.unwrap();
        task_repo.update(&task).await.unwrap();

        let attempt = orchestrator.restart(failed.id, false).await.unwrap().unwrap();
        assert_eq!(attempt.reassigned_task_ids.len(), 1);
        assert!(attempt.replacement_agent_id.is_some());

        let drained = task_repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(drained.status, TaskStatus::Pending);
        assert!(drained.assigned_agent_id.is_none());

        let terminated = agent_repo.get(failed.id).await.unwrap().unwrap();
        assert_eq!(terminated.status, AgentStatus::Terminated);
    }

    #[tokio::test]
    async fn second_restart_within_cooldown_is_rejected() {
        let (orchestrator, agent_repo, _task_repo) = make_orchestrator().await;
        let now = chrono::Utc::now();
        let mut failed = Agent::register(Uuid::new_v4(), AgentKind::Worker, None, HashSet::new(), 1, vec![], now);
        failed.status = AgentStatus::Failed;
        agent_repo.create(&failed).await.unwrap();

        assert!(orchestrator.restart(failed.id, false).await.unwrap().is_some());

        // failed.id is now TERMINATED so a second restart() call against the
        // same id hits the cooldown gate rather than proceeding.
        let second = orchestrator.restart(failed.id, false).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn forced_restart_bypasses_cooldown() {
        let (orchestrator, agent_repo, _task_repo) = make_orchestrator().await;
        let now = chrono::Utc::now();
        let mut failed = Agent::register(Uuid::new_v4(), AgentKind::Worker, None, HashSet::new(), 1, vec![], now);
        failed.status = AgentStatus::Failed;
        agent_repo.create(&failed).await.unwrap();

        assert!(orchestrator.restart(failed.id, false).await.unwrap().is_some());
        assert!(orchestrator.restart(failed.id, true).await.unwrap().is_some());
    }
}
