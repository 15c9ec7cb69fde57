//! The agent registry and status manager: registration, the validated status
//! state machine, capability-ranked lookup, and the transition audit trail.
//! Sole writer of `Agent.status`; every transition commits an audit row and
//! publishes `AGENT_STATUS_CHANGED`.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::domain::errors::{CoreError, DomainResult};
use crate::domain::models::{Agent, AgentKind, AgentStatus, AgentStatusTransition, EntityType, EventPayload};
use crate::domain::ports::{AgentMatch, AgentRepository, Clock};
use crate::services::event_bus::EventBus;

/// Application service fronting the [`AgentRepository`] port with the
/// control-plane's registration and status-transition rules.
pub struct StatusManager {
    repository: Arc<dyn AgentRepository>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl StatusManager {
    #[must_use]
    pub fn new(repository: Arc<dyn AgentRepository>, event_bus: Arc<EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, event_bus, clock }
    }

    /// Creates a new agent row in `SPAWNING`.
    pub async fn register(
        &self,
        kind: AgentKind,
        phase: Option<String>,
        capabilities: HashSet<String>,
        capacity: u32,
        tags: Vec<String>,
    ) -> DomainResult<Agent> {
        let agent = Agent::register(Uuid::new_v4(), kind, phase, capabilities, capacity, tags, self.clock.now());
        self.repository.create(&agent).await?;
        Ok(agent)
    }

    /// Marks a spawn as finished: `SPAWNING -> IDLE`.
    pub async fn complete(&self, agent_id: Uuid) -> DomainResult<Agent> {
        self.transition_status(agent_id, AgentStatus::Idle, "spawn complete", "system", None, None, false)
            .await
    }

    /// Validates against the state machine unless `force`, writes the audit
    /// row, publishes `AGENT_STATUS_CHANGED`.
    #[allow(clippy::too_many_arguments)]
    pub async fn transition_status(
        &self,
        agent_id: Uuid,
        to: AgentStatus,
        reason: &str,
        triggered_by: &str,
        task_id: Option<Uuid>,
        metadata: Option<serde_json::Value>,
        force: bool,
    ) -> DomainResult<Agent> {
        let mut agent = self
            .repository
            .get(agent_id)
            .await?
            .ok_or_else(|| CoreError::not_found("agent", agent_id.to_string()))?;

        if !force && !agent.status.can_transition_to(to) {
            return Err(CoreError::Contract(format!(
                "invalid agent transition {} -> {} for agent {agent_id}",
                agent.status, to
            )));
        }
        let previous = agent.status;
        agent.status = to;
        agent.updated_at = self.clock.now();
        self.repository.update(&agent).await?;

        let transition = AgentStatusTransition {
            id: Uuid::new_v4(),
            agent_id,
            from: previous,
            to,
            reason: reason.to_string(),
            triggered_by: triggered_by.to_string(),
            task_id,
            metadata: metadata.unwrap_or(serde_json::Value::Null),
            at: self.clock.now(),
        };
        self.repository.record_transition(&transition).await?;

        self.event_bus
            .publish(
                EntityType::Agent,
                agent_id,
                EventPayload::AgentStatusChanged {
                    agent_id,
                    previous_status: previous.as_str().to_string(),
                    new_status: to.as_str().to_string(),
                    reason: reason.to_string(),
                    task_id,
                    triggered_by: triggered_by.to_string(),
                },
                serde_json::Value::Null,
            )
            .await?;

        Ok(agent)
    }

    /// Ranks `IDLE` agents by capability score and returns the best match at
    /// or above the 0.5 threshold (enforced by the repository).
    pub async fn find_best_fit(
        &self,
        required_caps: &HashSet<String>,
        phase: Option<&str>,
        kind: Option<AgentKind>,
    ) -> DomainResult<Option<AgentMatch>> {
        self.repository.find_best_fit(required_caps, phase, kind).await
    }

    /// Ranked candidate list, best first.
    pub async fn search(
        &self,
        required_caps: &HashSet<String>,
        phase: Option<&str>,
        kind: Option<AgentKind>,
        limit: usize,
    ) -> DomainResult<Vec<AgentMatch>> {
        self.repository.search(required_caps, phase, kind, limit).await
    }

    /// Transition history for an agent, most recent first.
    pub async fn transition_history(&self, agent_id: Uuid, limit: usize) -> DomainResult<Vec<AgentStatusTransition>> {
        self.repository.transition_history(agent_id, limit).await
    }

    pub async fn get(&self, agent_id: Uuid) -> DomainResult<Option<Agent>> {
        self.repository.get(agent_id).await
    }

    pub async fn list_operational(&self) -> DomainResult<Vec<Agent>> {
        self.repository.list_operational().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteAgentRepository, SqliteOutbox};
    use crate::domain::ports::SystemClock;
    use crate::services::event_bus::EventBusConfig;

    async fn make_manager() -> StatusManager {
        let pool = create_migrated_test_pool().await.unwrap();
        let repository = Arc::new(SqliteAgentRepository::new(pool.clone()));
        let outbox = Arc::new(SqliteOutbox::new(pool));
        let event_bus = Arc::new(EventBus::new(outbox, EventBusConfig::default()));
        StatusManager::new(repository, event_bus, Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn register_then_complete_reaches_idle() {
        let manager = make_manager().await;
        let agent = manager
            .register(AgentKind::Worker, None, HashSet::new(), 1, vec![])
            .await
            .unwrap();
        assert_eq!(agent.status, AgentStatus::Spawning);

        let completed = manager.complete(agent.id).await.unwrap();
        assert_eq!(completed.status, AgentStatus::Idle);

        let history = manager.transition_history(agent.id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].to, AgentStatus::Idle);
    }

    #[tokio::test]
    async fn illegal_transition_without_force_is_rejected() {
        let manager = make_manager().await;
        let agent = manager
            .register(AgentKind::Worker, None, HashSet::new(), 1, vec![])
            .await
            .unwrap();

        let result = manager
            .transition_status(agent.id, AgentStatus::Running, "bad", "test", None, None, false)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_agent_is_not_found() {
        let manager = make_manager().await;
        let result = manager
            .transition_status(Uuid::new_v4(), AgentStatus::Idle, "x", "test", None, None, false)
            .await;
        assert!(matches!(result, Err(CoreError::NotFound { .. })));
    }
}
