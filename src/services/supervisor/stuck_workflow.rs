//! Stuck-workflow detector: finds tickets with no recent task progress and
//! spawns a diagnostic agent, honoring a per-ticket cooldown.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentKind, EntityType, EventPayload};
use crate::domain::ports::{AgentRuntime, Clock, ExecutionMode, GuardianRepository, SpawnRequest, TicketRepository};
use crate::services::event_bus::EventBus;

#[derive(Debug, Clone, Copy)]
pub struct StuckWorkflowConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
    pub min_stuck_seconds: i64,
    pub cooldown_seconds: i64,
}

impl Default for StuckWorkflowConfig {
    fn default() -> Self {
        Self { enabled: true, poll_interval: Duration::from_secs(60), min_stuck_seconds: 1800, cooldown_seconds: 300 }
    }
}

pub struct StuckWorkflowDetector {
    ticket_repository: Arc<dyn TicketRepository>,
    guardian_repository: Arc<dyn GuardianRepository>,
    runtime: Arc<dyn AgentRuntime>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: StuckWorkflowConfig,
}

impl StuckWorkflowDetector {
    #[must_use]
    pub fn new(
        ticket_repository: Arc<dyn TicketRepository>,
        guardian_repository: Arc<dyn GuardianRepository>,
        runtime: Arc<dyn AgentRuntime>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: StuckWorkflowConfig,
    ) -> Self {
        Self { ticket_repository, guardian_repository, runtime, event_bus, clock, config }
    }

    pub async fn run(&self, cancel: tokio_util::sync::CancellationToken) {
        loop {
            if self.config.enabled {
                if let Err(e) = self.tick().await {
                    tracing::error!(error = %e, "stuck-workflow detector tick failed");
                }
            }
            tokio::select! {
                () = cancel.cancelled() => { tracing::info!("stuck-workflow detector shutting down"); return; }
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    pub async fn tick(&self) -> DomainResult<usize> {
        let now = self.clock.now();
        let mut flagged = 0;
        for ticket in self.ticket_repository.list_active().await? {
            let idle_seconds = (now - ticket.last_progress_at.unwrap_or(ticket.created_at)).num_seconds();
            if idle_seconds < self.config.min_stuck_seconds {
                continue;
            }
            if let Some(state) = self.guardian_repository.cooldown(ticket.id).await? {
                if now < state.until {
                    continue;
                }
            }

            let diagnostic_agent_id = Uuid::new_v4();
            self.runtime
                .spawn(SpawnRequest {
                    task_id: ticket.id,
                    agent_id: diagnostic_agent_id,
                    phase: ticket.phase.clone(),
                    kind: AgentKind::Diagnostic,
                    execution_mode: ExecutionMode::InProcess,
                    project_id: None,
                    extra_env: vec![],
                })
                .await?;
            self.guardian_repository
                .start_cooldown(ticket.id, now + chrono::Duration::seconds(self.config.cooldown_seconds))
                .await?;

            self.event_bus
                .publish(
                    EntityType::Ticket,
                    ticket.id,
                    EventPayload::TicketStuck { ticket_id: ticket.id, idle_seconds, diagnostic_agent_id },
                    serde_json::Value::Null,
                )
                .await?;
            flagged += 1;
        }
        Ok(flagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::runtime::MockRuntime;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteGuardianRepository, SqliteOutbox, SqliteTicketRepository};
    use crate::domain::models::Ticket;
    use crate::domain::ports::FixedClock;
    use crate::services::event_bus::EventBusConfig;

    #[tokio::test]
    async fn idle_ticket_past_threshold_spawns_diagnostic_and_respects_cooldown() {
        let pool = create_migrated_test_pool().await.unwrap();
        let ticket_repo: Arc<dyn TicketRepository> = Arc::new(SqliteTicketRepository::new(pool.clone()));
        let guardian_repo: Arc<dyn GuardianRepository> = Arc::new(SqliteGuardianRepository::new(pool.clone()));
        let outbox = Arc::new(SqliteOutbox::new(pool));
        let event_bus = Arc::new(EventBus::new(outbox, EventBusConfig::default()));
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));

        let ticket = Ticket::new(Uuid::new_v4(), "stalled migration", None, None, clock.now());
        ticket_repo.create(&ticket).await.unwrap();

        let runtime = Arc::new(MockRuntime::new());
        let config = StuckWorkflowConfig { min_stuck_seconds: 60, ..StuckWorkflowConfig::default() };
        let detector = StuckWorkflowDetector::new(ticket_repo, guardian_repo, runtime, event_bus, clock.clone(), config);

        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(detector.tick().await.unwrap(), 0);

        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(detector.tick().await.unwrap(), 1);

        // Same tick immediately after: cooldown suppresses a duplicate spawn.
        assert_eq!(detector.tick().await.unwrap(), 0);
    }
}
