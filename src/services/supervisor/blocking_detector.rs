//! Blocking detector loop: flags tickets with no task progress for a long
//! window as `BLOCKED`, distinct from the shorter-fused stuck-workflow
//! detector which only diagnoses rather than changing ticket status.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::DomainResult;
use crate::domain::models::{EntityType, EventPayload, TicketStatus};
use crate::domain::ports::{Clock, TicketRepository};
use crate::services::event_bus::EventBus;

#[derive(Debug, Clone, Copy)]
pub struct BlockingDetectorConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
    pub threshold_seconds: i64,
}

impl Default for BlockingDetectorConfig {
    fn default() -> Self {
        Self { enabled: true, poll_interval: Duration::from_secs(300), threshold_seconds: 1800 }
    }
}

pub struct BlockingDetector {
    ticket_repository: Arc<dyn TicketRepository>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: BlockingDetectorConfig,
}

impl BlockingDetector {
    #[must_use]
    pub fn new(
        ticket_repository: Arc<dyn TicketRepository>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: BlockingDetectorConfig,
    ) -> Self {
        Self { ticket_repository, event_bus, clock, config }
    }

    pub async fn run(&self, cancel: tokio_util::sync::CancellationToken) {
        loop {
            if self.config.enabled {
                if let Err(e) = self.tick().await {
                    tracing::error!(error = %e, "blocking detector tick failed");
                }
            }
            tokio::select! {
                () = cancel.cancelled() => { tracing::info!("blocking detector shutting down"); return; }
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    pub async fn tick(&self) -> DomainResult<usize> {
        let now = self.clock.now();
        let mut blocked = 0;
        for mut ticket in self.ticket_repository.list_active().await? {
            let idle_seconds = (now - ticket.last_progress_at.unwrap_or(ticket.created_at)).num_seconds();
            if idle_seconds < self.config.threshold_seconds {
                continue;
            }

            let blocker_type = "no_task_progress".to_string();
            ticket.status = TicketStatus::Blocked;
            ticket.blocked_reason = Some(format!("no task progress for {idle_seconds}s"));
            ticket.updated_at = now;
            self.ticket_repository.update(&ticket).await?;

            self.event_bus
                .publish(
                    EntityType::Ticket,
                    ticket.id,
                    EventPayload::TicketBlocked { ticket_id: ticket.id, blocker_type },
                    serde_json::Value::Null,
                )
                .await?;
            blocked += 1;
        }
        Ok(blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteOutbox, SqliteTicketRepository};
    use crate::domain::models::Ticket;
    use crate::domain::ports::FixedClock;
    use crate::services::event_bus::EventBusConfig;
    use uuid::Uuid;

    #[tokio::test]
    async fn idle_ticket_past_threshold_is_blocked() {
        let pool = create_migrated_test_pool().await.unwrap();
        let ticket_repo: Arc<dyn TicketRepository> = Arc::new(SqliteTicketRepository::new(pool.clone()));
        let outbox = Arc::new(SqliteOutbox::new(pool));
        let event_bus = Arc::new(EventBus::new(outbox, EventBusConfig::default()));
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));

        let ticket = Ticket::new(Uuid::new_v4(), "no-progress workflow", None, None, clock.now());
        ticket_repo.create(&ticket).await.unwrap();

        let config = BlockingDetectorConfig { threshold_seconds: 60, ..BlockingDetectorConfig::default() };
        let detector = BlockingDetector::new(ticket_repo.clone(), event_bus, clock.clone(), config);

        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(detector.tick().await.unwrap(), 0);

        clock.advance(chrono::Duration::seconds(60));
        assert_eq!(detector.tick().await.unwrap(), 1);

        let refreshed = ticket_repo.get(ticket.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, TicketStatus::Blocked);
        assert!(refreshed.blocked_reason.is_some());
    }
}
