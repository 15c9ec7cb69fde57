//! Approval-timeout loop: moves a ticket awaiting human review past its
//! deadline into `TIMED_OUT`.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::errors::DomainResult;
use crate::domain::models::{EntityType, EventPayload, TicketStatus};
use crate::domain::ports::{Clock, TicketRepository};
use crate::services::event_bus::EventBus;

#[derive(Debug, Clone, Copy)]
pub struct ApprovalTimeoutConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
}

impl Default for ApprovalTimeoutConfig {
    fn default() -> Self {
        Self { enabled: true, poll_interval: Duration::from_secs(10) }
    }
}

pub struct ApprovalTimeoutWatcher {
    ticket_repository: Arc<dyn TicketRepository>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: ApprovalTimeoutConfig,
}

impl ApprovalTimeoutWatcher {
    #[must_use]
    pub fn new(
        ticket_repository: Arc<dyn TicketRepository>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: ApprovalTimeoutConfig,
    ) -> Self {
        Self { ticket_repository, event_bus, clock, config }
    }

    pub async fn run(&self, cancel: tokio_util::sync::CancellationToken) {
        loop {
            if self.config.enabled {
                if let Err(e) = self.tick().await {
                    tracing::error!(error = %e, "approval-timeout watcher tick failed");
                }
            }
            tokio::select! {
                () = cancel.cancelled() => { tracing::info!("approval-timeout watcher shutting down"); return; }
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    pub async fn tick(&self) -> DomainResult<usize> {
        let now = self.clock.now();
        let mut timed_out = 0;
        for mut ticket in self.ticket_repository.list_by_status(TicketStatus::PendingReview).await? {
            let Some(deadline) = ticket.deadline else { continue };
            if now < deadline {
                continue;
            }

            ticket.status = TicketStatus::TimedOut;
            ticket.updated_at = now;
            self.ticket_repository.update(&ticket).await?;

            self.event_bus
                .publish(
                    EntityType::Ticket,
                    ticket.id,
                    EventPayload::TicketApprovalTimedOut { ticket_id: ticket.id, deadline },
                    serde_json::Value::Null,
                )
                .await?;
            timed_out += 1;
        }
        Ok(timed_out)
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
    async fn ticket_past_deadline_times_out() {
        let pool = create_migrated_test_pool().await.unwrap();
        let ticket_repo: Arc<dyn TicketRepository> = Arc::new(SqliteTicketRepository::new(pool.clone()));
        let outbox = Arc::new(SqliteOutbox::new(pool));
        let event_bus = Arc::new(EventBus::new(outbox, EventBusConfig::default()));
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));

        let mut ticket = Ticket::new(Uuid::new_v4(), "needs sign-off", None, None, clock.now());
        ticket.status = TicketStatus::PendingReview;
        ticket.deadline = Some(clock.now() + chrono::Duration::seconds(30));
        ticket_repo.create(&ticket).await.unwrap();

        let watcher = ApprovalTimeoutWatcher::new(ticket_repo.clone(), event_bus, clock.clone(), ApprovalTimeoutConfig::default());

        assert_eq!(watcher.tick().await.unwrap(), 0);

        clock.advance(chrono::Duration::seconds(31));
        assert_eq!(watcher.tick().await.unwrap(), 1);

        let refreshed = ticket_repo.get(ticket.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, TicketStatus::TimedOut);
    }
}
