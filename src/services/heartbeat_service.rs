//! The heartbeat receiver and the missed-heartbeat escalation scan.
//!
//! Agents beat on an adaptive interval keyed to their status; the receiver
//! verifies the checksum, tracks sequence gaps, and heals `DEGRADED` agents
//! back to `IDLE`. The scan walks every operational agent and climbs the
//! warn / degraded / unresponsive ladder one step per overdue interval.

use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentStatus, EntityType, EscalationLevel, EventPayload, HealthLabel, HeartbeatAck, HeartbeatMessage};
use crate::domain::ports::{AgentRepository, Clock};
use crate::services::event_bus::EventBus;
use crate::services::status_manager::StatusManager;

/// TTL seconds per agent status (guardians get their own, longer interval).
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub ttl_idle_seconds: i64,
    pub ttl_running_seconds: i64,
    pub ttl_guardian_seconds: i64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { ttl_idle_seconds: 30, ttl_running_seconds: 15, ttl_guardian_seconds: 60 }
    }
}

pub struct HeartbeatService {
    repository: Arc<dyn AgentRepository>,
    status_manager: Arc<StatusManager>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: HeartbeatConfig,
}

impl HeartbeatService {
    #[must_use]
    pub fn new(
        repository: Arc<dyn AgentRepository>,
        status_manager: Arc<StatusManager>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: HeartbeatConfig,
    ) -> Self {
        Self { repository, status_manager, event_bus, clock, config }
    }

    /// Verifies, applies and acks one heartbeat. Replaying the same message
    /// is harmless: `last_heartbeat` comes from the message's own timestamp,
    /// so a replay converges on the identical agent row.
    pub async fn receive(&self, msg: &HeartbeatMessage) -> DomainResult<HeartbeatAck> {
        if !msg.verify_checksum() {
            return Ok(HeartbeatAck::rejected(msg.agent_id, msg.sequence_number, "Checksum validation failed"));
        }

        let Some(mut agent) = self.repository.get(msg.agent_id).await? else {
            return Ok(HeartbeatAck::rejected(msg.agent_id, msg.sequence_number, "Agent not found"));
        };

        let mut gaps = Vec::new();
        let mut warning = None;
        if msg.sequence_number > agent.expected_next_sequence {
            gaps = (agent.expected_next_sequence..msg.sequence_number).collect();
            warning = Some(format!("sequence gap detected: missing {gaps:?}"));
        } else if msg.sequence_number < agent.current_sequence {
            // Out-of-order or duplicate delivery: accepted, but flagged so the
            // emitter can notice a misbehaving transport.
            warning = Some(format!(
                "out-of-order sequence {} (current {})",
                msg.sequence_number, agent.current_sequence
            ));
        }

        agent.last_heartbeat = Some(msg.timestamp);
        agent.current_sequence = msg.sequence_number;
        agent.expected_next_sequence = msg.sequence_number + 1;
        agent.consecutive_missed = 0;
        agent.health = HealthLabel::Healthy;
        agent.updated_at = self.clock.now();
        self.repository.update(&agent).await?;

        if matches!(agent.status, AgentStatus::Degraded) {
            self.status_manager
                .transition_status(agent.id, AgentStatus::Idle, "recovered", "heartbeat", None, None, false)
                .await?;
        }

        self.event_bus
            .publish(
                EntityType::Agent,
                agent.id,
                EventPayload::HeartbeatReceived {
                    agent_id: agent.id,
                    sequence_number: msg.sequence_number,
                    status: agent.status.as_str().to_string(),
                    has_gaps: !gaps.is_empty(),
                    health_metrics: msg.health_metrics.clone(),
                },
                serde_json::Value::Null,
            )
            .await?;

        Ok(HeartbeatAck { agent_id: agent.id, sequence_number: msg.sequence_number, received: true, message: warning, gaps })
    }

    /// Scans every operational agent and applies the escalation ladder:
    /// first overdue interval warns, the second degrades, the third marks
    /// the agent `FAILED` and unresponsive. Returns the ids of agents that
    /// reached `FAILED` this pass, for the heartbeat monitor loop to hand to
    /// the restart orchestrator.
    pub async fn check_missed_heartbeats(&self) -> DomainResult<Vec<uuid::Uuid>> {
        let now = self.clock.now();
        let mut newly_failed = Vec::new();

        for agent in self.repository.list_operational().await? {
            let ttl = agent.heartbeat_ttl_seconds(
                self.config.ttl_idle_seconds,
                self.config.ttl_running_seconds,
                self.config.ttl_guardian_seconds,
            );
            let overdue = agent
                .last_heartbeat
                .map_or(true, |last| (now - last).num_seconds() > ttl);
            if !overdue {
                continue;
            }

            let missed = agent.consecutive_missed + 1;
            let mut updated = agent.clone();
            updated.consecutive_missed = missed;
            updated.updated_at = now;
            self.repository.update(&updated).await?;

            let (level, action) = match missed {
                1 => (EscalationLevel::Warn, None),
                2 => (EscalationLevel::Degraded, None),
                _ => (EscalationLevel::Unresponsive, Some("Initiate restart protocol".to_string())),
            };

            match missed {
                1 => {}
                2 => {
                    let mut stale = self.repository.get(agent.id).await?.unwrap_or_else(|| updated.clone());
                    stale.health = HealthLabel::Stale;
                    self.repository.update(&stale).await?;
                    self.status_manager
                        .transition_status(agent.id, AgentStatus::Degraded, "heartbeat missed", "heartbeat_monitor", None, None, false)
                        .await?;
                }
                _ => {
                    let mut failed = self.repository.get(agent.id).await?.unwrap_or(updated);
                    failed.health = HealthLabel::Unresponsive;
                    self.repository.update(&failed).await?;
                    self.status_manager
                        .transition_status(agent.id, AgentStatus::Failed, "heartbeat unresponsive", "heartbeat_monitor", None, None, false)
                        .await?;
                    newly_failed.push(agent.id);
                }
            }

            self.event_bus
                .publish(
                    EntityType::Agent,
                    agent.id,
                    EventPayload::HeartbeatMissed {
                        agent_id: agent.id,
                        missed_count: missed,
                        escalation_level: level_str(level).to_string(),
                        action,
                    },
                    serde_json::Value::Null,
                )
                .await?;
        }

        Ok(newly_failed)
    }
}

fn level_str(level: EscalationLevel) -> &'static str {
    match level {
        EscalationLevel::Warn => "warn",
        EscalationLevel::Degraded => "degraded",
        EscalationLevel::Unresponsive => "unresponsive",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteAgentRepository, SqliteOutbox};
    use crate::domain::models::AgentKind;
    use crate::domain::ports::FixedClock;
    use crate::services::event_bus::EventBusConfig;
    use std::collections::HashSet;
    use uuid::Uuid;

    async fn make_service(clock: Arc<FixedClock>) -> (HeartbeatService, Arc<dyn AgentRepository>, Arc<StatusManager>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let repository: Arc<dyn AgentRepository> = Arc::new(SqliteAgentRepository::new(pool.clone()));
        let outbox = Arc::new(SqliteOutbox::new(pool));
        let event_bus = Arc::new(EventBus::new(outbox, EventBusConfig::default()));
        let status_manager = Arc::new(StatusManager::new(repository.clone(), event_bus.clone(), clock.clone()));
        let service = HeartbeatService::new(repository.clone(), status_manager.clone(), event_bus, clock, HeartbeatConfig::default());
        (service, repository, status_manager)
    }

    #[tokio::test]
    async fn receive_rejects_bad_checksum() {
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let (service, _repo, status_manager) = make_service(clock.clone()).await;
        let agent = status_manager
            .register(AgentKind::Worker, None, HashSet::new(), 1, vec![])
            .await
            .unwrap();

        let mut msg = HeartbeatMessage::build(agent.id, clock.now(), 1, AgentStatus::Idle, None, serde_json::json!({}));
        msg.checksum = "tampered".to_string();

        let ack = service.receive(&msg).await.unwrap();
        assert!(!ack.received);
        assert_eq!(ack.message.as_deref(), Some("Checksum validation failed"));
    }

    #[tokio::test]
    async fn receive_unknown_agent_is_rejected() {
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let (service, _repo, _sm) = make_service(clock.clone()).await;
        let msg = HeartbeatMessage::build(Uuid::new_v4(), clock.now(), 1, AgentStatus::Idle, None, serde_json::json!({}));
        let ack = service.receive(&msg).await.unwrap();
        assert!(!ack.received);
        assert_eq!(ack.message.as_deref(), Some("Agent not found"));
    }

    #[tokio::test]
    async fn sequence_gap_is_reported_in_ack() {
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let (service, repo, status_manager) = make_service(clock.clone()).await;
        let agent = status_manager
            .register(AgentKind::Worker, None, HashSet::new(), 1, vec![])
            .await
            .unwrap();
        status_manager.complete(agent.id).await.unwrap();

        let first = HeartbeatMessage::build(agent.id, clock.now(), 1, AgentStatus::Idle, None, serde_json::json!({}));
        let ack = service.receive(&first).await.unwrap();
        assert!(ack.received);
        assert!(ack.gaps.is_empty());

        // Skipping sequences 2 and 3.
        let fourth = HeartbeatMessage::build(agent.id, clock.now(), 4, AgentStatus::Idle, None, serde_json::json!({}));
        let ack = service.receive(&fourth).await.unwrap();
        assert!(ack.received);
        assert_eq!(ack.gaps, vec![2, 3]);

        let refreshed = repo.get(agent.id).await.unwrap().unwrap();
        assert_eq!(refreshed.expected_next_sequence, 5);
    }

    #[tokio::test]
    async fn replayed_heartbeat_is_idempotent() {
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let (service, repo, status_manager) = make_service(clock.clone()).await;
        let agent = status_manager
            .register(AgentKind::Worker, None, HashSet::new(), 1, vec![])
            .await
            .unwrap();
        status_manager.complete(agent.id).await.unwrap();

        let msg = HeartbeatMessage::build(agent.id, clock.now(), 7, AgentStatus::Idle, None, serde_json::json!({}));
        service.receive(&msg).await.unwrap();
        let after_first = repo.get(agent.id).await.unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(5));
        let ack = service.receive(&msg).await.unwrap();
        assert!(ack.received);

        let after_replay = repo.get(agent.id).await.unwrap().unwrap();
        assert_eq!(after_replay.current_sequence, after_first.current_sequence);
        assert_eq!(after_replay.expected_next_sequence, after_first.expected_next_sequence);
        assert_eq!(after_replay.last_heartbeat, after_first.last_heartbeat);
        assert_eq!(after_replay.consecutive_missed, 0);
    }

    #[tokio::test]
    async fn degraded_agent_recovers_to_idle_on_heartbeat() {
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let (service, repo, status_manager) = make_service(clock.clone()).await;
        let agent = status_manager
            .register(AgentKind::Worker, None, HashSet::new(), 1, vec![])
            .await
            .unwrap();
        status_manager.complete(agent.id).await.unwrap();

        clock.advance(chrono::Duration::seconds(40));
        service.check_missed_heartbeats().await.unwrap();
        clock.advance(chrono::Duration::seconds(40));
        service.check_missed_heartbeats().await.unwrap();
        assert_eq!(repo.get(agent.id).await.unwrap().unwrap().status, AgentStatus::Degraded);

        let msg = HeartbeatMessage::build(agent.id, clock.now(), 1, AgentStatus::Degraded, None, serde_json::json!({}));
        let ack = service.receive(&msg).await.unwrap();
        assert!(ack.received);

        let refreshed = repo.get(agent.id).await.unwrap().unwrap();
        assert_eq!(refreshed.status, AgentStatus::Idle);
        assert_eq!(refreshed.consecutive_missed, 0);
    }

    #[tokio::test]
    async fn missed_heartbeats_escalate_to_failed_after_three() {
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let (service, repo, status_manager) = make_service(clock.clone()).await;
        let agent = status_manager
            .register(AgentKind::Worker, None, HashSet::new(), 1, vec![])
            .await
            .unwrap();
        status_manager.complete(agent.id).await.unwrap();

        clock.advance(chrono::Duration::seconds(40));
        service.check_missed_heartbeats().await.unwrap();
        let after_first = repo.get(agent.id).await.unwrap().unwrap();
        assert_eq!(after_first.consecutive_missed, 1);
        assert_eq!(after_first.status, AgentStatus::Idle);

        clock.advance(chrono::Duration::seconds(40));
        service.check_missed_heartbeats().await.unwrap();
        let after_second = repo.get(agent.id).await.unwrap().unwrap();
        assert_eq!(after_second.status, AgentStatus::Degraded);

        clock.advance(chrono::Duration::seconds(40));
        service.check_missed_heartbeats().await.unwrap();
        let after_third = repo.get(agent.id).await.unwrap().unwrap();
        assert_eq!(after_third.status, AgentStatus::Failed);
        assert_eq!(after_third.health, HealthLabel::Unresponsive);
    }
}
