//! Anomaly scorer loop: flags agents that stay above a composite anomaly
//! threshold for several consecutive readings and spawns a diagnostic agent.
//!
//! The score is computed directly from the health label and missed-heartbeat
//! counter the heartbeat protocol already maintains per agent. It is a
//! heuristic, not a statistical model.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentKind, EntityType, EventPayload, HealthLabel};
use crate::domain::ports::{AgentRepository, AgentRuntime, Clock, ExecutionMode, GuardianRepository, SpawnRequest};
use crate::services::event_bus::EventBus;

#[derive(Debug, Clone, Copy)]
pub struct AnomalyScorerConfig {
    pub enabled: bool,
    pub poll_interval: Duration,
    pub score_threshold: f64,
    pub consecutive_readings: u32,
    pub cooldown_seconds: i64,
}

impl Default for AnomalyScorerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval: Duration::from_secs(60),
            score_threshold: 0.8,
            consecutive_readings: 3,
            cooldown_seconds: 600,
        }
    }
}

pub struct AnomalyScorer {
    agent_repository: Arc<dyn AgentRepository>,
    guardian_repository: Arc<dyn GuardianRepository>,
    runtime: Arc<dyn AgentRuntime>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: AnomalyScorerConfig,
    /// Per-agent streak of consecutive above-threshold readings. In-memory
    /// only: a restart of the control plane resets the streak, which is fine
    /// since a genuinely anomalous agent keeps re-tripping it.
    streaks: Mutex<HashMap<Uuid, u32>>,
}

impl AnomalyScorer {
    #[must_use]
    pub fn new(
        agent_repository: Arc<dyn AgentRepository>,
        guardian_repository: Arc<dyn GuardianRepository>,
        runtime: Arc<dyn AgentRuntime>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: AnomalyScorerConfig,
    ) -> Self {
        Self { agent_repository, guardian_repository, runtime, event_bus, clock, config, streaks: Mutex::new(HashMap::new()) }
    }

    pub async fn run(&self, cancel: tokio_util::sync::CancellationToken) {
        loop {
            if self.config.enabled {
                if let Err(e) = self.tick().await {
                    tracing::error!(error = %e, "anomaly scorer tick failed");
                }
            }
            tokio::select! {
                () = cancel.cancelled() => { tracing::info!("anomaly scorer shutting down"); return; }
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Composite score in `[0, 1]`: weighted mix of missed-heartbeat ratio
    /// and the agent's own health label. No statistical baseline, just the
    /// signals the heartbeat protocol already maintains per agent.
    fn score(&self, consecutive_missed: u32, health: HealthLabel) -> f64 {
        let missed_component = (f64::from(consecutive_missed) / 3.0).min(1.0);
        let health_component = match health {
            HealthLabel::Healthy => 0.0,
            HealthLabel::Degraded => 0.4,
            HealthLabel::Stale => 0.7,
            HealthLabel::Unresponsive | HealthLabel::Quarantined => 1.0,
        };
        0.5f64.mul_add(missed_component, 0.5 * health_component)
    }

    pub async fn tick(&self) -> DomainResult<usize> {
        let now = self.clock.now();
        let mut flagged = 0;
        let operational = self.agent_repository.list_operational().await?;
        let mut streaks = self.streaks.lock().await;

        for agent in operational {
            let score = self.score(agent.consecutive_missed, agent.health);
            let streak = streaks.entry(agent.id).or_insert(0);
            if score < self.config.score_threshold {
                *streak = 0;
                continue;
            }
            *streak += 1;
            if *streak < self.config.consecutive_readings {
                continue;
            }
            *streak = 0;

            if let Some(state) = self.guardian_repository.cooldown(agent.id).await? {
                if now < state.until {
                    continue;
                }
            }

            let diagnostic_agent_id = Uuid::new_v4();
            self.runtime
                .spawn(SpawnRequest {
                    task_id: agent.id,
                    agent_id: diagnostic_agent_id,
                    phase: agent.phase.clone(),
                    kind: AgentKind::Diagnostic,
                    execution_mode: ExecutionMode::InProcess,
                    project_id: None,
                    extra_env: vec![],
                })
                .await?;
            self.guardian_repository
                .start_cooldown(agent.id, now + chrono::Duration::seconds(self.config.cooldown_seconds))
                .await?;

            self.event_bus
                .publish(
                    EntityType::Agent,
                    agent.id,
                    EventPayload::HeartbeatMissed {
                        agent_id: agent.id,
                        missed_count: agent.consecutive_missed,
                        escalation_level: "anomaly".to_string(),
                        action: Some(format!("diagnostic_agent:{diagnostic_agent_id}")),
                    },
                    serde_json::json!({"score": score}),
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
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteAgentRepository, SqliteGuardianRepository, SqliteOutbox};
    use crate::domain::models::HealthLabel;
    use crate::domain::ports::FixedClock;
    use crate::services::event_bus::EventBusConfig;
    use crate::services::status_manager::StatusManager;
    use std::collections::HashSet;

    #[tokio::test]
    async fn sustained_high_score_spawns_diagnostic_once_then_cools_down() {
        let pool = create_migrated_test_pool().await.unwrap();
        let agent_repo: Arc<dyn AgentRepository> = Arc::new(SqliteAgentRepository::new(pool.clone()));
        let guardian_repo: Arc<dyn GuardianRepository> = Arc::new(SqliteGuardianRepository::new(pool.clone()));
        let outbox = Arc::new(SqliteOutbox::new(pool));
        let event_bus = Arc::new(EventBus::new(outbox, EventBusConfig::default()));
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let status_manager = Arc::new(StatusManager::new(agent_repo.clone(), event_bus.clone(), clock.clone()));

        let agent = status_manager.register(AgentKind::Worker, None, HashSet::new(), 1, vec![]).await.unwrap();
        status_manager.complete(agent.id).await.unwrap();
        let mut refreshed = agent_repo.get(agent.id).await.unwrap().unwrap();
        refreshed.consecutive_missed = 3;
        refreshed.health = HealthLabel::Unresponsive;
        agent_repo.update(&refreshed).await.unwrap();

        let runtime = Arc::new(MockRuntime::new());
        let scorer = AnomalyScorer::new(agent_repo, guardian_repo, runtime, event_bus, clock, AnomalyScorerConfig::default());

        assert_eq!(scorer.tick().await.unwrap(), 0);
        assert_eq!(scorer.tick().await.unwrap(), 0);
        assert_eq!(scorer.tick().await.unwrap(), 1);
        // Cooldown active, streak reset: no immediate re-flag.
        assert_eq!(scorer.tick().await.unwrap(), 0);
    }
}
