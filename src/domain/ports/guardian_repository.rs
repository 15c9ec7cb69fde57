//! Port for restart cooldowns and the privileged-action audit trail.
//!
//! The cooldown table is keyed by a bare UUID on purpose: the restart
//! orchestrator keys it by agent id, the stuck-workflow detector by ticket
//! id, so one table covers every "don't act on this entity again yet" case
//! and survives a control-plane restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{GuardianAction, InterventionRecord, RestartAttempt};

/// An agent's current restart cooldown state, if any restart has ever been
/// attempted for it.
#[derive(Debug, Clone, Copy)]
pub struct CooldownState {
    pub until: DateTime<Utc>,
    pub attempt_count: u32,
}

#[async_trait]
pub trait GuardianRepository: Send + Sync {
    /// Reads the agent's current cooldown row, if any.
    async fn cooldown(&self, agent_id: Uuid) -> DomainResult<Option<CooldownState>>;

    /// Upserts the cooldown row, bumping `attempt_count` by one.
    async fn start_cooldown(&self, agent_id: Uuid, until: DateTime<Utc>) -> DomainResult<u32>;

    /// Appends a restart audit row.
    async fn record_restart(&self, attempt: &RestartAttempt) -> DomainResult<()>;

    /// Appends an intervention audit row.
    async fn record_intervention(&self, record: &InterventionRecord) -> DomainResult<()>;

    /// Appends a generic privileged-action audit row with before/after state.
    async fn record_action(&self, action: &GuardianAction) -> DomainResult<()>;
}
