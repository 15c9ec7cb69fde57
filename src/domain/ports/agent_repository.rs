//! Port for `Agent` persistence, capability-ranked lookup, and the
//! transition audit log.

use async_trait::async_trait;
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Agent, AgentKind, AgentStatusTransition};

/// Ranked match returned by [`AgentRepository::find_best_fit`].
#[derive(Debug, Clone)]
pub struct AgentMatch {
    pub agent: Agent,
    pub score: f64,
    pub current_load: u32,
    /// Every assignment this agent has ever received, terminal tasks
    /// included; the final ranking tiebreak favors the less-used agent.
    pub lifetime_assignments: u64,
}

#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn create(&self, agent: &Agent) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<Agent>>;
    async fn update(&self, agent: &Agent) -> DomainResult<()>;

    /// Agents in `{IDLE, RUNNING, DEGRADED}`, the set the heartbeat monitor scans.
    async fn list_operational(&self) -> DomainResult<Vec<Agent>>;

    /// Ranks `IDLE` agents by capability match, ties broken by lower current
    /// load, then lower lifetime assignments. Returns `None` unless the best
    /// score is at least 0.5.
    async fn find_best_fit(
        &self,
        required_caps: &HashSet<String>,
        phase: Option<&str>,
        kind: Option<AgentKind>,
    ) -> DomainResult<Option<AgentMatch>>;

    /// Full ranked candidate list, best first, for observability/debugging.
    async fn search(
        &self,
        required_caps: &HashSet<String>,
        phase: Option<&str>,
        kind: Option<AgentKind>,
        limit: usize,
    ) -> DomainResult<Vec<AgentMatch>>;

    /// Appends a transition row; the caller (Status Manager) commits this in
    /// the same transaction as the `Agent` row update and the outbox event.
    async fn record_transition(&self, transition: &AgentStatusTransition) -> DomainResult<()>;

    /// Most-recent-first transition history for an agent.
    async fn transition_history(
        &self,
        agent_id: Uuid,
        limit: usize,
    ) -> DomainResult<Vec<AgentStatusTransition>>;

    /// Current count of tasks assigned/running under this agent, used for
    /// `find_best_fit`'s load tiebreak.
    async fn current_load(&self, agent_id: Uuid) -> DomainResult<u32>;

    /// Count of every task ever assigned to this agent, terminal states
    /// included, used for `find_best_fit`'s final tiebreak.
    async fn lifetime_assignments(&self, agent_id: Uuid) -> DomainResult<u64>;
}
