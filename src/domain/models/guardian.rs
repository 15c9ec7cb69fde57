//! Audit records for privileged fleet actions: restarts, steering
//! interventions, and the generic before/after action log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::AuthorityLevel;

/// A privileged action taken against the fleet: a restart, a forced status
/// change, or a routed intervention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianAction {
    pub id: Uuid,
    pub action_type: String,
    pub target: Uuid,
    pub reason: String,
    pub initiated_by: String,
    pub authority_level: AuthorityLevel,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub executed_at: DateTime<Utc>,
    pub reverted_at: Option<DateTime<Utc>>,
}

/// One attempt by the restart orchestrator to replace a failed agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartAttempt {
    pub id: Uuid,
    pub failed_agent_id: Uuid,
    pub replacement_agent_id: Option<Uuid>,
    pub reason: String,
    pub reassigned_task_ids: Vec<Uuid>,
    pub initiated_at: DateTime<Utc>,
    pub authority_level: AuthorityLevel,
    pub forced: bool,
}

/// Audit record for a single guardian steering message. The routing decision
/// and whether transport actually succeeded are separate booleans: a message
/// that failed to deliver is still an intervention worth remembering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionRecord {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub task_id: Uuid,
    pub message: String,
    pub routed_to_sandbox: bool,
    pub delivered: bool,
    pub recorded_at: DateTime<Utc>,
}
