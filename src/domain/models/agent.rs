//! The `Agent` entity and its status state machine: one row per live agent,
//! one seven-state machine, and the append-only transition audit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Tagged variant over "agent kinds" — dispatch on the tag, no inheritance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Worker,
    Monitor,
    Watchdog,
    Guardian,
    Validator,
    Diagnostic,
}

impl AgentKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Monitor => "monitor",
            Self::Watchdog => "watchdog",
            Self::Guardian => "guardian",
            Self::Validator => "validator",
            Self::Diagnostic => "diagnostic",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authority levels gating who may initiate privileged actions, in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityLevel {
    Worker,
    Watchdog,
    Monitor,
    Guardian,
}

/// The seven-state agent status machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentStatus {
    Spawning,
    Idle,
    Running,
    Degraded,
    Failed,
    Quarantined,
    Terminated,
}

impl AgentStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spawning => "SPAWNING",
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Degraded => "DEGRADED",
            Self::Failed => "FAILED",
            Self::Quarantined => "QUARANTINED",
            Self::Terminated => "TERMINATED",
        }
    }

    /// Parses the canonical upper-case form written by the store. Legacy rows
    /// sometimes carry lower-case statuses; normalization happens once, here,
    /// at the storage boundary.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SPAWNING" => Some(Self::Spawning),
            "IDLE" => Some(Self::Idle),
            "RUNNING" => Some(Self::Running),
            "DEGRADED" => Some(Self::Degraded),
            "FAILED" => Some(Self::Failed),
            "QUARANTINED" => Some(Self::Quarantined),
            "TERMINATED" => Some(Self::Terminated),
            _ => None,
        }
    }

    /// `TERMINATED` is the only terminal status; a terminated agent id is never reanimated.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }

    /// Eligible for task assignment.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Idle | Self::Running)
    }

    /// Alive in any sense (counted by the heartbeat monitor).
    #[must_use]
    pub const fn is_operational(self) -> bool {
        matches!(self, Self::Idle | Self::Running | Self::Degraded)
    }

    /// The permitted-transition table. `force=true` bypasses this at the call
    /// site in [`crate::services::status_manager::StatusManager`].
    #[must_use]
    pub const fn valid_transitions(self) -> &'static [Self] {
        match self {
            Self::Spawning => &[Self::Idle, Self::Failed, Self::Terminated],
            Self::Idle => &[
                Self::Running,
                Self::Degraded,
                Self::Quarantined,
                Self::Terminated,
            ],
            Self::Running => &[Self::Idle, Self::Degraded, Self::Failed, Self::Quarantined],
            Self::Degraded => &[Self::Idle, Self::Failed, Self::Quarantined, Self::Terminated],
            Self::Failed => &[Self::Quarantined, Self::Terminated],
            Self::Quarantined => &[Self::Idle, Self::Terminated],
            Self::Terminated => &[],
        }
    }

    /// Whether `self → to` is a legal, non-forced transition. Same-state
    /// transitions always require `force=true`, matching every other edge.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        to != self && self.valid_transitions().contains(&to)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health label independent of the status machine: a status can be `DEGRADED`
/// while the health label still says why (`stale` vs `unresponsive`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLabel {
    Healthy,
    Degraded,
    Stale,
    Unresponsive,
    Quarantined,
}

/// Live agent row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub kind: AgentKind,
    pub phase: Option<String>,
    pub capabilities: HashSet<String>,
    pub capacity: u32,
    pub status: AgentStatus,
    pub health: HealthLabel,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub expected_next_sequence: u64,
    pub current_sequence: u64,
    pub consecutive_missed: u32,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Registers a new agent in `SPAWNING`; it reaches `IDLE` once the
    /// registry marks the spawn complete.
    #[must_use]
    pub fn register(
        id: Uuid,
        kind: AgentKind,
        phase: Option<String>,
        capabilities: HashSet<String>,
        capacity: u32,
        tags: Vec<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind,
            phase,
            capabilities,
            capacity,
            status: AgentStatus::Spawning,
            health: HealthLabel::Healthy,
            last_heartbeat: None,
            expected_next_sequence: 1,
            current_sequence: 0,
            consecutive_missed: 0,
            tags,
            created_at: now,
            updated_at: now,
        }
    }

    /// TTL in seconds for the agent's current status/kind combination.
    /// Guardians get the long interval, monitors and watchdogs beat on the
    /// short one regardless of status, everyone else keys off whether they
    /// are running.
    #[must_use]
    pub const fn heartbeat_ttl_seconds(&self, idle: i64, running: i64, guardian: i64) -> i64 {
        match self.kind {
            AgentKind::Guardian => guardian,
            AgentKind::Monitor | AgentKind::Watchdog => running,
            AgentKind::Worker | AgentKind::Validator | AgentKind::Diagnostic => {
                match self.status {
                    AgentStatus::Running => running,
                    _ => idle,
                }
            }
        }
    }

    /// Capability score: the fraction of `required` this agent covers.
    /// An empty `required` set scores 1.0 (trivially satisfied).
    #[must_use]
    pub fn capability_match_score(&self, required: &HashSet<String>) -> f64 {
        if required.is_empty() {
            return 1.0;
        }
        let matched = required.intersection(&self.capabilities).count();
        matched as f64 / required.len() as f64
    }
}

/// Append-only audit record written on every status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatusTransition {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub from: AgentStatus,
    pub to: AgentStatus,
    pub reason: String,
    pub triggered_by: String,
    pub task_id: Option<Uuid>,
    pub metadata: serde_json::Value,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawning_permits_idle_failed_terminated_only() {
        assert!(AgentStatus::Spawning.can_transition_to(AgentStatus::Idle));
        assert!(AgentStatus::Spawning.can_transition_to(AgentStatus::Failed));
        assert!(AgentStatus::Spawning.can_transition_to(AgentStatus::Terminated));
        assert!(!AgentStatus::Spawning.can_transition_to(AgentStatus::Running));
        assert!(!AgentStatus::Spawning.can_transition_to(AgentStatus::Degraded));
        assert!(!AgentStatus::Spawning.can_transition_to(AgentStatus::Quarantined));
    }

    #[test]
    fn terminated_is_terminal_and_has_no_outgoing_edges() {
        assert!(AgentStatus::Terminated.is_terminal());
        assert!(AgentStatus::Terminated.valid_transitions().is_empty());
    }

    #[test]
    fn same_state_transition_is_never_valid_without_force() {
        for status in [
            AgentStatus::Spawning,
            AgentStatus::Idle,
            AgentStatus::Running,
            AgentStatus::Degraded,
            AgentStatus::Failed,
            AgentStatus::Quarantined,
            AgentStatus::Terminated,
        ] {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn active_is_a_subset_of_operational() {
        assert!(AgentStatus::Idle.is_active());
        assert!(AgentStatus::Running.is_active());
        assert!(!AgentStatus::Degraded.is_active());

        assert!(AgentStatus::Degraded.is_operational());
        assert!(!AgentStatus::Failed.is_operational());
    }

    #[test]
    fn status_round_trips_through_canonical_upper_case_string() {
        for status in [
            AgentStatus::Spawning,
            AgentStatus::Idle,
            AgentStatus::Running,
            AgentStatus::Degraded,
            AgentStatus::Failed,
            AgentStatus::Quarantined,
            AgentStatus::Terminated,
        ] {
            let parsed = AgentStatus::parse(status.as_str()).expect("round trip");
            assert_eq!(parsed, status);
            // Also accepts the lower-case form the legacy source sometimes wrote.
            let parsed_lower =
                AgentStatus::parse(&status.as_str().to_lowercase()).expect("round trip");
            assert_eq!(parsed_lower, status);
        }
    }

    #[test]
    fn heartbeat_ttl_follows_kind_then_status() {
        let mut agent = Agent::register(
            Uuid::new_v4(),
            AgentKind::Worker,
            None,
            HashSet::new(),
            1,
            vec![],
            Utc::now(),
        );
        agent.status = AgentStatus::Idle;
        assert_eq!(agent.heartbeat_ttl_seconds(30, 15, 60), 30);
        agent.status = AgentStatus::Running;
        assert_eq!(agent.heartbeat_ttl_seconds(30, 15, 60), 15);

        // Monitors and watchdogs beat on the short interval even while idle.
        agent.status = AgentStatus::Idle;
        agent.kind = AgentKind::Monitor;
        assert_eq!(agent.heartbeat_ttl_seconds(30, 15, 60), 15);
        agent.kind = AgentKind::Watchdog;
        assert_eq!(agent.heartbeat_ttl_seconds(30, 15, 60), 15);

        agent.kind = AgentKind::Guardian;
        agent.status = AgentStatus::Running;
        assert_eq!(agent.heartbeat_ttl_seconds(30, 15, 60), 60);
    }

    #[test]
    fn capability_score_is_intersection_over_required() {
        let mut caps = HashSet::new();
        caps.insert("bash".to_string());
        caps.insert("python".to_string());
        let agent = Agent::register(
            Uuid::new_v4(),
            AgentKind::Worker,
            None,
            caps,
            1,
            vec![],
            Utc::now(),
        );
        let mut required = HashSet::new();
        required.insert("bash".to_string());
        required.insert("rust".to_string());
        assert!((agent.capability_match_score(&required) - 0.5).abs() < f64::EPSILON);
    }
}
