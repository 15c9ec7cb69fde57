//! `SystemEvent` and its typed payload variants: the contract between the
//! control plane's publishers and whatever subscribes to the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque event identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    #[must_use]
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }
}

/// Monotonic per-bus sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

/// The kind of entity an event is about. Events about the same
/// `(entity_type, entity_id)` pair are delivered in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Agent,
    Task,
    Ticket,
    CoordinationPoint,
}

/// Typed event payload variants. Subscribers needing free-form data get the
/// `metadata` map on [`SystemEvent::metadata`] alongside the typed struct,
/// rather than a blob duplicated into every variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    AgentStatusChanged {
        agent_id: Uuid,
        previous_status: String,
        new_status: String,
        reason: String,
        task_id: Option<Uuid>,
        triggered_by: String,
    },
    HeartbeatReceived {
        agent_id: Uuid,
        sequence_number: u64,
        status: String,
        has_gaps: bool,
        health_metrics: serde_json::Value,
    },
    HeartbeatMissed {
        agent_id: Uuid,
        missed_count: u32,
        escalation_level: String,
        action: Option<String>,
    },
    AgentRestarted {
        agent_id: Uuid,
        replacement_agent_id: Uuid,
        reassigned_task_ids: Vec<Uuid>,
        reason: String,
    },
    TaskAssigned {
        task_id: Uuid,
        agent_id: Uuid,
    },
    TaskSandboxSpawned {
        task_id: Uuid,
        sandbox_id: String,
        agent_id: Uuid,
    },
    TaskCompleted {
        task_id: Uuid,
        result: Option<serde_json::Value>,
    },
    TaskFailed {
        task_id: Uuid,
        error: String,
        retry_count: u32,
        max_retries: u32,
        attempt: u32,
    },
    TaskPermanentlyFailed {
        task_id: Uuid,
        error: String,
        reason: String,
    },
    TaskRetryScheduled {
        task_id: Uuid,
        retry_count: u32,
        delay_seconds: f64,
    },
    TaskTimedOut {
        task_id: Uuid,
        timeout_seconds: i64,
        elapsed_time: i64,
    },
    TaskReassigned {
        task_id: Uuid,
        previous_agent_id: Uuid,
    },
    GuardianInterventionRouted {
        agent_id: Uuid,
        task_id: Uuid,
        routed_to_sandbox: bool,
        delivered: bool,
    },
    TicketStuck {
        ticket_id: Uuid,
        idle_seconds: i64,
        diagnostic_agent_id: Uuid,
    },
    TicketApprovalTimedOut {
        ticket_id: Uuid,
        deadline: DateTime<Utc>,
    },
    TicketBlocked {
        ticket_id: Uuid,
        blocker_type: String,
    },
    TaskValidationRequested {
        task_id: Uuid,
        agent_id: Option<Uuid>,
    },
    TaskValidationPassed {
        task_id: Uuid,
    },
    TaskValidationFailed {
        task_id: Uuid,
        reason: Option<String>,
    },
    CoordinationSyncTimedOut {
        point_id: Uuid,
        required_count: usize,
        completed_count: usize,
    },
    /// Sandbox-origin event (`agent.assistant_message`, `agent.tool_use`,
    /// and the rest of the `agent.*` family). Opaque to the control plane;
    /// forwarded to subscribers as-is.
    Sandbox {
        event_type: String,
        payload: serde_json::Value,
    },
}

impl EventPayload {
    /// The opaque `event_type` string the bus routes payloads by.
    #[must_use]
    pub fn event_type(&self) -> &str {
        match self {
            Self::AgentStatusChanged { .. } => "AGENT_STATUS_CHANGED",
            Self::HeartbeatReceived { .. } => "HEARTBEAT_RECEIVED",
            Self::HeartbeatMissed { .. } => "HEARTBEAT_MISSED",
            Self::AgentRestarted { .. } => "AGENT_RESTARTED",
            Self::TaskAssigned { .. } => "TASK_ASSIGNED",
            Self::TaskSandboxSpawned { .. } => "TASK_SANDBOX_SPAWNED",
            Self::TaskCompleted { .. } => "TASK_COMPLETED",
            Self::TaskFailed { .. } => "TASK_FAILED",
            Self::TaskPermanentlyFailed { .. } => "TASK_PERMANENTLY_FAILED",
            Self::TaskRetryScheduled { .. } => "TASK_RETRY_SCHEDULED",
            Self::TaskTimedOut { .. } => "TASK_TIMED_OUT",
            Self::TaskReassigned { .. } => "TASK_REASSIGNED",
            Self::GuardianInterventionRouted { .. } => "guardian.steering.intervention",
            Self::TicketStuck { .. } => "TICKET_STUCK",
            Self::TicketApprovalTimedOut { .. } => "TICKET_APPROVAL_TIMED_OUT",
            Self::TicketBlocked { .. } => "TICKET_BLOCKED",
            Self::TaskValidationRequested { .. } => "TASK_VALIDATION_REQUESTED",
            Self::TaskValidationPassed { .. } => "TASK_VALIDATION_PASSED",
            Self::TaskValidationFailed { .. } => "TASK_VALIDATION_FAILED",
            Self::CoordinationSyncTimedOut { .. } => "COORDINATION_SYNC_TIMED_OUT",
            Self::Sandbox { event_type, .. } => event_type.as_str(),
        }
    }
}

/// The bus's unit of delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemEvent {
    pub id: EventId,
    pub sequence: SequenceNumber,
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub payload: EventPayload,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl SystemEvent {
    #[must_use]
    pub fn event_type(&self) -> &str {
        self.payload.event_type()
    }

    /// Dedup key subscribers can use to make at-least-once delivery idempotent.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.event_type(),
            self.entity_id,
            self.occurred_at.timestamp_nanos_opt().unwrap_or_default()
        )
    }
}
