//! The heartbeat wire format and its canonical checksum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::agent::AgentStatus;

/// Heartbeat payload over the wire. The checksum covers every other field
/// in canonical sorted-key JSON; see [`HeartbeatMessage::compute_checksum`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub agent_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub sequence_number: u64,
    pub status: AgentStatus,
    pub current_task_id: Option<Uuid>,
    pub health_metrics: serde_json::Value,
    pub checksum: String,
}

impl HeartbeatMessage {
    /// Builds and checksums a heartbeat in one step, the shape an emitter uses.
    #[must_use]
    pub fn build(
        agent_id: Uuid,
        timestamp: DateTime<Utc>,
        sequence_number: u64,
        status: AgentStatus,
        current_task_id: Option<Uuid>,
        health_metrics: serde_json::Value,
    ) -> Self {
        let mut msg = Self {
            agent_id,
            timestamp,
            sequence_number,
            status,
            current_task_id,
            health_metrics,
            checksum: String::new(),
        };
        msg.checksum = msg.compute_checksum();
        msg
    }

    /// Canonical JSON (UTF-8, sorted keys) of every field except `checksum`,
    /// SHA-256 hex-lowercase. A `BTreeMap` gives deterministic key order
    /// without depending on a particular `serde_json` feature flag.
    #[must_use]
    pub fn compute_checksum(&self) -> String {
        let mut fields: BTreeMap<&'static str, serde_json::Value> = BTreeMap::new();
        fields.insert("agent_id", serde_json::json!(self.agent_id));
        fields.insert("timestamp", serde_json::json!(self.timestamp));
        fields.insert("sequence_number", serde_json::json!(self.sequence_number));
        fields.insert("status", serde_json::json!(self.status));
        fields.insert("current_task_id", serde_json::json!(self.current_task_id));
        fields.insert("health_metrics", self.health_metrics.clone());

        let canonical =
            serde_json::to_string(&fields).expect("BTreeMap<&str, Value> always serializes");
        let digest = Sha256::digest(canonical.as_bytes());
        hex_lower(&digest)
    }

    /// True iff the embedded checksum matches a fresh computation; tampering
    /// any field other than `checksum` flips this.
    #[must_use]
    pub fn verify_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Escalation level published alongside `HEARTBEAT_MISSED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationLevel {
    Warn,
    Degraded,
    Unresponsive,
}

/// Ack returned by the heartbeat receiver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub agent_id: Uuid,
    pub sequence_number: u64,
    pub received: bool,
    pub message: Option<String>,
    pub gaps: Vec<u64>,
}

impl HeartbeatAck {
    #[must_use]
    pub fn rejected(agent_id: Uuid, sequence_number: u64, message: &str) -> Self {
        Self {
            agent_id,
            sequence_number,
            received: false,
            message: Some(message.to_string()),
            gaps: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_for_identical_payloads() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let a = HeartbeatMessage::build(id, now, 1, AgentStatus::Idle, None, serde_json::json!({}));
        let b = HeartbeatMessage::build(id, now, 1, AgentStatus::Idle, None, serde_json::json!({}));
        assert_eq!(a.checksum, b.checksum);
        assert!(a.verify_checksum());
    }

    #[test]
    fn tampering_any_field_flips_verification() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let mut msg =
            HeartbeatMessage::build(id, now, 1, AgentStatus::Idle, None, serde_json::json!({}));
        msg.sequence_number = 2;
        assert!(!msg.verify_checksum());
    }

    #[test]
    fn tampering_checksum_field_itself_is_detected() {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let mut msg =
            HeartbeatMessage::build(id, now, 1, AgentStatus::Idle, None, serde_json::json!({}));
        msg.checksum = "deadbeef".to_string();
        assert!(!msg.verify_checksum());
    }
}
