//! The `Task` entity, its ten-state status machine, and the retry/backoff
//! helpers the queue builds on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::domain::errors::CoreError;

/// `CRITICAL > HIGH > MEDIUM > LOW`, derives `Ord` so a `BinaryHeap`/`ORDER BY`
/// both rank tasks the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// The ten-state task machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    Running,
    NeedsValidation,
    PendingValidation,
    Completed,
    Failed,
    NeedsRevision,
    Cancelled,
    TimedOut,
}

impl TaskStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::Running => "running",
            Self::NeedsValidation => "needs_validation",
            Self::PendingValidation => "pending_validation",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::NeedsRevision => "needs_revision",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "assigned" => Some(Self::Assigned),
            "running" => Some(Self::Running),
            "needs_validation" => Some(Self::NeedsValidation),
            "pending_validation" => Some(Self::PendingValidation),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "needs_revision" => Some(Self::NeedsRevision),
            "cancelled" => Some(Self::Cancelled),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }

    /// `completed`, `cancelled` and `timed_out` freeze `result`/`error`;
    /// permanently-`failed` tasks also stay put, but the status itself keeps
    /// its retry edge open until the retry budget rules it out.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::TimedOut)
    }

    /// `assigned`/`running`/`needs_validation`: the set the restart
    /// orchestrator drains back to `pending` when an agent fails.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Assigned | Self::Running | Self::NeedsValidation)
    }

    #[must_use]
    pub const fn valid_transitions(self) -> &'static [Self] {
        match self {
            // `Failed` here covers the dispatcher's sandbox-spawn-failure
            // path, which fails a task before it is ever assigned.
            Self::Pending => &[Self::Assigned, Self::Cancelled, Self::Failed],
            Self::Assigned => &[Self::Running, Self::Cancelled, Self::Failed, Self::TimedOut],
            Self::Running => &[
                Self::NeedsValidation,
                Self::Completed,
                Self::Failed,
                Self::TimedOut,
                Self::NeedsRevision,
            ],
            Self::NeedsValidation => &[Self::PendingValidation, Self::Failed],
            Self::PendingValidation => &[Self::Completed, Self::NeedsRevision, Self::Failed],
            Self::NeedsRevision => &[Self::Pending, Self::Cancelled],
            Self::Failed => &[Self::Pending], // retry path only; permanent failure stays FAILED
            Self::Completed | Self::Cancelled | Self::TimedOut => &[],
        }
    }

    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        to != self && self.valid_transitions().contains(&to)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of schedulable work under a ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub ticket_id: Uuid,
    pub phase: Option<String>,
    pub task_type: String,
    pub description: String,
    pub priority: TaskPriority,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub assigned_agent_id: Option<Uuid>,
    pub sandbox_id: Option<String>,
    pub required_capabilities: HashSet<String>,
    pub dependencies: HashSet<Uuid>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub backoff_base_seconds: f64,
    pub timeout_seconds: i64,
    pub error_message: Option<String>,
    pub result: Option<serde_json::Value>,
    pub execution_config: Option<serde_json::Value>,
    pub conversation_id: Option<Uuid>,
    pub persistence_dir: Option<String>,
}

impl Task {
    /// Creates a new `pending` task. The dependency cycle check is the
    /// queue's job, since it needs the sibling tasks for context.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        id: Uuid,
        ticket_id: Uuid,
        phase: Option<String>,
        task_type: impl Into<String>,
        priority: TaskPriority,
        description: impl Into<String>,
        required_capabilities: HashSet<String>,
        dependencies: HashSet<Uuid>,
        max_retries: u32,
        timeout_seconds: i64,
        execution_config: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            ticket_id,
            phase,
            task_type: task_type.into(),
            description: description.into(),
            priority,
            status: TaskStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            assigned_agent_id: None,
            sandbox_id: None,
            required_capabilities,
            dependencies,
            retry_count: 0,
            max_retries,
            backoff_base_seconds: 1.0,
            timeout_seconds,
            error_message: None,
            result: None,
            execution_config,
            conversation_id: None,
            persistence_dir: None,
        }
    }

    /// A task is ready iff `pending` and every dependency id in `completed_ids`.
    #[must_use]
    pub fn is_ready(&self, completed_ids: &HashSet<Uuid>) -> bool {
        self.status == TaskStatus::Pending
            && self.dependencies.iter().all(|d| completed_ids.contains(d))
    }

    /// Validates and applies a status transition, stamping the matching
    /// timestamp.
    pub fn transition_to(&mut self, to: TaskStatus, now: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::Contract(format!(
                "task {} is terminal ({}); result/error are frozen",
                self.id, self.status
            )));
        }
        if !self.status.can_transition_to(to) {
            return Err(CoreError::Contract(format!(
                "invalid task transition {} -> {} for task {}",
                self.status, to, self.id
            )));
        }
        self.apply_transition(to, now);
        Ok(())
    }

    /// Bypasses the state machine for crash-recovery / administrative resets.
    pub fn force_status(&mut self, to: TaskStatus, now: DateTime<Utc>) {
        tracing::warn!(task_id = %self.id, from = %self.status, to = %to, "forcing task status outside state machine");
        self.apply_transition(to, now);
    }

    fn apply_transition(&mut self, to: TaskStatus, now: DateTime<Utc>) {
        if to == TaskStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if to.is_terminal() || to == TaskStatus::Failed {
            self.completed_at = Some(now);
        }
        self.status = to;
    }

    /// Failed, under the retry cap, and the error matches the
    /// retryable-substring set.
    #[must_use]
    pub fn should_retry(&self, retryable_substrings: &[String]) -> bool {
        self.status == TaskStatus::Failed
            && self.retry_count < self.max_retries
            && self
                .error_message
                .as_deref()
                .is_some_and(|msg| Self::is_retryable(msg, retryable_substrings))
    }

    /// Case-insensitive substring match against the configured retryable set.
    #[must_use]
    pub fn is_retryable(message: &str, retryable_substrings: &[String]) -> bool {
        let lower = message.to_lowercase();
        retryable_substrings
            .iter()
            .any(|needle| lower.contains(&needle.to_lowercase()))
    }

    /// Bumps the retry counter and moves back to `pending`.
    pub fn retry(&mut self, _now: DateTime<Utc>) {
        self.retry_count += 1;
        self.status = TaskStatus::Pending;
        self.started_at = None;
        self.completed_at = None;
    }

    /// Exponential backoff with jitter: `min(max, base * 2^retry_count) * jitter(0.75..1.25)`.
    #[must_use]
    pub fn backoff_delay_seconds(&self, max_delay_seconds: f64, jitter: f64) -> f64 {
        let raw = self.backoff_base_seconds * 2f64.powi(self.retry_count as i32);
        raw.min(max_delay_seconds) * jitter
    }

    /// Whether an in-flight task has outlived its timeout.
    #[must_use]
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, TaskStatus::Assigned | TaskStatus::Running)
            && self
                .started_at
                .is_some_and(|started| (now - started).num_seconds() > self.timeout_seconds)
    }
}
