//! Ticket: the coarse unit of user intent a workflow breaks into tasks.
//! The control plane treats most of it as opaque; the fields here are the
//! minimum the supervisor loops (stuck-workflow, approval-timeout, blocking
//! detector) need to observe and flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Active,
    PendingReview,
    Completed,
    Blocked,
    TimedOut,
}

impl TicketStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PendingReview => "pending_review",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::TimedOut => "timed_out",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub status: TicketStatus,
    pub phase: Option<String>,
    /// Deadline for leaving `pending_review`, checked by the approval-timeout loop.
    pub deadline: Option<DateTime<Utc>>,
    /// Timestamp of the most recent task progress under this ticket, checked
    /// by the stuck-workflow and blocking-detector loops.
    pub last_progress_at: Option<DateTime<Utc>>,
    pub blocked_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    #[must_use]
    pub fn new(id: Uuid, title: impl Into<String>, description: Option<String>, phase: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title.into(),
            description,
            status: TicketStatus::Active,
            phase,
            deadline: None,
            last_progress_at: Some(now),
            blocked_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}
