//! SQLite implementation of [`TicketRepository`].

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{CoreError, DomainResult};
use crate::domain::models::{Ticket, TicketStatus};
use crate::domain::ports::TicketRepository;

use super::{parse_datetime, parse_optional_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteTicketRepository {
    pool: SqlitePool,
}

impl SqliteTicketRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TicketRepository for SqliteTicketRepository {
    async fn create(&self, ticket: &Ticket) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO tickets (id, title, description, status, phase, priority, deadline,
               last_progress_at, blocked_reason, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, 'medium', ?, ?, ?, ?, ?)",
        )
        .bind(ticket.id.to_string())
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(ticket.status.as_str())
        .bind(&ticket.phase)
        .bind(ticket.deadline.map(|d| d.to_rfc3339()))
        .bind(ticket.last_progress_at.map(|d| d.to_rfc3339()))
        .bind(&ticket.blocked_reason)
        .bind(ticket.created_at.to_rfc3339())
        .bind(ticket.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Ticket>> {
        let row: Option<TicketRow> = sqlx::query_as("SELECT * FROM tickets WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, ticket: &Ticket) -> DomainResult<()> {
        sqlx::query(
            r"UPDATE tickets SET title = ?, description = ?, status = ?, phase = ?, deadline = ?,
               last_progress_at = ?, blocked_reason = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(ticket.status.as_str())
        .bind(&ticket.phase)
        .bind(ticket.deadline.map(|d| d.to_rfc3339()))
        .bind(ticket.last_progress_at.map(|d| d.to_rfc3339()))
        .bind(&ticket.blocked_reason)
        .bind(ticket.updated_at.to_rfc3339())
        .bind(ticket.id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_status(&self, status: TicketStatus) -> DomainResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> = sqlx::query_as("SELECT * FROM tickets WHERE status = ?")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_active(&self) -> DomainResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> =
            sqlx::query_as("SELECT * FROM tickets WHERE status IN ('active', 'pending_review')")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: String,
    title: String,
    description: Option<String>,
    status: String,
    phase: Option<String>,
    deadline: Option<String>,
    last_progress_at: Option<String>,
    blocked_reason: Option<String>,
    created_at: String,
    updated_at: String,
}

fn status_from_str(s: &str) -> DomainResult<TicketStatus> {
    match s {
        "active" => Ok(TicketStatus::Active),
        "pending_review" => Ok(TicketStatus::PendingReview),
        "completed" => Ok(TicketStatus::Completed),
        "blocked" => Ok(TicketStatus::Blocked),
        "timed_out" => Ok(TicketStatus::TimedOut),
        other => Err(CoreError::Validation(format!("invalid ticket status: {other}"))),
    }
}

impl TryFrom<TicketRow> for Ticket {
    type Error = CoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: parse_uuid(&row.id)?,
            title: row.title,
            description: row.description,
            status: status_from_str(&row.status)?,
            phase: row.phase,
            deadline: parse_optional_datetime(row.deadline)?,
            last_progress_at: parse_optional_datetime(row.last_progress_at)?,
            blocked_reason: row.blocked_reason,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    #[tokio::test]
    async fn create_get_update_roundtrip() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteTicketRepository::new(pool);
        let now = chrono::Utc::now();
        let mut ticket = Ticket::new(Uuid::new_v4(), "Migrate billing", None, None, now);
        repo.create(&ticket).await.unwrap();

        let fetched = repo.get(ticket.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TicketStatus::Active);

        ticket.status = TicketStatus::Blocked;
        ticket.blocked_reason = Some("no progress".to_string());
        repo.update(&ticket).await.unwrap();

        let blocked = repo.list_by_status(TicketStatus::Blocked).await.unwrap();
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].blocked_reason.as_deref(), Some("no progress"));
    }

    #[tokio::test]
    async fn list_active_excludes_terminal_statuses() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteTicketRepository::new(pool);
        let now = chrono::Utc::now();
        let active = Ticket::new(Uuid::new_v4(), "a", None, None, now);
        let mut completed = Ticket::new(Uuid::new_v4(), "b", None, None, now);
        completed.status = TicketStatus::Completed;
        repo.create(&active).await.unwrap();
        repo.create(&completed).await.unwrap();

        let result = repo.list_active().await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, active.id);
    }
}
