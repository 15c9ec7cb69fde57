//! Outbox-pattern persistence backing the event bus. The outbox row commits
//! in the same transaction as the entity mutation that produced the event,
//! so an event exists exactly when its mutation does.

use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{EntityType, EventId, EventPayload, SequenceNumber, SystemEvent};

#[derive(Clone)]
pub struct SqliteOutbox {
    pool: SqlitePool,
}

impl SqliteOutbox {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Allocates the next monotonic bus-wide sequence number inside `tx`.
    pub async fn next_sequence(tx: &mut Transaction<'_, Sqlite>) -> DomainResult<u64> {
        sqlx::query("UPDATE event_sequence SET value = value + 1 WHERE id = 1")
            .execute(&mut **tx)
            .await?;
        let (value,): (i64,) = sqlx::query_as("SELECT value FROM event_sequence WHERE id = 1")
            .fetch_one(&mut **tx)
            .await?;
        Ok(value as u64)
    }

    /// Writes `event` into the outbox in the same transaction as the entity
    /// mutation that produced it. Commit of `tx` is the publish boundary.
    pub async fn enqueue(tx: &mut Transaction<'_, Sqlite>, event: &SystemEvent) -> DomainResult<()> {
        let payload_json = serde_json::to_string(&event.payload)?;
        let metadata_json = serde_json::to_string(&event.metadata)?;

        sqlx::query(
            r#"INSERT INTO outbox_events
               (id, sequence, entity_type, entity_id, event_type, payload, metadata, occurred_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(event.id.0.to_string())
        .bind(event.sequence.0 as i64)
        .bind(entity_type_str(event.entity_type))
        .bind(event.entity_id.to_string())
        .bind(event.event_type())
        .bind(&payload_json)
        .bind(&metadata_json)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Rows not yet marked published, oldest first — what the drain task fans
    /// out over the broadcast channel.
    pub async fn undelivered(&self, limit: i64) -> DomainResult<Vec<SystemEvent>> {
        let rows: Vec<OutboxRow> = sqlx::query_as(
            "SELECT * FROM outbox_events WHERE published_at IS NULL ORDER BY sequence ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn mark_published(&self, id: Uuid, at: chrono::DateTime<chrono::Utc>) -> DomainResult<()> {
        sqlx::query("UPDATE outbox_events SET published_at = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn entity_type_str(kind: EntityType) -> &'static str {
    match kind {
        EntityType::Agent => "agent",
        EntityType::Task => "task",
        EntityType::Ticket => "ticket",
        EntityType::CoordinationPoint => "coordination_point",
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: String,
    sequence: i64,
    entity_type: String,
    entity_id: String,
    #[allow(dead_code)]
    event_type: String,
    payload: String,
    metadata: Option<String>,
    occurred_at: String,
}

impl TryFrom<OutboxRow> for SystemEvent {
    type Error = crate::domain::errors::CoreError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        let entity_type = match row.entity_type.as_str() {
            "agent" => EntityType::Agent,
            "task" => EntityType::Task,
            "ticket" => EntityType::Ticket,
            _ => EntityType::CoordinationPoint,
        };
        let payload: EventPayload = serde_json::from_str(&row.payload)?;
        Ok(SystemEvent {
            id: EventId::new(super::parse_uuid(&row.id)?),
            sequence: SequenceNumber(row.sequence as u64),
            entity_type,
            entity_id: super::parse_uuid(&row.entity_id)?,
            payload,
            metadata: super::parse_json_value(row.metadata)?,
            occurred_at: super::parse_datetime(&row.occurred_at)?,
        })
    }
}
