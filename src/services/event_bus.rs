//! The outbox-backed event bus.
//!
//! [`SqliteOutbox::enqueue`] co-commits the event row with the entity
//! mutation that produced it, and a background drain task fans undelivered
//! rows out over a broadcast channel, marking them published only after the
//! send has been queued to subscribers. Publish therefore happens exactly
//! once per committed mutation, and delivery is at-least-once per subscriber.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::adapters::sqlite::outbox::SqliteOutbox;
use crate::domain::errors::DomainResult;
use crate::domain::models::{EntityType, EventId, EventPayload, SystemEvent};
use uuid::Uuid;

/// Configuration for the [`EventBus`]'s broadcast channel and drain loop.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for the broadcast channel. Slow subscribers that
    /// fall more than this many events behind miss the oldest ones; the
    /// outbox table remains the durable record regardless.
    pub channel_capacity: usize,
    /// How often the drain task polls for undelivered outbox rows.
    pub drain_interval: Duration,
    /// Maximum rows fetched per drain tick.
    pub drain_batch_size: i64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            drain_interval: Duration::from_millis(200),
            drain_batch_size: 256,
        }
    }
}

/// Central event bus: durable outbox plus an in-memory fan-out channel.
///
/// Producers call [`EventBus::enqueue`] inside the same `sqlx::Transaction`
/// as their entity mutation; the bus never writes outside a caller-supplied
/// transaction. A spawned drain task is the only thing that reads the outbox
/// table and broadcasts, so publish order matches outbox `sequence` order
/// even when producers commit concurrently.
pub struct EventBus {
    sender: broadcast::Sender<SystemEvent>,
    outbox: Arc<SqliteOutbox>,
    config: EventBusConfig,
    closed: AtomicBool,
}

impl EventBus {
    #[must_use]
    pub fn new(outbox: Arc<SqliteOutbox>, config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self { sender, outbox, config, closed: AtomicBool::new(false) }
    }

    /// Writes `event` into the outbox inside `tx`. Call this alongside the
    /// entity mutation that produced the event, before committing `tx`; the
    /// drain task picks it up once the commit lands.
    pub async fn enqueue(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        event: &SystemEvent,
    ) -> DomainResult<()> {
        SqliteOutbox::enqueue(tx, event).await
    }

    /// Allocates the next bus-wide sequence number inside `tx`, for building
    /// a [`SystemEvent`] before it's enqueued.
    pub async fn next_sequence(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> DomainResult<u64> {
        SqliteOutbox::next_sequence(tx).await
    }

    /// Subscribe to the broadcast stream. New subscribers only see events
    /// published after they subscribe; the outbox table is the durable
    /// source of truth for anything missed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SystemEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Runs the drain loop until `cancel` fires: polls the outbox for
    /// undelivered rows, broadcasts each in sequence order, and marks it
    /// published. Spawned once at startup alongside the supervisor loops.
    pub async fn run_drain_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.drain_interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("event bus drain loop shutting down");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.drain_once().await {
                        tracing::warn!(error = %e, "event bus drain tick failed");
                    }
                }
            }
        }
    }

    /// Convenience one-shot publish: opens its own transaction, allocates a
    /// sequence number, enqueues, and commits. Services that can't share a
    /// transaction with their entity mutation (the common case given the
    /// repository ports don't expose one) use this instead of
    /// [`Self::enqueue`]; the commit is still the publish boundary, just a
    /// narrower one than "same transaction as the mutation".
    pub async fn publish(
        &self,
        entity_type: EntityType,
        entity_id: Uuid,
        payload: EventPayload,
        metadata: serde_json::Value,
    ) -> DomainResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(crate::domain::errors::CoreError::Contract(
                "event bus is closed".to_string(),
            ));
        }
        let mut tx = self.outbox.pool().begin().await?;
        let sequence = Self::next_sequence(&mut tx).await?;
        let event = SystemEvent {
            id: EventId::new(Uuid::new_v4()),
            sequence: crate::domain::models::SequenceNumber(sequence),
            entity_type,
            entity_id,
            payload,
            metadata,
            occurred_at: chrono::Utc::now(),
        };
        Self::enqueue(&mut tx, &event).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Rejects further publishes and flushes whatever is left in the outbox.
    /// Called last during shutdown, after every producer loop has stopped.
    pub async fn close(&self) -> DomainResult<()> {
        self.closed.store(true, Ordering::Release);
        while self.drain_once().await? > 0 {}
        Ok(())
    }

    /// Drains and broadcasts one batch of undelivered outbox rows. Exposed
    /// separately from [`Self::run_drain_loop`] so tests can drive the drain
    /// deterministically instead of racing a timer.
    pub async fn drain_once(&self) -> DomainResult<usize> {
        let pending = self.outbox.undelivered(self.config.drain_batch_size).await?;
        let drained = pending.len();
        for event in pending {
            // Ignore send errors: no subscribers is a normal state, not a
            // delivery failure. The outbox row is still the durable record.
            let _ = self.sender.send(event.clone());
            self.outbox.mark_published(event.id.0, chrono::Utc::now()).await?;
        }
        Ok(drained)
    }
}
