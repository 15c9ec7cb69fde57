//! Port for the minimal `Ticket` slice the supervisor loops observe.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Ticket, TicketStatus};

#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn create(&self, ticket: &Ticket) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<Ticket>>;
    async fn update(&self, ticket: &Ticket) -> DomainResult<()>;
    async fn list_by_status(&self, status: TicketStatus) -> DomainResult<Vec<Ticket>>;

    /// Every non-terminal ticket, for the stuck-workflow and blocking-detector loops.
    async fn list_active(&self) -> DomainResult<Vec<Ticket>>;
}
