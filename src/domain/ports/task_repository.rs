//! Port for `Task` persistence, its DAG edges, and coordination-point records.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{CoordinationPoint, Task, TaskPriority, TaskStatus};

/// Filter criteria for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub ticket_id: Option<Uuid>,
    pub phase: Option<String>,
    pub assigned_agent_id: Option<Uuid>,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &Task) -> DomainResult<()>;
    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>>;
    async fn update(&self, task: &Task) -> DomainResult<()>;
    async fn list(&self, filter: &TaskFilter) -> DomainResult<Vec<Task>>;

    async fn list_by_ticket(&self, ticket_id: Uuid) -> DomainResult<Vec<Task>>;
    async fn list_by_status(&self, status: TaskStatus) -> DomainResult<Vec<Task>>;

    /// Tasks whose dependencies are all `Completed`, ordered by priority then
    /// creation time: the dispatcher's candidate pool.
    async fn get_ready_tasks(&self, limit: usize) -> DomainResult<Vec<Task>>;

    /// Atomic compare-and-set: assigns `task_id` to `agent_id` only if the
    /// task is still `Pending` and unassigned. Returns `false` if the
    /// precondition no longer holds; the caller must re-pick a task rather
    /// than retry the same one.
    async fn try_assign(&self, task_id: Uuid, agent_id: Uuid) -> DomainResult<bool>;

    /// All tasks belonging to the same ticket, for DAG construction.
    async fn get_dag_tasks(&self, ticket_id: Uuid) -> DomainResult<Vec<Task>>;

    /// Tasks assigned to `agent_id` still in an active state, used when an
    /// agent fails and its work needs reassignment.
    async fn list_active_for_agent(&self, agent_id: Uuid) -> DomainResult<Vec<Task>>;

    /// Persists a sync/split/join/merge record for observability.
    async fn record_coordination_point(&self, point: &CoordinationPoint) -> DomainResult<()>;
}
