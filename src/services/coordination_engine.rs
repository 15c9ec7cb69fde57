//! Coordination points over the task DAG: sync barriers, fan-out splits,
//! converging joins, and result merging.
//!
//! Operates purely on `Task` rows by creating new tasks with the right
//! `dependencies` set. The DAG invariant holds by construction: new tasks
//! only ever depend on pre-existing ones, so no cycle check is needed here
//! (unlike [`crate::services::task_queue_service::TaskQueueService::enqueue`]).
//! Each operation also persists a [`CoordinationPoint`] record so operators
//! can reconstruct the workflow's control-flow history.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::domain::errors::{CoreError, DomainResult};
use crate::domain::models::{CoordinationKind, CoordinationPoint, EntityType, EventPayload, MergeStrategy, Task, TaskDag, TaskPriority, TaskStatus};
use crate::domain::ports::{Clock, TaskRepository};
use crate::services::event_bus::EventBus;

/// A not-yet-persisted task specification for `Split`/`Join` targets.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub ticket_id: Uuid,
    pub phase: Option<String>,
    pub task_type: String,
    pub priority: TaskPriority,
    pub description: String,
    pub required_capabilities: HashSet<String>,
    pub max_retries: u32,
    pub timeout_seconds: i64,
    pub execution_config: Option<serde_json::Value>,
}

pub struct CoordinationEngine {
    repository: Arc<dyn TaskRepository>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

impl CoordinationEngine {
    #[must_use]
    pub fn new(repository: Arc<dyn TaskRepository>, event_bus: Arc<EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, event_bus, clock }
    }

    /// Sync barrier: ready iff at least `required_count` of `waiting` are
    /// `completed`. The check itself is stateless; the persisted record is
    /// for observability only. `timeout_seconds` is stamped on the record
    /// for [`Self::check_sync_timeout`] to enforce on a later poll.
    pub async fn sync(
        &self,
        waiting: Vec<Uuid>,
        required_count: usize,
        timeout_seconds: Option<i64>,
    ) -> DomainResult<(bool, CoordinationPoint)> {
        let completed_count = self.count_completed(&waiting).await?;
        let ready = completed_count >= required_count;
        let point = CoordinationPoint {
            id: Uuid::new_v4(),
            kind: CoordinationKind::Sync { waiting, required_count },
            created_at: self.clock.now(),
            resolved_at: ready.then(|| self.clock.now()),
            timeout_seconds,
        };
        self.repository.record_coordination_point(&point).await?;
        Ok((ready, point))
    }

    /// Converts a still-unready, expired sync into a failure event. Returns
    /// whether the point had timed out.
    pub async fn check_sync_timeout(&self, point: &CoordinationPoint) -> DomainResult<bool> {
        if !point.is_timed_out(self.clock.now()) {
            return Ok(false);
        }
        let CoordinationKind::Sync { waiting, required_count } = &point.kind else {
            return Ok(false);
        };
        let completed_count = self.count_completed(waiting).await?;
        if completed_count >= *required_count {
            return Ok(false);
        }
        self.event_bus
            .publish(
                EntityType::CoordinationPoint,
                point.id,
                EventPayload::CoordinationSyncTimedOut {
                    point_id: point.id,
                    required_count: *required_count,
                    completed_count,
                },
                serde_json::Value::Null,
            )
            .await?;
        Ok(true)
    }

    async fn count_completed(&self, waiting: &[Uuid]) -> DomainResult<usize> {
        let mut completed = 0;
        for task_id in waiting {
            if let Some(task) = self.repository.get(*task_id).await? {
                if task.status == TaskStatus::Completed {
                    completed += 1;
                }
            }
        }
        Ok(completed)
    }

    /// Fan-out: one task per target, each depending only on `source_task`.
    pub async fn split(&self, source_task: Uuid, targets: Vec<TaskSpec>) -> DomainResult<Vec<Task>> {
        let mut created = Vec::with_capacity(targets.len());
        for spec in targets {
            let task = Task::new(
                Uuid::new_v4(),
                spec.ticket_id,
                spec.phase,
                spec.task_type,
                spec.priority,
                spec.description,
                spec.required_capabilities,
                HashSet::from([source_task]),
                spec.max_retries,
                spec.timeout_seconds,
                spec.execution_config,
                self.clock.now(),
            );
            self.repository.create(&task).await?;
            created.push(task);
        }

        let point = CoordinationPoint {
            id: Uuid::new_v4(),
            kind: CoordinationKind::Split {
                source_task,
                targets: created.iter().map(|t| t.id).collect(),
            },
            created_at: self.clock.now(),
            resolved_at: Some(self.clock.now()),
            timeout_seconds: None,
        };
        self.repository.record_coordination_point(&point).await?;
        Ok(created)
    }

    /// Convergence: one continuation task depending on every source.
    pub async fn join(&self, sources: Vec<Uuid>, continuation_spec: TaskSpec) -> DomainResult<Task> {
        let continuation = Task::new(
            Uuid::new_v4(),
            continuation_spec.ticket_id,
            continuation_spec.phase,
            continuation_spec.task_type,
            continuation_spec.priority,
            continuation_spec.description,
            continuation_spec.required_capabilities,
            sources.iter().copied().collect(),
            continuation_spec.max_retries,
            continuation_spec.timeout_seconds,
            continuation_spec.execution_config,
            self.clock.now(),
        );
        self.repository.create(&continuation).await?;

        let point = CoordinationPoint {
            id: Uuid::new_v4(),
            kind: CoordinationKind::Join { sources, continuation_task: continuation.id },
            created_at: self.clock.now(),
            resolved_at: Some(self.clock.now()),
            timeout_seconds: None,
        };
        self.repository.record_coordination_point(&point).await?;
        Ok(continuation)
    }

    /// Merges the result maps of fully-`completed` sources. Any incomplete
    /// source is a caller error; the merged value is the caller's to consume.
    pub async fn merge_results(
        &self,
        sources: Vec<Uuid>,
        strategy: MergeStrategy,
    ) -> DomainResult<serde_json::Map<String, serde_json::Value>> {
        let mut maps = Vec::with_capacity(sources.len());
        for task_id in &sources {
            let task = self
                .repository
                .get(*task_id)
                .await?
                .ok_or_else(|| CoreError::not_found("task", task_id.to_string()))?;
            if task.status != TaskStatus::Completed {
                return Err(CoreError::Validation(format!(
                    "task {task_id} is not completed (status={}), cannot merge",
                    task.status
                )));
            }
            let map = match task.result.clone() {
                Some(serde_json::Value::Object(map)) => map,
                Some(_) | None => serde_json::Map::new(),
            };
            maps.push(map);
        }
        Ok(strategy.apply(&maps))
    }

    /// Parallelism profile of a ticket's workflow: which tasks could run
    /// together if every agent slot were free. Observability only.
    pub async fn workflow_waves(&self, ticket_id: Uuid) -> DomainResult<Vec<Vec<Uuid>>> {
        let tasks = self.repository.get_dag_tasks(ticket_id).await?;
        TaskDag::from_tasks(&tasks)
            .execution_waves()
            .map_err(|e| CoreError::Contract(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteTaskRepository};
    use crate::domain::ports::SystemClock;

    fn spec(ticket_id: Uuid, description: &str) -> TaskSpec {
        TaskSpec {
            ticket_id,
            phase: None,
            task_type: "standard".to_string(),
            priority: TaskPriority::Medium,
            description: description.to_string(),
            required_capabilities: HashSet::new(),
            max_retries: 3,
            timeout_seconds: 600,
            execution_config: None,
        }
    }

    async fn make_engine() -> (CoordinationEngine, Arc<dyn TaskRepository>) {
        let pool = create_migrated_test_pool().await.unwrap();
        let repository: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let outbox = Arc::new(crate::adapters::sqlite::SqliteOutbox::new(pool));
        let event_bus = Arc::new(EventBus::new(outbox, crate::services::event_bus::EventBusConfig::default()));
        (
            CoordinationEngine::new(repository.clone(), event_bus, Arc::new(SystemClock)),
            repository,
        )
    }

    #[tokio::test]
    async fn split_creates_one_task_per_target_depending_on_source() {
        let (engine, _repo) = make_engine().await;
        let ticket_id = Uuid::new_v4();
        let source = Uuid::new_v4();
        let created = engine.split(source, vec![spec(ticket_id, "a"), spec(ticket_id, "b")]).await.unwrap();
        assert_eq!(created.len(), 2);
        for task in &created {
            assert_eq!(task.dependencies, HashSet::from([source]));
        }
    }

    #[tokio::test]
    async fn join_depends_on_every_source() {
        let (engine, _repo) = make_engine().await;
        let ticket_id = Uuid::new_v4();
        let sources = vec![Uuid::new_v4(), Uuid::new_v4()];
        let continuation = engine.join(sources.clone(), spec(ticket_id, "continue")).await.unwrap();
        assert_eq!(continuation.dependencies, sources.into_iter().collect());
    }

    #[tokio::test]
    async fn merge_rejects_incomplete_sources() {
        let (engine, repo) = make_engine().await;
        let ticket_id = Uuid::new_v4();
        let mut task = Task::new(
            Uuid::new_v4(), ticket_id, None, "standard", TaskPriority::Medium, "x",
            HashSet::new(), HashSet::new(), 3, 600, None, chrono::Utc::now(),
        );
        repo.create(&task).await.unwrap();
        let result = engine.merge_results(vec![task.id], MergeStrategy::Combine).await;
        assert!(result.is_err());

        task.transition_to(TaskStatus::Assigned, chrono::Utc::now()).unwrap();
        task.transition_to(TaskStatus::Running, chrono::Utc::now()).unwrap();
        task.result = Some(serde_json::json!({"x": 1}));
        task.transition_to(TaskStatus::Completed, chrono::Utc::now()).unwrap();
        repo.update(&task).await.unwrap();
        let merged = engine.merge_results(vec![task.id], MergeStrategy::Combine).await.unwrap();
        assert_eq!(merged["x"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn sync_is_ready_when_required_count_is_met() {
        let (engine, repo) = make_engine().await;
        let ticket_id = Uuid::new_v4();
        let mut t1 = Task::new(
            Uuid::new_v4(), ticket_id, None, "standard", TaskPriority::Medium, "x",
            HashSet::new(), HashSet::new(), 3, 600, None, chrono::Utc::now(),
        );
        repo.create(&t1).await.unwrap();
        t1.transition_to(TaskStatus::Assigned, chrono::Utc::now()).unwrap();
        t1.transition_to(TaskStatus::Running, chrono::Utc::now()).unwrap();
        t1.transition_to(TaskStatus::Completed, chrono::Utc::now()).unwrap();
        repo.update(&t1).await.unwrap();

        let (ready, _point) = engine.sync(vec![t1.id], 1, None).await.unwrap();
        assert!(ready);
    }

    #[tokio::test]
    async fn expired_unready_sync_times_out() {
        let (engine, repo) = make_engine().await;
        let pending = Task::new(
            Uuid::new_v4(), Uuid::new_v4(), None, "standard", TaskPriority::Medium, "x",
            HashSet::new(), HashSet::new(), 3, 600, None, chrono::Utc::now() - chrono::Duration::seconds(120),
        );
        repo.create(&pending).await.unwrap();

        let (ready, mut point) = engine.sync(vec![pending.id], 1, Some(60)).await.unwrap();
        assert!(!ready);

        // Simulate a point created two minutes ago.
        point.created_at = chrono::Utc::now() - chrono::Duration::seconds(120);
        assert!(engine.check_sync_timeout(&point).await.unwrap());
    }
}
