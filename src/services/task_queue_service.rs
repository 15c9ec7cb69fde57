//! The task queue: enqueue with cycle rejection, atomic next-task selection,
//! compare-and-set assignment, status updates with their matching events,
//! and the retry/timeout machinery.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rand::Rng;
use uuid::Uuid;

use crate::domain::errors::{CoreError, DomainResult};
use crate::domain::models::{would_create_cycle, EntityType, EventPayload, Task, TaskPriority, TaskStatus};
use crate::domain::ports::{Clock, TaskRepository};
use crate::services::event_bus::EventBus;

/// Knobs for the failed-task retry path.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub base_delay_seconds: f64,
    pub max_delay_seconds: f64,
    pub max_retries_default: u32,
    pub retryable_substrings: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_seconds: 1.0,
            max_delay_seconds: 60.0,
            max_retries_default: 3,
            retryable_substrings: vec![
                "timeout".to_string(),
                "connection".to_string(),
                "rate limit".to_string(),
                "unavailable".to_string(),
                "temporary".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimeoutsConfig {
    pub default_task_seconds: i64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self { default_task_seconds: 600 }
    }
}

impl TimeoutsConfig {
    #[must_use]
    pub const fn default_or(seconds: i64) -> Self {
        Self { default_task_seconds: seconds }
    }
}

/// How a failed task was resolved: rescheduled for another attempt, or
/// declared permanently failed.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureDisposition {
    RetryScheduled { delay_seconds: f64 },
    PermanentlyFailed { reason: &'static str },
}

pub struct TaskQueueService {
    repository: Arc<dyn TaskRepository>,
    event_bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
    timeouts: TimeoutsConfig,
}

impl TaskQueueService {
    #[must_use]
    pub fn new(
        repository: Arc<dyn TaskRepository>,
        event_bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
        timeouts: TimeoutsConfig,
    ) -> Self {
        Self { repository, event_bus, clock, retry, timeouts }
    }

    /// Creates a `pending` task, rejecting any dependency set that would
    /// close a cycle in the ticket's dependency graph.
    #[allow(clippy::too_many_arguments)]
    pub async fn enqueue(
        &self,
        ticket_id: Uuid,
        phase: Option<String>,
        task_type: impl Into<String>,
        priority: TaskPriority,
        description: impl Into<String>,
        required_capabilities: HashSet<String>,
        dependencies: HashSet<Uuid>,
        max_retries: Option<u32>,
        timeout_seconds: Option<i64>,
        execution_config: Option<serde_json::Value>,
    ) -> DomainResult<Task> {
        let new_id = Uuid::new_v4();

        if !dependencies.is_empty() {
            let siblings = self.repository.get_dag_tasks(ticket_id).await?;
            let edges: HashMap<Uuid, HashSet<Uuid>> =
                siblings.iter().map(|t| (t.id, t.dependencies.clone())).collect();
            if would_create_cycle(new_id, &dependencies, &edges) {
                return Err(CoreError::Contract(format!(
                    "enqueueing task {new_id} with dependencies {dependencies:?} would close a cycle"
                )));
            }
        }

        let mut task = Task::new(
            new_id,
            ticket_id,
            phase,
            task_type,
            priority,
            description,
            required_capabilities,
            dependencies,
            max_retries.unwrap_or(self.retry.max_retries_default),
            timeout_seconds.unwrap_or(self.timeouts.default_task_seconds),
            execution_config,
            self.clock.now(),
        );
        task.backoff_base_seconds = self.retry.base_delay_seconds;
        self.repository.create(&task).await?;
        Ok(task)
    }

    /// Picks the next ready task: the repository's `get_ready_tasks` already
    /// orders by `priority desc, created_at asc` and filters dependency
    /// completion; this takes the first candidate matching phase/capabilities.
    pub async fn get_next_task(&self, phase: Option<&str>, agent_capabilities: Option<&HashSet<String>>) -> DomainResult<Option<Task>> {
        let candidates = self.repository.get_ready_tasks(64).await?;
        Ok(candidates.into_iter().find(|task| {
            phase.is_none_or(|p| task.phase.as_deref() == Some(p))
                && agent_capabilities.is_none_or(|caps| task.required_capabilities.is_subset(caps))
        }))
    }

    /// Compare-and-set `pending -> assigned`; publishes `TASK_ASSIGNED` only
    /// for the one caller that wins the CAS.
    pub async fn assign(&self, task_id: Uuid, agent_id: Uuid) -> DomainResult<bool> {
        let assigned = self.repository.try_assign(task_id, agent_id).await?;
        if assigned {
            self.event_bus
                .publish(EntityType::Task, task_id, EventPayload::TaskAssigned { task_id, agent_id }, serde_json::Value::Null)
                .await?;
        }
        Ok(assigned)
    }

    /// Attaches a runtime-issued sandbox id to an already-assigned task.
    /// Separate from `UpdateStatus` because it doesn't move the state
    /// machine — `Assign` already moved `pending -> assigned`.
    pub async fn set_sandbox_id(&self, task_id: Uuid, sandbox_id: String) -> DomainResult<Task> {
        let mut task = self
            .repository
            .get(task_id)
            .await?
            .ok_or_else(|| CoreError::not_found("task", task_id.to_string()))?;
        task.sandbox_id = Some(sandbox_id);
        self.repository.update(&task).await?;
        Ok(task)
    }

    /// Applies a status transition (validated against the task state machine)
    /// and publishes the matching `TASK_*` event. A transition into `failed`
    /// is resolved immediately: either the task goes back to `pending` with a
    /// `TASK_RETRY_SCHEDULED` event, or `TASK_PERMANENTLY_FAILED` closes it out.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_status(
        &self,
        task_id: Uuid,
        new_status: TaskStatus,
        result: Option<serde_json::Value>,
        error_message: Option<String>,
        conversation_id: Option<Uuid>,
        persistence_dir: Option<String>,
        sandbox_id: Option<String>,
    ) -> DomainResult<Task> {
        let mut task = self
            .repository
            .get(task_id)
            .await?
            .ok_or_else(|| CoreError::not_found("task", task_id.to_string()))?;

        let previous = task.status;
        let attempt = task.retry_count + 1;
        task.transition_to(new_status, self.clock.now())?;
        if result.is_some() {
            task.result = result.clone();
        }
        if error_message.is_some() {
            task.error_message = error_message.clone();
        }
        if conversation_id.is_some() {
            task.conversation_id = conversation_id;
        }
        if persistence_dir.is_some() {
            task.persistence_dir = persistence_dir;
        }
        if sandbox_id.is_some() {
            task.sandbox_id = sandbox_id;
        }
        self.repository.update(&task).await?;

        let mut payloads = Vec::new();
        match new_status {
            TaskStatus::NeedsValidation => payloads.push(EventPayload::TaskValidationRequested {
                task_id,
                agent_id: task.assigned_agent_id,
            }),
            TaskStatus::Completed => {
                if previous == TaskStatus::PendingValidation {
                    payloads.push(EventPayload::TaskValidationPassed { task_id });
                }
                payloads.push(EventPayload::TaskCompleted { task_id, result: task.result.clone() });
            }
            TaskStatus::NeedsRevision if previous == TaskStatus::PendingValidation => {
                payloads.push(EventPayload::TaskValidationFailed {
                    task_id,
                    reason: task.error_message.clone(),
                });
            }
            TaskStatus::Failed => {
                if previous == TaskStatus::PendingValidation {
                    payloads.push(EventPayload::TaskValidationFailed {
                        task_id,
                        reason: task.error_message.clone(),
                    });
                }
                payloads.push(EventPayload::TaskFailed {
                    task_id,
                    error: task.error_message.clone().unwrap_or_default(),
                    retry_count: task.retry_count,
                    max_retries: task.max_retries,
                    attempt,
                });
            }
            TaskStatus::TimedOut => payloads.push(EventPayload::TaskTimedOut {
                task_id,
                timeout_seconds: task.timeout_seconds,
                elapsed_time: task
                    .started_at
                    .map_or(0, |started| (self.clock.now() - started).num_seconds()),
            }),
            _ => {}
        }
        for payload in payloads {
            self.event_bus.publish(EntityType::Task, task_id, payload, serde_json::Value::Null).await?;
        }

        if new_status == TaskStatus::Failed {
            self.resolve_failure(&mut task).await?;
        }

        Ok(task)
    }

    /// Decides a failed task's fate: schedule another attempt when the error
    /// is retryable and attempts remain, otherwise publish
    /// `TASK_PERMANENTLY_FAILED` and leave it in `failed`.
    async fn resolve_failure(&self, task: &mut Task) -> DomainResult<FailureDisposition> {
        if task.should_retry(&self.retry.retryable_substrings) {
            let delay = self.increment_retry(task.id).await?;
            if let Some(refreshed) = self.repository.get(task.id).await? {
                *task = refreshed;
            }
            return Ok(FailureDisposition::RetryScheduled { delay_seconds: delay });
        }

        let error = task.error_message.clone().unwrap_or_default();
        let reason = if Task::is_retryable(&error, &self.retry.retryable_substrings) {
            "max_retries_exceeded"
        } else {
            "permanent_error"
        };
        self.event_bus
            .publish(
                EntityType::Task,
                task.id,
                EventPayload::TaskPermanentlyFailed { task_id: task.id, error, reason: reason.to_string() },
                serde_json::Value::Null,
            )
            .await?;
        Ok(FailureDisposition::PermanentlyFailed { reason })
    }

    /// `status=failed`, attempts left, and a retryable error message.
    pub async fn should_retry(&self, task_id: Uuid) -> DomainResult<bool> {
        let task = self
            .repository
            .get(task_id)
            .await?
            .ok_or_else(|| CoreError::not_found("task", task_id.to_string()))?;
        Ok(task.should_retry(&self.retry.retryable_substrings))
    }

    /// Bumps the retry counter, moves the task back to `pending`, and
    /// publishes `TASK_RETRY_SCHEDULED` with the backoff delay the caller
    /// should wait before re-dispatching. The delay uses the attempt number
    /// before the bump, so the first retry lands near the base delay.
    pub async fn increment_retry(&self, task_id: Uuid) -> DomainResult<f64> {
        let mut task = self
            .repository
            .get(task_id)
            .await?
            .ok_or_else(|| CoreError::not_found("task", task_id.to_string()))?;

        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        let delay = task.backoff_delay_seconds(self.retry.max_delay_seconds, jitter);
        task.retry(self.clock.now());
        self.repository.update(&task).await?;

        self.event_bus
            .publish(
                EntityType::Task,
                task_id,
                EventPayload::TaskRetryScheduled { task_id, retry_count: task.retry_count, delay_seconds: delay },
                serde_json::Value::Null,
            )
            .await?;

        Ok(delay)
    }

    /// In-flight tasks that have outlived their per-task timeout.
    pub async fn get_timed_out_tasks(&self) -> DomainResult<Vec<Task>> {
        let now = self.clock.now();
        let assigned = self.repository.list_by_status(TaskStatus::Assigned).await?;
        let running = self.repository.list_by_status(TaskStatus::Running).await?;
        Ok(assigned.into_iter().chain(running).filter(|t| t.is_timed_out(now)).collect())
    }

    /// `running -> timed_out`, publishes `TASK_TIMED_OUT`.
    pub async fn mark_timeout(&self, task_id: Uuid) -> DomainResult<Task> {
        self.update_status(task_id, TaskStatus::TimedOut, None, None, None, None, None).await
    }

    /// Times out every overdue in-flight task; returns how many were swept.
    /// Driven from the dispatcher loop so stalled tasks cannot linger in
    /// `assigned`/`running` forever.
    pub async fn sweep_timeouts(&self) -> DomainResult<usize> {
        let overdue = self.get_timed_out_tasks().await?;
        let count = overdue.len();
        for task in overdue {
            self.mark_timeout(task.id).await?;
        }
        Ok(count)
    }

    #[must_use]
    pub fn is_retryable(&self, message: &str) -> bool {
        Task::is_retryable(message, &self.retry.retryable_substrings)
    }
}
