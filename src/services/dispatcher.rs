//! The dispatcher loop. In-registry mode hands ready tasks to already-idle
//! worker agents; sandbox mode registers a fresh agent per ready task and
//! spawns it through the runtime adapter. `tick()` is separate from `run()`
//! so tests can drive one iteration without racing a timer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentKind, AgentStatus, EntityType, EventPayload};
use crate::domain::ports::{AgentRuntime, ExecutionMode, SpawnRequest};
use crate::services::event_bus::EventBus;
use crate::services::status_manager::StatusManager;
use crate::services::task_queue_service::TaskQueueService;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherMode {
    /// Assign ready tasks to already-registered `IDLE` worker agents.
    InRegistry,
    /// Spawn a fresh sandboxed agent per ready task via the runtime adapter.
    Sandbox,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub mode: DispatcherMode,
    pub poll_interval: Duration,
    pub phase: Option<String>,
    /// Agent kind to register for sandbox-mode spawns.
    pub sandbox_agent_kind: AgentKind,
    /// Upper bound on concurrently in-flight sandbox spawns.
    pub max_concurrent_spawns: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            mode: DispatcherMode::InRegistry,
            poll_interval: Duration::from_secs(10),
            phase: None,
            sandbox_agent_kind: AgentKind::Worker,
            max_concurrent_spawns: 10,
        }
    }
}

pub struct Dispatcher {
    queue: Arc<TaskQueueService>,
    status_manager: Arc<StatusManager>,
    runtime: Arc<dyn AgentRuntime>,
    event_bus: Arc<EventBus>,
    config: DispatcherConfig,
    spawn_permits: Arc<Semaphore>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        queue: Arc<TaskQueueService>,
        status_manager: Arc<StatusManager>,
        runtime: Arc<dyn AgentRuntime>,
        event_bus: Arc<EventBus>,
        config: DispatcherConfig,
    ) -> Self {
        let spawn_permits = Arc::new(Semaphore::new(config.max_concurrent_spawns.max(1)));
        Self { queue, status_manager, runtime, event_bus, config, spawn_permits }
    }

    /// Runs until `cancel` fires, sleeping the idle cadence between ticks
    /// and yielding immediately (no sleep) when a tick did real work.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                tracing::info!("dispatcher shutting down");
                return;
            }
            let did_work = match self.tick().await {
                Ok(did_work) => did_work,
                Err(e) => {
                    tracing::error!(error = %e, "dispatcher tick failed");
                    false
                }
            };
            if did_work {
                continue;
            }
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// A single dispatch attempt. Sweeps overdue in-flight tasks to
    /// `timed_out` first, then tries to place one ready task. Returns whether
    /// it assigned/spawned work, so [`Self::run`] can skip the idle sleep on
    /// a productive tick.
    pub async fn tick(&self) -> DomainResult<bool> {
        let swept = self.queue.sweep_timeouts().await?;
        if swept > 0 {
            tracing::warn!(swept, "timed out overdue tasks");
        }
        match self.config.mode {
            DispatcherMode::InRegistry => self.tick_in_registry().await,
            DispatcherMode::Sandbox => self.tick_sandbox().await,
        }
    }

    async fn tick_in_registry(&self) -> DomainResult<bool> {
        let phase = self.config.phase.as_deref();
        let operational = self.status_manager.list_operational().await?;
        let Some(agent) = operational
            .into_iter()
            .find(|a| a.status == AgentStatus::Idle && phase.is_none_or(|p| a.phase.as_deref() == Some(p)))
        else {
            return Ok(false);
        };

        let Some(task) = self.queue.get_next_task(phase, Some(&agent.capabilities)).await? else {
            return Ok(false);
        };

        if self.queue.assign(task.id, agent.id).await? {
            self.status_manager
                .transition_status(agent.id, AgentStatus::Running, "task assigned", "dispatcher", Some(task.id), None, false)
                .await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn tick_sandbox(&self) -> DomainResult<bool> {
        // Backpressure: when every spawn permit is out, leave the task in the
        // queue for a later tick instead of piling up sandbox launches.
        let Ok(_permit) = self.spawn_permits.clone().try_acquire_owned() else {
            return Ok(false);
        };

        let Some(task) = self.queue.get_next_task(self.config.phase.as_deref(), None).await? else {
            return Ok(false);
        };

        let agent = self
            .status_manager
            .register(
                self.config.sandbox_agent_kind,
                task.phase.clone(),
                task.required_capabilities.clone(),
                1,
                vec!["sandbox".to_string(), "process".to_string()],
            )
            .await?;
        self.status_manager.complete(agent.id).await?;
        self.status_manager
            .transition_status(agent.id, AgentStatus::Running, "sandbox spawn", "dispatcher", Some(task.id), None, false)
            .await?;

        let spawn_result = self
            .runtime
            .spawn(SpawnRequest {
                task_id: task.id,
                agent_id: agent.id,
                phase: task.phase.clone(),
                kind: self.config.sandbox_agent_kind,
                execution_mode: ExecutionMode::Sandbox,
                project_id: None,
                extra_env: vec![],
            })
            .await;

        let sandbox_id = match spawn_result {
            Ok(sandbox_id) => sandbox_id,
            Err(e) => {
                self.queue
                    .update_status(task.id, crate::domain::models::TaskStatus::Failed, None, Some(format!("Sandbox spawn failed: {e}")), None, None, None)
                    .await?;
                // The agent row never got a live sandbox behind it; retire it
                // instead of leaving a phantom RUNNING agent for the
                // heartbeat monitor to chase.
                self.status_manager
                    .transition_status(agent.id, AgentStatus::Failed, "sandbox spawn failed", "dispatcher", Some(task.id), None, false)
                    .await?;
                self.status_manager
                    .transition_status(agent.id, AgentStatus::Terminated, "sandbox spawn failed", "dispatcher", Some(task.id), None, false)
                    .await?;
                return Ok(false);
            }
        };

        if !self.queue.assign(task.id, agent.id).await? {
            self.runtime.terminate(&sandbox_id, "task no longer pending").await?;
            return Ok(false);
        }
        self.queue.set_sandbox_id(task.id, sandbox_id.clone()).await?;

        self.event_bus
            .publish(
                EntityType::Task,
                task.id,
                EventPayload::TaskSandboxSpawned { task_id: task.id, sandbox_id, agent_id: agent.id },
                serde_json::Value::Null,
            )
            .await?;

        Ok(true)
    }
}
