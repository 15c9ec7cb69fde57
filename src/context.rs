//! `CoreContext`: a single immutable bundle of handles to the store, event
//! bus, status manager, queue, runtime, config and clock, constructed once
//! at startup and passed by reference to every loop and request handler.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::adapters::sqlite::{
    create_migrated_test_pool, initialize_database, DatabaseError, SqliteAgentRepository, SqliteGuardianRepository,
    SqliteOutbox, SqliteTaskRepository, SqliteTicketRepository,
};
use crate::domain::models::config::Config;
use crate::domain::ports::{AgentRepository, AgentRuntime, Clock, GuardianRepository, SystemClock, TaskRepository, TicketRepository};
use crate::services::event_bus::{EventBus, EventBusConfig};
use crate::services::status_manager::StatusManager;
use crate::services::task_queue_service::TaskQueueService;

pub struct CoreContext {
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub agent_repository: Arc<dyn AgentRepository>,
    pub task_repository: Arc<dyn TaskRepository>,
    pub guardian_repository: Arc<dyn GuardianRepository>,
    pub ticket_repository: Arc<dyn TicketRepository>,
    pub event_bus: Arc<EventBus>,
    pub status_manager: Arc<StatusManager>,
    pub queue: Arc<TaskQueueService>,
    pub runtime: Arc<dyn AgentRuntime>,
}

impl CoreContext {
    /// Wires every service over a freshly migrated pool, using the real
    /// system clock. `runtime` is supplied by the caller because the choice
    /// of sandbox backend is a deployment concern, not this crate's.
    pub async fn bootstrap(config: Config, runtime: Arc<dyn AgentRuntime>) -> Result<Self, DatabaseError> {
        let database_url = format!("sqlite:{}", config.database.path);
        let pool = initialize_database(&database_url).await?;
        Ok(Self::wire(config, pool, runtime, Arc::new(SystemClock)))
    }

    /// Wires every service over an in-memory migrated pool, for tests that
    /// need the full context rather than a single service.
    pub async fn bootstrap_in_memory(config: Config, runtime: Arc<dyn AgentRuntime>, clock: Arc<dyn Clock>) -> Result<Self, DatabaseError> {
        let pool = create_migrated_test_pool().await?;
        Ok(Self::wire(config, pool, runtime, clock))
    }

    fn wire(config: Config, pool: SqlitePool, runtime: Arc<dyn AgentRuntime>, clock: Arc<dyn Clock>) -> Self {
        let agent_repository: Arc<dyn AgentRepository> = Arc::new(SqliteAgentRepository::new(pool.clone()));
        let task_repository: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let guardian_repository: Arc<dyn GuardianRepository> = Arc::new(SqliteGuardianRepository::new(pool.clone()));
        let ticket_repository: Arc<dyn TicketRepository> = Arc::new(SqliteTicketRepository::new(pool.clone()));
        let outbox = Arc::new(SqliteOutbox::new(pool));
        let event_bus = Arc::new(EventBus::new(outbox, EventBusConfig::default()));
        let status_manager = Arc::new(StatusManager::new(agent_repository.clone(), event_bus.clone(), clock.clone()));
        let queue = Arc::new(TaskQueueService::new(
            task_repository.clone(),
            event_bus.clone(),
            clock.clone(),
            (&config.retry).into(),
            (&config.timeouts).into(),
        ));

        Self {
            config,
            clock,
            agent_repository,
            task_repository,
            guardian_repository,
            ticket_repository,
            event_bus,
            status_manager,
            queue,
            runtime,
        }
    }
}
