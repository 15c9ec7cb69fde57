//! Application services: the control-plane use cases wired over the domain
//! ports.

pub mod coordination_engine;
pub mod dispatcher;
pub mod event_bus;
pub mod heartbeat_service;
pub mod intervention_router;
pub mod restart_orchestrator;
pub mod status_manager;
pub mod supervisor;
pub mod task_queue_service;

pub use coordination_engine::CoordinationEngine;
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherMode};
pub use event_bus::{EventBus, EventBusConfig};
pub use heartbeat_service::{HeartbeatConfig, HeartbeatService};
pub use intervention_router::InterventionRouter;
pub use restart_orchestrator::{RestartConfig, RestartOrchestrator};
pub use status_manager::StatusManager;
pub use supervisor::anomaly_scorer::{AnomalyScorer, AnomalyScorerConfig};
pub use supervisor::approval_timeout::{ApprovalTimeoutConfig, ApprovalTimeoutWatcher};
pub use supervisor::blocking_detector::{BlockingDetector, BlockingDetectorConfig};
pub use supervisor::heartbeat_monitor::{HeartbeatMonitor, HeartbeatMonitorConfig};
pub use supervisor::stuck_workflow::{StuckWorkflowConfig, StuckWorkflowDetector};
pub use supervisor::Supervisor;
pub use task_queue_service::{FailureDisposition, RetryConfig, TaskQueueService, TimeoutsConfig};
