//! Heartbeat monitor loop: runs the missed-heartbeat scan on a short
//! cadence and hands any agent that reaches `FAILED` to the restart
//! orchestrator.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::domain::errors::DomainResult;
use crate::services::heartbeat_service::HeartbeatService;
use crate::services::restart_orchestrator::RestartOrchestrator;

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatMonitorConfig {
    pub poll_interval: Duration,
}

impl Default for HeartbeatMonitorConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(10) }
    }
}

pub struct HeartbeatMonitor {
    heartbeat_service: Arc<HeartbeatService>,
    restart_orchestrator: Arc<RestartOrchestrator>,
    config: HeartbeatMonitorConfig,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new(
        heartbeat_service: Arc<HeartbeatService>,
        restart_orchestrator: Arc<RestartOrchestrator>,
        config: HeartbeatMonitorConfig,
    ) -> Self {
        Self { heartbeat_service, restart_orchestrator, config }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "heartbeat monitor tick failed");
            }
            tokio::select! {
                () = cancel.cancelled() => { tracing::info!("heartbeat monitor shutting down"); return; }
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    pub async fn tick(&self) -> DomainResult<()> {
        let newly_failed = self.heartbeat_service.check_missed_heartbeats().await?;
        for agent_id in newly_failed {
            self.restart_orchestrator.restart(agent_id, false).await?;
        }
        Ok(())
    }
}
