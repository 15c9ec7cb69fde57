//! swarmctl daemon entry point: loads configuration, wires the control
//! plane over a migrated SQLite store, and runs the dispatcher plus all
//! five supervisor loops until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use swarmctl::adapters::runtime::{ProcessRuntime, ProcessRuntimeConfig};
use swarmctl::context::CoreContext;
use swarmctl::domain::models::config::Config;
use swarmctl::domain::ports::{AgentRuntime, SystemClock};
use swarmctl::infrastructure::config::ConfigLoader;
use swarmctl::infrastructure::logging::{LogConfig, LoggerImpl};
use swarmctl::services::{
    AnomalyScorer, ApprovalTimeoutWatcher, BlockingDetector, Dispatcher, DispatcherConfig,
    HeartbeatConfig, HeartbeatMonitor, HeartbeatMonitorConfig, HeartbeatService, RestartConfig,
    RestartOrchestrator, StuckWorkflowConfig, StuckWorkflowDetector, Supervisor,
};

/// Control plane for a swarm of autonomous agents.
#[derive(Parser, Debug)]
#[command(name = "swarmctl", version, about)]
struct Cli {
    /// Path to a YAML config file, layered on top of built-in defaults and
    /// `.swarmctl/config.yaml`/`.swarmctl/local.yaml` if no explicit path is given.
    #[arg(long, env = "SWARMCTL_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config: Config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path).context("failed to load configuration")?,
        None => ConfigLoader::load().context("failed to load configuration")?,
    };

    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging)).context("failed to initialize logging")?;

    let runtime: Arc<dyn AgentRuntime> = Arc::new(ProcessRuntime::new(ProcessRuntimeConfig::default()));
    let ctx = CoreContext::bootstrap(config, runtime).await.context("failed to bootstrap control plane")?;

    // The drain task is the only reader of the outbox; it outlives the
    // supervisor loops and is stopped just before the bus is closed.
    let drain_cancel = tokio_util::sync::CancellationToken::new();
    let drain_handle = tokio::spawn(ctx.event_bus.clone().run_drain_loop(drain_cancel.clone()));

    let clock = Arc::new(SystemClock);
    let heartbeat_service = Arc::new(HeartbeatService::new(
        ctx.agent_repository.clone(),
        ctx.status_manager.clone(),
        ctx.event_bus.clone(),
        clock.clone(),
        HeartbeatConfig::from(&ctx.config.heartbeat),
    ));
    let restart_orchestrator = Arc::new(RestartOrchestrator::new(
        ctx.agent_repository.clone(),
        ctx.task_repository.clone(),
        ctx.guardian_repository.clone(),
        ctx.status_manager.clone(),
        ctx.event_bus.clone(),
        clock.clone(),
        RestartConfig::from(&ctx.config.restart),
    ));
    let mut dispatcher_config = DispatcherConfig::from(&ctx.config.dispatcher);
    dispatcher_config.max_concurrent_spawns = ctx.config.spawn.max_concurrent as usize;
    let dispatcher = Arc::new(Dispatcher::new(
        ctx.queue.clone(),
        ctx.status_manager.clone(),
        ctx.runtime.clone(),
        ctx.event_bus.clone(),
        dispatcher_config,
    ));
    let heartbeat_monitor = Arc::new(HeartbeatMonitor::new(
        heartbeat_service,
        restart_orchestrator,
        HeartbeatMonitorConfig::default(),
    ));
    let stuck_workflow = Arc::new(StuckWorkflowDetector::new(
        ctx.ticket_repository.clone(),
        ctx.guardian_repository.clone(),
        ctx.runtime.clone(),
        ctx.event_bus.clone(),
        clock.clone(),
        StuckWorkflowConfig::from(&ctx.config.supervisor),
    ));
    let anomaly_scorer = Arc::new(AnomalyScorer::new(
        ctx.agent_repository.clone(),
        ctx.guardian_repository.clone(),
        ctx.runtime.clone(),
        ctx.event_bus.clone(),
        clock.clone(),
        (&ctx.config.supervisor).into(),
    ));
    let approval_timeout = Arc::new(ApprovalTimeoutWatcher::new(
        ctx.ticket_repository.clone(),
        ctx.event_bus.clone(),
        clock.clone(),
        (&ctx.config.supervisor).into(),
    ));
    let blocking_detector = Arc::new(BlockingDetector::new(
        ctx.ticket_repository.clone(),
        ctx.event_bus.clone(),
        clock,
        (&ctx.config.supervisor).into(),
    ));

    let supervisor = Supervisor::spawn(
        dispatcher,
        heartbeat_monitor,
        stuck_workflow,
        anomaly_scorer,
        approval_timeout,
        blocking_detector,
    );

    tracing::info!("swarmctl running, press ctrl-c to shut down");
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received");

    supervisor.shutdown().await;

    // Producers are gone; stop the drain task, then close the bus, flushing
    // anything still sitting in the outbox.
    drain_cancel.cancel();
    if let Err(e) = drain_handle.await {
        tracing::error!(error = %e, "event bus drain task panicked during shutdown");
    }
    if let Err(e) = ctx.event_bus.close().await {
        tracing::error!(error = %e, "failed to flush event bus outbox");
    }
    Ok(())
}
