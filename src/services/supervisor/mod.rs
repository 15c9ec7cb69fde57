//! The five supervisor loops plus the dispatcher, composed under one root
//! that owns their cancellation and join handles. Each loop gets its own
//! `tokio::spawn`; `Supervisor::shutdown` cancels them all and joins, so one
//! panicked loop never blocks the others from exiting.

pub mod anomaly_scorer;
pub mod approval_timeout;
pub mod blocking_detector;
pub mod heartbeat_monitor;
pub mod stuck_workflow;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::services::dispatcher::Dispatcher;

use anomaly_scorer::AnomalyScorer;
use approval_timeout::ApprovalTimeoutWatcher;
use blocking_detector::BlockingDetector;
use heartbeat_monitor::HeartbeatMonitor;
use stuck_workflow::StuckWorkflowDetector;

/// Owns the dispatcher and all five supervisor loops, each on its own task.
pub struct Supervisor {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Supervisor {
    #[must_use]
    pub fn spawn(
        dispatcher: Arc<Dispatcher>,
        heartbeat_monitor: Arc<HeartbeatMonitor>,
        stuck_workflow: Arc<StuckWorkflowDetector>,
        anomaly_scorer: Arc<AnomalyScorer>,
        approval_timeout: Arc<ApprovalTimeoutWatcher>,
        blocking_detector: Arc<BlockingDetector>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(6);

        let token = cancel.clone();
        handles.push(tokio::spawn(async move { dispatcher.run(token).await }));

        let token = cancel.clone();
        handles.push(tokio::spawn(async move { heartbeat_monitor.run(token).await }));

        let token = cancel.clone();
        handles.push(tokio::spawn(async move { stuck_workflow.run(token).await }));

        let token = cancel.clone();
        handles.push(tokio::spawn(async move { anomaly_scorer.run(token).await }));

        let token = cancel.clone();
        handles.push(tokio::spawn(async move { approval_timeout.run(token).await }));

        let token = cancel.clone();
        handles.push(tokio::spawn(async move { blocking_detector.run(token).await }));

        Self { cancel, handles }
    }

    /// Cancels every loop and waits for them to return.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for result in futures::future::join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "supervisor task panicked during shutdown");
            }
        }
    }
}
