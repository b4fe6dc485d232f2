use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::orchestrator_task::TaskOrchestrator;

/// Backstop for calls that never return: fails active tasks past their deadline.
pub async fn run_monitor_loop(orchestrator: Arc<TaskOrchestrator>, every: Duration, cancel: CancellationToken) {
    info!(interval_ms = every.as_millis() as u64, "monitor_loop: started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(every) => {
                let swept = orchestrator.sweep_expired(Utc::now()).await;
                if !swept.is_empty() {
                    warn!(count = swept.len(), "monitor_loop: failed expired tasks");
                }
            }
        }
    }

    info!("monitor_loop: stopped");
}
