// src/orchestration/scheduler.rs
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::Orchestrator;
use crate::config::OrchestrationConfig;

/// Run the daily pipeline every `interval_secs`, starting immediately.
pub fn spawn_daily_run(orch: Arc<Orchestrator>, cfg: OrchestrationConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = std::time::Duration::from_secs(cfg.interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let today = Utc::now().date_naive();
            let report = orch.run_all(Some(today), cfg.universe_id.as_deref()).await;
            tracing::info!(
                target: "orchestration",
                date = %today,
                errors = report.errors().len(),
                "scheduled daily run tick"
            );
        }
    })
}
