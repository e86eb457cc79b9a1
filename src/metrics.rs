use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the process-wide Prometheus recorder. Fails if one is already installed.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_pipeline_metrics();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time descriptions so series carry HELP text on /metrics.
pub fn describe_pipeline_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "missed_opportunities_detected_total",
            "New missed opportunities recorded by detection."
        );
        describe_counter!(
            "miss_investigations_total",
            "Single-prediction miss investigations, by causal level."
        );
        describe_counter!("miss_analyses_total", "Completed missed-opportunity analyses.");
        describe_counter!(
            "learning_queue_submitted_total",
            "Learnings queued for human review."
        );
        describe_counter!(
            "learning_queue_reviewed_total",
            "Queue items reviewed, by decision."
        );
        describe_counter!(
            "learnings_materialized_total",
            "Reviewed queue items turned into active learnings."
        );
        describe_counter!(
            "daily_run_stage_failures_total",
            "Daily pipeline stages that failed, by stage."
        );
        describe_gauge!("daily_run_last_ts", "Unix time of the last daily pipeline run.");
    });
}
