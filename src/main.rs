//! Forecast miss analyzer: binary entrypoint.
//! Boots the Axum HTTP server with the action API, `/metrics`, and (when
//! enabled) the daily pipeline scheduler.

use std::sync::Arc;

use forecast_miss_analyzer::config::load_pipeline_config_default;
use forecast_miss_analyzer::metrics::Metrics;
use forecast_miss_analyzer::orchestration::scheduler::spawn_daily_run;
use forecast_miss_analyzer::{app, Collaborators, NotifierMux, PipelineCore};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("forecast_miss_analyzer=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = load_pipeline_config_default()?;
    let notifier = NotifierMux::from_env();
    if notifier.is_empty() {
        tracing::info!("review notifications disabled (no SLACK_WEBHOOK_URL)");
    }

    let core = Arc::new(PipelineCore::new(Collaborators::in_memory(), config.clone(), notifier));

    if std::env::var("DAILY_RUN_ENABLED").is_ok_and(|v| v == "1") {
        spawn_daily_run(core.orchestrator.clone(), config.orchestration.clone());
        tracing::info!(
            interval_secs = config.orchestration.interval_secs,
            "daily run scheduler started"
        );
    }

    let metrics = Metrics::init()?;
    let router = app(core, Some(&metrics));

    Ok(router.into())
}
