// src/orchestration/mod.rs
//! # Daily orchestration
//! fetch prices -> create baselines -> resolve outcomes, once per logical day.
//!
//! Stages are isolated: a failing stage is recorded as
//! `"<label>: <message>"` and the next stage still runs. `run_all` itself
//! never fails. Baseline creation is single-flight; a second caller gets
//! [`BaselineOutcome::Busy`] instead of waiting.

pub mod scheduler;

use chrono::{NaiveDate, Utc};
use metrics::{counter, gauge};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::collaborators::{
    BaselineRun, BaselineRunner, OutcomeRun, OutcomeTracker, PriceCapture, RunnerStatus,
    TargetDirectory,
};
use crate::error::{CoreError, Result};

/// Run-state token for baseline creation. Check-and-set is a single CAS;
/// the flag clears when the [`RunToken`] drops, success or not.
#[derive(Debug, Default)]
pub struct RunGuard {
    running: AtomicBool,
}

pub struct RunToken<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunToken<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl RunGuard {
    pub fn try_acquire(&self) -> Option<RunToken<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunToken { flag: &self.running })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BaselineOutcome {
    Idle(BaselineRun),
    Busy,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceFetchSummary {
    pub targets: u32,
    pub captured: u32,
    /// Targets for which no value was available.
    pub skipped: u32,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FetchPrices,
    CreateBaselines,
    ResolveOutcomes,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::FetchPrices => "Price fetch",
            Stage::CreateBaselines => "Baseline creation",
            Stage::ResolveOutcomes => "Outcome resolution",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Stage::FetchPrices => "fetchPrices",
            Stage::CreateBaselines => "createBaselines",
            Stage::ResolveOutcomes => "resolveOutcomes",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Prices(PriceFetchSummary),
    Baselines(BaselineRun),
    Outcomes(OutcomeRun),
}

impl Serialize for StageOutput {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            StageOutput::Prices(v) => v.serialize(s),
            StageOutput::Baselines(v) => v.serialize(s),
            StageOutput::Outcomes(v) => v.serialize(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageResult {
    pub stage: Stage,
    pub outcome: std::result::Result<StageOutput, String>,
}

/// Ordered stage results. Serializes to the external shape: one key per
/// successful stage plus the `errors` list.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRunReport {
    pub date: Option<NaiveDate>,
    pub universe_id: Option<String>,
    pub stages: Vec<StageResult>,
}

impl DailyRunReport {
    pub fn errors(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter_map(|r| r.outcome.as_ref().err().map(|m| format!("{}: {}", r.stage.label(), m)))
            .collect()
    }

    pub fn output(&self, stage: Stage) -> Option<&StageOutput> {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .and_then(|r| r.outcome.as_ref().ok())
    }
}

impl Serialize for DailyRunReport {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(None)?;
        if let Some(d) = &self.date {
            map.serialize_entry("date", d)?;
        }
        if let Some(u) = &self.universe_id {
            map.serialize_entry("universeId", u)?;
        }
        for r in &self.stages {
            if let Ok(out) = &r.outcome {
                map.serialize_entry(r.stage.key(), out)?;
            }
        }
        map.serialize_entry("errors", &self.errors())?;
        map.end()
    }
}

pub struct Orchestrator {
    targets: Arc<dyn TargetDirectory>,
    capture: Arc<dyn PriceCapture>,
    baselines: Arc<dyn BaselineRunner>,
    outcomes: Arc<dyn OutcomeTracker>,
    guard: RunGuard,
}

impl Orchestrator {
    pub fn new(
        targets: Arc<dyn TargetDirectory>,
        capture: Arc<dyn PriceCapture>,
        baselines: Arc<dyn BaselineRunner>,
        outcomes: Arc<dyn OutcomeTracker>,
    ) -> Self {
        Self {
            targets,
            capture,
            baselines,
            outcomes,
            guard: RunGuard::default(),
        }
    }

    pub fn guard(&self) -> &RunGuard {
        &self.guard
    }

    /// Capture a value for every active target (optionally one universe).
    /// Per-target failures are collected; only the target lookup can fail the stage.
    pub async fn fetch_prices(&self, universe_id: Option<&str>) -> Result<PriceFetchSummary> {
        let targets = match universe_id {
            Some(u) => self.targets.find_active_by_universe(u).await,
            None => self.targets.find_all_active().await,
        }
        .map_err(|e| CoreError::upstream("FETCH_PRICES_FAILED", "Failed to fetch prices", &e))?;

        let mut summary = PriceFetchSummary {
            targets: targets.len() as u32,
            ..Default::default()
        };
        for t in &targets {
            match self.capture.fetch_and_capture_value(&t.id).await {
                Ok(Some(_)) => summary.captured += 1,
                Ok(None) => summary.skipped += 1,
                Err(e) => {
                    warn!(target: "orchestration", target_id = %t.id, "capture failed: {e:#}");
                    summary.errors.push(format!("{}: {e}", t.symbol));
                }
            }
        }
        info!(
            target: "orchestration",
            targets = summary.targets,
            captured = summary.captured,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            "prices fetched"
        );
        Ok(summary)
    }

    pub async fn create_baselines(
        &self,
        date: Option<NaiveDate>,
        universe_id: Option<&str>,
    ) -> Result<BaselineOutcome> {
        let Some(_token) = self.guard.try_acquire() else {
            info!(target: "orchestration", "baseline creation already running");
            return Ok(BaselineOutcome::Busy);
        };
        let run = self
            .baselines
            .manual_run(date, universe_id)
            .await
            .map_err(|e| {
                CoreError::upstream("CREATE_BASELINES_FAILED", "Failed to create baselines", &e)
            })?;
        Ok(match run {
            Some(r) => {
                info!(
                    target: "orchestration",
                    created = r.created,
                    skipped = r.skipped,
                    "baselines created"
                );
                BaselineOutcome::Idle(r)
            }
            None => BaselineOutcome::Busy,
        })
    }

    pub async fn resolve_outcomes(&self) -> Result<OutcomeRun> {
        let run = self
            .outcomes
            .run_outcome_tracking()
            .await
            .map_err(|e| {
                CoreError::upstream("RESOLVE_OUTCOMES_FAILED", "Failed to resolve outcomes", &e)
            })?;
        info!(
            target: "orchestration",
            resolved = run.predictions_resolved,
            expired = run.predictions_expired,
            "outcomes resolved"
        );
        Ok(run)
    }

    /// Busy when either this process or the runner reports a run in progress.
    pub async fn runner_status(&self) -> Result<RunnerStatus> {
        let remote = self
            .baselines
            .status()
            .await
            .map_err(|e| {
                CoreError::upstream("RUNNER_STATUS_FAILED", "Failed to read runner status", &e)
            })?;
        Ok(RunnerStatus {
            is_running: remote.is_running || self.guard.is_running(),
        })
    }

    pub async fn run_all(
        &self,
        date: Option<NaiveDate>,
        universe_id: Option<&str>,
    ) -> DailyRunReport {
        let mut stages = Vec::with_capacity(3);

        stages.push(StageResult {
            stage: Stage::FetchPrices,
            outcome: self
                .fetch_prices(universe_id)
                .await
                .map(StageOutput::Prices)
                .map_err(|e| e.to_string()),
        });

        stages.push(StageResult {
            stage: Stage::CreateBaselines,
            outcome: match self.create_baselines(date, universe_id).await {
                Ok(BaselineOutcome::Idle(r)) => Ok(StageOutput::Baselines(r)),
                Ok(BaselineOutcome::Busy) => Err("runner busy".to_string()),
                Err(e) => Err(e.to_string()),
            },
        });

        stages.push(StageResult {
            stage: Stage::ResolveOutcomes,
            outcome: self
                .resolve_outcomes()
                .await
                .map(StageOutput::Outcomes)
                .map_err(|e| e.to_string()),
        });

        for r in stages.iter().filter(|r| r.outcome.is_err()) {
            counter!("daily_run_stage_failures_total", "stage" => r.stage.key()).increment(1);
        }
        gauge!("daily_run_last_ts").set(Utc::now().timestamp() as f64);

        let report = DailyRunReport {
            date,
            universe_id: universe_id.map(str::to_string),
            stages,
        };
        let errors = report.errors();
        if errors.is_empty() {
            info!(target: "orchestration", "daily run completed");
        } else {
            warn!(
                target: "orchestration",
                failed = errors.len(),
                "daily run completed with errors: {errors:?}"
            );
        }
        report
    }
}
