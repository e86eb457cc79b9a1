// src/collaborators/mod.rs
//! Interfaces of the external services the core consumes.
//!
//! Price capture, target lookup, prediction storage, the baseline and outcome
//! runners and the strategy service live outside this crate. Everything here
//! returns `anyhow::Result`; the core translates failures at its boundary.

pub mod memory;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{Prediction, PricePoint, Target};
use crate::paginate::{FieldValue, Filterable};

/// Result of a single value capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub target_id: String,
    pub value: f64,
    pub captured_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait PriceCapture: Send + Sync {
    /// `None` when no value could be captured (market closed, no quote).
    async fn fetch_and_capture_value(&self, target_id: &str) -> Result<Option<Snapshot>>;
}

#[async_trait::async_trait]
pub trait PriceHistory: Send + Sync {
    /// Points at or after `since`, in any order.
    async fn history(&self, target_id: &str, since: DateTime<Utc>) -> Result<Vec<PricePoint>>;
}

#[async_trait::async_trait]
pub trait TargetDirectory: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Target>>;
    async fn find_all_active(&self) -> Result<Vec<Target>>;
    async fn find_active_by_universe(&self, universe_id: &str) -> Result<Vec<Target>>;
    async fn find_by_domain(&self, domain: &str) -> Result<Vec<Target>>;
}

#[async_trait::async_trait]
pub trait PredictionSource: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Prediction>>;
    /// Predictions resolved on `date` (UTC), optionally within one universe.
    async fn resolved_on(&self, date: NaiveDate, universe_id: Option<&str>)
        -> Result<Vec<Prediction>>;
    /// Predictions for a target whose active period intersects `[from, to]`.
    async fn for_target_between(
        &self,
        target_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Prediction>>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineRun {
    pub created: u32,
    pub skipped: u32,
    pub errors: Vec<String>,
    pub targets: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerStatus {
    pub is_running: bool,
}

#[async_trait::async_trait]
pub trait BaselineRunner: Send + Sync {
    /// `Ok(None)` means the runner refused because it is already busy.
    async fn manual_run(
        &self,
        date: Option<NaiveDate>,
        universe_id: Option<&str>,
    ) -> Result<Option<BaselineRun>>;
    async fn status(&self) -> Result<RunnerStatus>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRun {
    pub snapshots_captured: u32,
    pub predictions_resolved: u32,
    pub predictions_expired: u32,
    pub errors: Vec<String>,
}

#[async_trait::async_trait]
pub trait OutcomeTracker: Send + Sync {
    async fn run_outcome_tracking(&self) -> Result<OutcomeRun>;
}

/// Named, versioned bundle of forecast sensitivity settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub is_system: bool,
    pub min_predictors: u32,
    pub consensus_threshold: f64,
    #[serde(default)]
    pub analyst_weights: BTreeMap<String, f64>,
    pub risk_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRecommendation {
    pub recommended: Strategy,
    pub reasoning: String,
    #[serde(default)]
    pub alternatives: Vec<Strategy>,
}

impl Filterable for Strategy {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "slug" => Some(self.slug.as_str().into()),
            "risk_level" => Some(self.risk_level.as_str().into()),
            _ => None,
        }
    }
}

#[async_trait::async_trait]
pub trait StrategyService: Send + Sync {
    async fn find_all(&self) -> Result<Vec<Strategy>>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Strategy>>;
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Strategy>>;
    async fn find_system_strategies(&self) -> Result<Vec<Strategy>>;
    async fn recommend_strategy(&self, universe_id: &str) -> Result<StrategyRecommendation>;
}
