// src/collaborators/memory.rs
//! In-memory collaborator implementations for local runs and tests.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{
    BaselineRun, BaselineRunner, OutcomeRun, OutcomeTracker, PredictionSource, PriceCapture,
    PriceHistory, RunnerStatus, Snapshot, Strategy, StrategyRecommendation, StrategyService,
    TargetDirectory,
};
use crate::model::{Prediction, PredictionStatus, PricePoint, Target};

#[derive(Debug, Default)]
pub struct InMemoryTargets {
    inner: RwLock<Vec<Target>>,
}

impl InMemoryTargets {
    pub fn new(targets: Vec<Target>) -> Self {
        Self {
            inner: RwLock::new(targets),
        }
    }

    pub fn insert(&self, t: Target) {
        self.inner.write().expect("targets lock poisoned").push(t);
    }

    fn select(&self, f: impl Fn(&Target) -> bool) -> Vec<Target> {
        let g = self.inner.read().expect("targets lock poisoned");
        g.iter().filter(|t| f(t)).cloned().collect()
    }
}

#[async_trait::async_trait]
impl TargetDirectory for InMemoryTargets {
    async fn find_by_id(&self, id: &str) -> Result<Option<Target>> {
        Ok(self.select(|t| t.id == id).into_iter().next())
    }
    async fn find_all_active(&self) -> Result<Vec<Target>> {
        Ok(self.select(|t| t.is_active))
    }
    async fn find_active_by_universe(&self, universe_id: &str) -> Result<Vec<Target>> {
        Ok(self.select(|t| t.is_active && t.universe_id.as_deref() == Some(universe_id)))
    }
    async fn find_by_domain(&self, domain: &str) -> Result<Vec<Target>> {
        Ok(self.select(|t| t.domain.eq_ignore_ascii_case(domain)))
    }
}

/// Price series per target; capture returns the latest stored point.
#[derive(Debug, Default)]
pub struct InMemoryPrices {
    inner: RwLock<HashMap<String, Vec<PricePoint>>>,
}

impl InMemoryPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, target_id: &str, at: DateTime<Utc>, value: f64) {
        let mut g = self.inner.write().expect("prices lock poisoned");
        g.entry(target_id.to_string())
            .or_default()
            .push(PricePoint { at, value });
    }
}

#[async_trait::async_trait]
impl PriceHistory for InMemoryPrices {
    async fn history(&self, target_id: &str, since: DateTime<Utc>) -> Result<Vec<PricePoint>> {
        let g = self.inner.read().expect("prices lock poisoned");
        Ok(g.get(target_id)
            .map(|v| v.iter().filter(|p| p.at >= since).copied().collect())
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl PriceCapture for InMemoryPrices {
    async fn fetch_and_capture_value(&self, target_id: &str) -> Result<Option<Snapshot>> {
        let g = self.inner.read().expect("prices lock poisoned");
        let latest = g
            .get(target_id)
            .and_then(|v| v.iter().max_by_key(|p| p.at).copied());
        Ok(latest.map(|p| Snapshot {
            target_id: target_id.to_string(),
            value: p.value,
            captured_at: Utc::now(),
        }))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPredictions {
    inner: RwLock<Vec<Prediction>>,
}

impl InMemoryPredictions {
    pub fn new(predictions: Vec<Prediction>) -> Self {
        Self {
            inner: RwLock::new(predictions),
        }
    }

    pub fn insert(&self, p: Prediction) {
        self.inner.write().expect("predictions lock poisoned").push(p);
    }
}

#[async_trait::async_trait]
impl PredictionSource for InMemoryPredictions {
    async fn find_by_id(&self, id: &str) -> Result<Option<Prediction>> {
        let g = self.inner.read().expect("predictions lock poisoned");
        Ok(g.iter().find(|p| p.id == id).cloned())
    }

    async fn resolved_on(
        &self,
        date: NaiveDate,
        universe_id: Option<&str>,
    ) -> Result<Vec<Prediction>> {
        let g = self.inner.read().expect("predictions lock poisoned");
        Ok(g.iter()
            .filter(|p| p.status == PredictionStatus::Resolved)
            .filter(|p| p.resolved_at.map(|t| t.date_naive()) == Some(date))
            .filter(|p| universe_id.is_none() || p.universe_id.as_deref() == universe_id)
            .cloned()
            .collect())
    }

    async fn for_target_between(
        &self,
        target_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Prediction>> {
        let g = self.inner.read().expect("predictions lock poisoned");
        Ok(g.iter()
            .filter(|p| p.target_id == target_id && p.overlaps(from, to))
            .cloned()
            .collect())
    }
}

/// Runner that creates nothing; for deployments without a forecasting backend.
#[derive(Debug, Default)]
pub struct NoopBaselineRunner;

#[async_trait::async_trait]
impl BaselineRunner for NoopBaselineRunner {
    async fn manual_run(
        &self,
        _date: Option<NaiveDate>,
        _universe_id: Option<&str>,
    ) -> Result<Option<BaselineRun>> {
        Ok(Some(BaselineRun::default()))
    }
    async fn status(&self) -> Result<RunnerStatus> {
        Ok(RunnerStatus::default())
    }
}

#[derive(Debug, Default)]
pub struct NoopOutcomeTracker;

#[async_trait::async_trait]
impl OutcomeTracker for NoopOutcomeTracker {
    async fn run_outcome_tracking(&self) -> Result<OutcomeRun> {
        Ok(OutcomeRun::default())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStrategies {
    strategies: Vec<Strategy>,
}

impl InMemoryStrategies {
    pub fn new(strategies: Vec<Strategy>) -> Self {
        Self { strategies }
    }

    /// Three system strategies: conservative, balanced, aggressive.
    pub fn with_system_defaults() -> Self {
        let mk = |slug: &str,
                  name: &str,
                  min_predictors: u32,
                  consensus: f64,
                  risk: &str| Strategy {
            id: format!("sys-{slug}"),
            slug: slug.to_string(),
            name: name.to_string(),
            version: 1,
            is_system: true,
            min_predictors,
            consensus_threshold: consensus,
            analyst_weights: Default::default(),
            risk_level: risk.to_string(),
        };
        Self::new(vec![
            mk("conservative", "Conservative", 4, 0.75, "low"),
            mk("balanced", "Balanced", 3, 0.6, "medium"),
            mk("aggressive", "Aggressive", 2, 0.5, "high"),
        ])
    }
}

#[async_trait::async_trait]
impl StrategyService for InMemoryStrategies {
    async fn find_all(&self) -> Result<Vec<Strategy>> {
        Ok(self.strategies.clone())
    }
    async fn find_by_id(&self, id: &str) -> Result<Option<Strategy>> {
        Ok(self.strategies.iter().find(|s| s.id == id).cloned())
    }
    async fn find_by_slug(&self, slug: &str) -> Result<Option<Strategy>> {
        Ok(self.strategies.iter().find(|s| s.slug == slug).cloned())
    }
    async fn find_system_strategies(&self) -> Result<Vec<Strategy>> {
        Ok(self.strategies.iter().filter(|s| s.is_system).cloned().collect())
    }
    async fn recommend_strategy(&self, universe_id: &str) -> Result<StrategyRecommendation> {
        let recommended = self
            .strategies
            .iter()
            .find(|s| s.risk_level == "medium")
            .or_else(|| self.strategies.first())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no strategies configured"))?;
        let alternatives = self
            .strategies
            .iter()
            .filter(|s| s.id != recommended.id)
            .cloned()
            .collect();
        Ok(StrategyRecommendation {
            reasoning: format!(
                "No performance history for universe {universe_id}; defaulting to medium risk"
            ),
            recommended,
            alternatives,
        })
    }
}
