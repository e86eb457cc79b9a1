// src/pipeline.rs
//! Wiring: one [`PipelineCore`] owns every component and the shared stores.

use std::sync::Arc;

use crate::analysis::MissAnalyzer;
use crate::collaborators::memory::{
    InMemoryPredictions, InMemoryPrices, InMemoryStrategies, InMemoryTargets, NoopBaselineRunner,
    NoopOutcomeTracker,
};
use crate::collaborators::{
    BaselineRunner, OutcomeTracker, PredictionSource, PriceCapture, PriceHistory, StrategyService,
    TargetDirectory,
};
use crate::config::PipelineConfig;
use crate::detection::{DetectionEngine, MissedOpportunityStore};
use crate::investigation::InvestigationEngine;
use crate::learning_queue::LearningQueue;
use crate::notify::NotifierMux;
use crate::orchestration::Orchestrator;

/// External services the core consumes.
#[derive(Clone)]
pub struct Collaborators {
    pub targets: Arc<dyn TargetDirectory>,
    pub history: Arc<dyn PriceHistory>,
    pub capture: Arc<dyn PriceCapture>,
    pub predictions: Arc<dyn PredictionSource>,
    pub baselines: Arc<dyn BaselineRunner>,
    pub outcomes: Arc<dyn OutcomeTracker>,
    pub strategies: Arc<dyn StrategyService>,
}

impl Collaborators {
    /// Empty in-memory collaborators with the system strategies.
    pub fn in_memory() -> Self {
        let prices = Arc::new(InMemoryPrices::new());
        Self {
            targets: Arc::new(InMemoryTargets::default()),
            history: prices.clone(),
            capture: prices,
            predictions: Arc::new(InMemoryPredictions::default()),
            baselines: Arc::new(NoopBaselineRunner),
            outcomes: Arc::new(NoopOutcomeTracker),
            strategies: Arc::new(InMemoryStrategies::with_system_defaults()),
        }
    }
}

pub struct PipelineCore {
    pub detection: DetectionEngine,
    pub investigation: InvestigationEngine,
    pub analysis: MissAnalyzer,
    pub queue: Arc<LearningQueue>,
    pub orchestrator: Arc<Orchestrator>,
    pub strategies: Arc<dyn StrategyService>,
    pub config: PipelineConfig,
}

impl PipelineCore {
    pub fn new(c: Collaborators, config: PipelineConfig, notifier: NotifierMux) -> Self {
        let store = Arc::new(MissedOpportunityStore::new());
        let queue = Arc::new(LearningQueue::new());
        Self {
            detection: DetectionEngine::new(
                c.targets.clone(),
                c.history,
                c.predictions.clone(),
                store.clone(),
                config.detection.clone(),
            ),
            investigation: InvestigationEngine::new(c.predictions, config.investigation.clone()),
            analysis: MissAnalyzer::new(
                store,
                c.targets.clone(),
                queue.clone(),
                notifier,
                config.analysis.clone(),
            ),
            queue,
            orchestrator: Arc::new(Orchestrator::new(
                c.targets,
                c.capture,
                c.baselines,
                c.outcomes,
            )),
            strategies: c.strategies,
            config,
        }
    }
}
