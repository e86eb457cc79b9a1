// src/analysis/mod.rs
//! # Miss Analysis
//! Audits a [`MissedOpportunity`](crate::detection::MissedOpportunity): which
//! events drove the move, which signals
//! we had or lacked, which data sources were missing. Produces learnings for
//! the review queue and informational tool suggestions.
//!
//! Analysis runs once per missed opportunity. The status moves
//! `pending -> analyzing -> completed` and the findings are written back in
//! the same step that completes it.

pub mod drivers;
pub mod learnings;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::collaborators::TargetDirectory;
use crate::config::AnalysisConfig;
use crate::detection::{AnalysisStatus, MissedOpportunityStore};
use crate::error::{CoreError, Result};
use crate::learning_queue::{LearningQueue, LearningType, NewQueueItem, ScopeLevel, ScopeQualifiers};
use crate::model::Direction;
use crate::notify::{NotificationEvent, NotifierMux};

/// A news item or market event supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketEvent {
    pub headline: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub source: String,
    pub occurred_at: DateTime<Utc>,
    /// Direction the event implies, when known.
    #[serde(default)]
    pub direction: Option<Direction>,
    #[serde(default = "default_importance")]
    pub importance: f64,
}

fn default_importance() -> f64 {
    0.5
}

/// What the caller knows about the move's surroundings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisContext {
    pub events: Vec<MarketEvent>,
    /// Signals that were observable for the target at the time.
    pub signals_observed: Vec<String>,
    /// Data feeds that were connected for the target at the time.
    pub available_sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredDriver {
    pub headline: String,
    pub category: String,
    pub source: String,
    pub occurred_at: DateTime<Utc>,
    pub relevance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedLearning {
    #[serde(rename = "type")]
    pub learning_type: LearningType,
    pub content: String,
    pub scope: ScopeLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSuggestion {
    pub tool_type: String,
    pub description: String,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissAnalysisResult {
    pub missed_opportunity_id: String,
    pub discovered_drivers: Vec<DiscoveredDriver>,
    pub signals_we_had: Vec<String>,
    pub signal_gaps: Vec<String>,
    pub source_gaps: Vec<String>,
    pub suggested_learnings: Vec<SuggestedLearning>,
    pub tool_suggestions: Vec<ToolSuggestion>,
    pub queued_item_ids: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
}

pub struct MissAnalyzer {
    store: Arc<MissedOpportunityStore>,
    targets: Arc<dyn TargetDirectory>,
    queue: Arc<LearningQueue>,
    notifier: NotifierMux,
    cfg: AnalysisConfig,
}

impl MissAnalyzer {
    pub fn new(
        store: Arc<MissedOpportunityStore>,
        targets: Arc<dyn TargetDirectory>,
        queue: Arc<LearningQueue>,
        notifier: NotifierMux,
        cfg: AnalysisConfig,
    ) -> Self {
        Self {
            store,
            targets,
            queue,
            notifier,
            cfg,
        }
    }

    pub async fn analyze(
        &self,
        missed_opportunity_id: &str,
        ctx: AnalysisContext,
    ) -> Result<MissAnalysisResult> {
        // cheap pre-checks before touching collaborators
        let mo = self.store.get(missed_opportunity_id)?;
        if mo.analysis_status != AnalysisStatus::Pending {
            return Err(CoreError::AlreadyAnalyzed(mo.id));
        }
        let target = self
            .targets
            .find_by_id(&mo.target_id)
            .await
            .map_err(|e| {
                CoreError::upstream("ANALYSIS_FAILED", "Failed to analyze missed opportunity", &e)
            })?
            .ok_or_else(|| CoreError::not_found("target", mo.target_id.clone()))?;

        // the claim; a concurrent analyzer loses here
        let mo = self.store.begin_analysis(missed_opportunity_id)?;

        let catalog = self.cfg.catalog_for(&target.domain);
        let found = drivers::discover(
            &ctx.events,
            mo.move_direction,
            mo.move_start,
            mo.move_end,
            self.cfg.driver_lead_hours,
            self.cfg.max_drivers,
            self.cfg.min_driver_relevance,
        );
        let (signals_we_had, signal_gaps) =
            learnings::split_signals(&catalog, &ctx.signals_observed);
        let source_gaps = learnings::source_gaps(&catalog, &ctx.available_sources);
        let drafts = learnings::draft(
            &target,
            mo.move_direction,
            mo.move_percent,
            &found,
            &signals_we_had,
            &signal_gaps,
        );
        let tool_suggestions = learnings::tool_suggestions(&target, &source_gaps);
        let suggested: Vec<SuggestedLearning> =
            drafts.iter().map(|d| d.suggestion.clone()).collect();

        let done = self
            .store
            .complete_analysis(&mo.id, found.clone(), source_gaps.clone(), suggested.clone())?;

        let qualifiers = ScopeQualifiers {
            domain: Some(target.domain.clone()).filter(|d| !d.trim().is_empty()),
            universe_id: target.universe_id.clone(),
            target_id: Some(target.id.clone()),
            analyst_id: None,
        };
        let mut queued_item_ids = Vec::with_capacity(drafts.len());
        for d in drafts {
            let req = NewQueueItem {
                suggested_scope_level: d.suggestion.scope,
                qualifiers: qualifiers.clone(),
                suggested_learning_type: d.suggestion.learning_type,
                suggested_title: d.title,
                suggested_description: d.suggestion.content,
                suggested_config: d.config,
                source_evaluation_id: None,
                source_missed_opportunity_id: Some(mo.id.clone()),
                ai_reasoning: d.reasoning,
                ai_confidence: d.confidence,
            };
            match self.queue.submit(req) {
                Ok(item) => {
                    self.notifier.notify(&NotificationEvent::review_requested(&item)).await;
                    queued_item_ids.push(item.id);
                }
                Err(e) => warn!(target: "analysis", mo = %mo.id, "learning not queued: {e}"),
            }
        }

        counter!("miss_analyses_total").increment(1);
        info!(
            target: "analysis",
            mo = %mo.id,
            drivers = found.len(),
            source_gaps = source_gaps.len(),
            queued = queued_item_ids.len(),
            "analysis completed"
        );

        Ok(MissAnalysisResult {
            missed_opportunity_id: mo.id,
            discovered_drivers: found,
            signals_we_had,
            signal_gaps,
            source_gaps,
            suggested_learnings: suggested,
            tool_suggestions,
            queued_item_ids,
            analyzed_at: done.analyzed_at.unwrap_or_else(Utc::now),
        })
    }
}
