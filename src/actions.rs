// src/actions.rs
//! Action dispatch: `{action, params, context}` in, uniform envelope out.
//!
//! Action names form a closed set matched case-insensitively. Every failure,
//! validation or upstream, comes back as `success: false` with a stable
//! error `code`; nothing escapes as a panic or raw collaborator error.

use axum::http::StatusCode;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::analysis::AnalysisContext;
use crate::detection::{AnalysisStatus, DetectOptions, MissedOpportunityFilters};
use crate::error::{CoreError, Result};
use crate::learning_queue::{FinalOverrides, LearningType, QueueFilters, ReviewStatus, ScopeLevel};
use crate::orchestration::BaselineOutcome;
use crate::paginate::{ListQuery, Page, PageMeta, PageRequest};
use crate::pipeline::PipelineCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Detect,
    ListMissedOpportunities,
    GetMissedOpportunity,
    Analyze,
    IdentifyMisses,
    InvestigateMiss,
    ListLearnings,
    GetLearning,
    RespondLearning,
    MaterializeLearning,
    ListActiveLearnings,
    LearningStats,
    FetchPrices,
    CreateBaselines,
    ResolveOutcomes,
    RunAll,
    GetRunnerStatus,
    ListStrategies,
    GetStrategy,
    RecommendStrategy,
}

impl Action {
    pub const ALL: [Action; 20] = [
        Action::Detect,
        Action::ListMissedOpportunities,
        Action::GetMissedOpportunity,
        Action::Analyze,
        Action::IdentifyMisses,
        Action::InvestigateMiss,
        Action::ListLearnings,
        Action::GetLearning,
        Action::RespondLearning,
        Action::MaterializeLearning,
        Action::ListActiveLearnings,
        Action::LearningStats,
        Action::FetchPrices,
        Action::CreateBaselines,
        Action::ResolveOutcomes,
        Action::RunAll,
        Action::GetRunnerStatus,
        Action::ListStrategies,
        Action::GetStrategy,
        Action::RecommendStrategy,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Action::Detect => "detect",
            Action::ListMissedOpportunities => "listMissedOpportunities",
            Action::GetMissedOpportunity => "getMissedOpportunity",
            Action::Analyze => "analyze",
            Action::IdentifyMisses => "identifyMisses",
            Action::InvestigateMiss => "investigateMiss",
            Action::ListLearnings => "listLearnings",
            Action::GetLearning => "getLearning",
            Action::RespondLearning => "respondLearning",
            Action::MaterializeLearning => "materializeLearning",
            Action::ListActiveLearnings => "listActiveLearnings",
            Action::LearningStats => "learningStats",
            Action::FetchPrices => "fetchPrices",
            Action::CreateBaselines => "createBaselines",
            Action::ResolveOutcomes => "resolveOutcomes",
            Action::RunAll => "runAll",
            Action::GetRunnerStatus => "getRunnerStatus",
            Action::ListStrategies => "listStrategies",
            Action::GetStrategy => "getStrategy",
            Action::RecommendStrategy => "recommendStrategy",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.name().eq_ignore_ascii_case(raw))
            .ok_or_else(|| CoreError::UnsupportedAction {
                action: raw.to_string(),
                supported: Self::ALL.iter().map(|a| a.name()).collect(),
            })
    }
}

/// Who is calling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionContext {
    pub org_slug: Option<String>,
    pub user_id: Option<String>,
    pub agent_slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub context: ExecutionContext,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PageMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            metadata: None,
            error: None,
        }
    }

    pub fn failure(e: &CoreError) -> Self {
        Self {
            success: false,
            data: None,
            metadata: None,
            error: Some(ErrorBody {
                code: e.code().to_string(),
                message: e.to_string(),
                details: e.details(),
            }),
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

enum Reply {
    Data(Value),
    Paged(Value, PageMeta),
}

fn data<T: Serialize>(v: &T) -> Result<Reply> {
    Ok(Reply::Data(to_json(v)?))
}

fn paged<T: Serialize>(p: Page<T>) -> Result<Reply> {
    Ok(Reply::Paged(to_json(&p.items)?, p.meta))
}

fn to_json<T: Serialize>(v: &T) -> Result<Value> {
    serde_json::to_value(v)
        .map_err(|e| CoreError::validation("SERIALIZATION_FAILED", e.to_string()))
}

fn params<T: DeserializeOwned + Default>(raw: Value) -> Result<T> {
    if raw.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(raw).map_err(|e| CoreError::validation("INVALID_PARAMS", e.to_string()))
}

fn required(v: Option<String>, code: &'static str, field: &str) -> Result<String> {
    v.filter(|s| !s.trim().is_empty())
        .ok_or_else(|| CoreError::missing(code, field))
}

fn parse_day(d: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d")
        .map_err(|_| {
            CoreError::validation("INVALID_PARAMS", format!("date must be YYYY-MM-DD (got '{d}')"))
        })
}

fn parse_date(raw: Option<&str>) -> Result<Option<NaiveDate>> {
    raw.map(parse_day).transpose()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PagingParams {
    page: Option<i64>,
    page_size: Option<i64>,
}

impl PagingParams {
    fn request(&self) -> Result<PageRequest> {
        PageRequest::new(self.page, self.page_size)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct IdParams {
    id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DetectParams {
    target_id: Option<String>,
    #[serde(flatten)]
    options: DetectOptions,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListMissedParams {
    target_id: Option<String>,
    status: Option<AnalysisStatus>,
    min_significance: Option<f64>,
    #[serde(flatten)]
    paging: PagingParams,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AnalyzeParams {
    #[serde(alias = "id")]
    missed_opportunity_id: Option<String>,
    context: AnalysisContext,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DateUniverseParams {
    date: Option<String>,
    universe_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PredictionParams {
    #[serde(alias = "id")]
    prediction_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ListLearningsParams {
    status: Option<ReviewStatus>,
    suggested_scope_level: Option<ScopeLevel>,
    suggested_learning_type: Option<LearningType>,
    #[serde(flatten)]
    paging: PagingParams,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RespondParams {
    id: Option<String>,
    decision: Option<String>,
    reviewer_notes: Option<String>,
    reviewer_user_id: Option<String>,
    #[serde(flatten)]
    overrides: FinalOverrides,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ScopeParams {
    scope_level: Option<ScopeLevel>,
    #[serde(flatten)]
    paging: PagingParams,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StrategyParams {
    id: Option<String>,
    slug: Option<String>,
    system_only: bool,
    risk_level: Option<String>,
    universe_id: Option<String>,
    #[serde(flatten)]
    paging: PagingParams,
}

impl PipelineCore {
    pub async fn dispatch(&self, req: ActionRequest) -> Envelope {
        self.dispatch_with_status(req).await.1
    }

    /// Envelope plus the HTTP status its error maps to (200 on success).
    pub async fn dispatch_with_status(&self, req: ActionRequest) -> (StatusCode, Envelope) {
        let action = match Action::parse(&req.action) {
            Ok(a) => a,
            Err(e) => return (e.status(), Envelope::failure(&e)),
        };
        debug!(
            target: "actions",
            action = action.name(),
            org = req.context.org_slug.as_deref().unwrap_or("-"),
            "dispatch"
        );
        match self.execute(action, req.params, &req.context).await {
            Ok(Reply::Data(v)) => (StatusCode::OK, Envelope::ok(v)),
            Ok(Reply::Paged(v, meta)) => (
                StatusCode::OK,
                Envelope {
                    metadata: Some(meta),
                    ..Envelope::ok(v)
                },
            ),
            Err(e) => {
                tracing::info!(
                    target: "actions",
                    action = action.name(),
                    code = e.code(),
                    "action failed: {e}"
                );
                (e.status(), Envelope::failure(&e))
            }
        }
    }

    async fn execute(&self, action: Action, raw: Value, ctx: &ExecutionContext) -> Result<Reply> {
        match action {
            Action::Detect => {
                let p: DetectParams = params(raw)?;
                let target_id = required(p.target_id, "MISSING_ID", "targetId")?;
                data(&self.detection.detect(&target_id, p.options).await?)
            }
            Action::ListMissedOpportunities => {
                let p: ListMissedParams = params(raw)?;
                let filters = MissedOpportunityFilters {
                    target_id: p.target_id,
                    status: p.status,
                    min_significance: p.min_significance,
                };
                paged(self.detection.store().list(&filters, p.paging.request()?))
            }
            Action::GetMissedOpportunity => {
                let p: IdParams = params(raw)?;
                let id = required(p.id, "MISSING_ID", "id")?;
                data(&self.detection.store().get(&id)?)
            }
            Action::Analyze => {
                let p: AnalyzeParams = params(raw)?;
                let id = required(p.missed_opportunity_id, "MISSING_ID", "missedOpportunityId")?;
                data(&self.analysis.analyze(&id, p.context).await?)
            }
            Action::IdentifyMisses => {
                let p: DateUniverseParams = params(raw)?;
                let date = parse_day(&required(p.date, "MISSING_DATE", "date")?)?;
                data(&self.investigation.identify_misses(date, p.universe_id.as_deref()).await?)
            }
            Action::InvestigateMiss => {
                let p: PredictionParams = params(raw)?;
                let id = required(p.prediction_id, "MISSING_ID", "predictionId")?;
                data(&self.investigation.investigate_miss_by_id(&id).await?)
            }
            Action::ListLearnings => {
                let p: ListLearningsParams = params(raw)?;
                let filters = QueueFilters {
                    suggested_scope_level: p.suggested_scope_level,
                    suggested_learning_type: p.suggested_learning_type,
                };
                let status = p.status.unwrap_or(ReviewStatus::Pending);
                paged(self.queue.list(status, &filters, p.paging.request()?))
            }
            Action::GetLearning => {
                let p: IdParams = params(raw)?;
                let id = required(p.id, "MISSING_ID", "id")?;
                data(&self.queue.get(&id)?)
            }
            Action::RespondLearning => {
                let p: RespondParams = params(raw)?;
                let id = required(p.id, "MISSING_ID", "id")?;
                let decision = required(p.decision, "MISSING_DECISION", "decision")?;
                let reviewer = p
                    .reviewer_user_id
                    .or_else(|| ctx.user_id.clone())
                    .unwrap_or_default();
                data(&self.queue.respond(&id, &decision, p.reviewer_notes, p.overrides, &reviewer)?)
            }
            Action::MaterializeLearning => {
                let p: IdParams = params(raw)?;
                let id = required(p.id, "MISSING_ID", "id")?;
                data(&self.queue.materialize(&id)?)
            }
            Action::ListActiveLearnings => {
                let p: ScopeParams = params(raw)?;
                paged(self.queue.active_learnings(p.scope_level, p.paging.request()?))
            }
            Action::LearningStats => data(&self.queue.stats()),
            Action::FetchPrices => {
                let p: DateUniverseParams = params(raw)?;
                data(&self.orchestrator.fetch_prices(p.universe_id.as_deref()).await?)
            }
            Action::CreateBaselines => {
                let p: DateUniverseParams = params(raw)?;
                let date = parse_date(p.date.as_deref())?;
                match self.orchestrator.create_baselines(date, p.universe_id.as_deref()).await? {
                    BaselineOutcome::Idle(run) => data(&run),
                    BaselineOutcome::Busy => Err(CoreError::RunnerBusy),
                }
            }
            Action::ResolveOutcomes => data(&self.orchestrator.resolve_outcomes().await?),
            Action::RunAll => {
                let p: DateUniverseParams = params(raw)?;
                let date = parse_date(p.date.as_deref())?;
                let universe = p
                    .universe_id
                    .or_else(|| self.config.orchestration.universe_id.clone());
                data(&self.orchestrator.run_all(date, universe.as_deref()).await)
            }
            Action::GetRunnerStatus => data(&self.orchestrator.runner_status().await?),
            Action::ListStrategies => {
                let p: StrategyParams = params(raw)?;
                let page = p.paging.request()?;
                let res = if p.system_only {
                    self.strategies.find_system_strategies().await
                } else {
                    self.strategies.find_all().await
                };
                let all = res.map_err(strategy_failed)?;
                paged(ListQuery::new(page).filter_eq_opt("risk_level", p.risk_level).apply(&all))
            }
            Action::GetStrategy => {
                let p: StrategyParams = params(raw)?;
                let strategy = if let Some(id) = p.id.filter(|s| !s.trim().is_empty()) {
                    self.strategies
                        .find_by_id(&id)
                        .await
                        .map_err(strategy_failed)?
                        .ok_or_else(|| CoreError::not_found("strategy", id))?
                } else if let Some(slug) = p.slug.filter(|s| !s.trim().is_empty()) {
                    self.strategies
                        .find_by_slug(&slug)
                        .await
                        .map_err(strategy_failed)?
                        .ok_or_else(|| CoreError::not_found("strategy", slug))?
                } else {
                    return Err(CoreError::missing("MISSING_ID", "id or slug"));
                };
                data(&strategy)
            }
            Action::RecommendStrategy => {
                let p: StrategyParams = params(raw)?;
                let universe = required(p.universe_id, "MISSING_ID", "universeId")?;
                data(&self.strategies.recommend_strategy(&universe).await.map_err(strategy_failed)?)
            }
        }
    }
}

fn strategy_failed(e: anyhow::Error) -> CoreError {
    CoreError::upstream("STRATEGY_FAILED", "Strategy service failed", &e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_names_fold_case() {
        assert_eq!(Action::parse("RUNALL").unwrap(), Action::RunAll);
        assert_eq!(Action::parse(" respondlearning ").unwrap(), Action::RespondLearning);
        let err = Action::parse("dance").unwrap_err();
        assert_eq!(err.code(), "UNSUPPORTED_ACTION");
        let supported = err.details().unwrap()["supportedActions"].as_array().unwrap().len();
        assert_eq!(supported, Action::ALL.len());
    }

    #[test]
    fn envelope_skips_absent_parts() {
        let v = serde_json::to_value(Envelope::ok(serde_json::json!([1]))).unwrap();
        assert_eq!(v, serde_json::json!({"success": true, "data": [1]}));

        let v = serde_json::to_value(Envelope::failure(&CoreError::RunnerBusy)).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"]["code"], "RUNNER_BUSY");
        assert!(v.get("data").is_none());
    }

    #[test]
    fn null_params_mean_defaults() {
        let p: ListLearningsParams = params(Value::Null).unwrap();
        assert!(p.status.is_none());
        let err =
            params::<ListLearningsParams>(serde_json::json!({"status": "bogus"})).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMS");
    }
}
