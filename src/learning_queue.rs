//! # Learning Queue
//! Human-approval state machine for AI-suggested behavioral changes.
//!
//! `pending -> {approved, rejected, modified}`; the first review is final.
//! `final_*` overrides survive only on `modified`. Approved or modified items
//! can later be materialized into an active [`Learning`] at their scope.
//!
//! All mutations happen under one mutex, so concurrent reviews of the same
//! item serialize and the loser sees `ALREADY_REVIEWED`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{CoreError, Result};
use crate::paginate::{FieldValue, Filterable, ListQuery, Page, PageRequest, Predicate};

/// Breadth at which a learning applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeLevel {
    Runner,
    Domain,
    Universe,
    Target,
    Analyst,
}

impl ScopeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ScopeLevel::Runner => "runner",
            ScopeLevel::Domain => "domain",
            ScopeLevel::Universe => "universe",
            ScopeLevel::Target => "target",
            ScopeLevel::Analyst => "analyst",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningType {
    Pattern,
    Threshold,
    Rule,
    Weight,
    Avoid,
}

impl LearningType {
    pub fn as_str(self) -> &'static str {
        match self {
            LearningType::Pattern => "pattern",
            LearningType::Threshold => "threshold",
            LearningType::Rule => "rule",
            LearningType::Weight => "weight",
            LearningType::Avoid => "avoid",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Modified,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::Modified => "modified",
        }
    }
}

/// A reviewer's verdict. Parsed from caller input; anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Rejected,
    Modified,
}

impl Decision {
    pub const ALLOWED: [&'static str; 3] = ["approved", "rejected", "modified"];

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "approved" => Ok(Decision::Approved),
            "rejected" => Ok(Decision::Rejected),
            "modified" => Ok(Decision::Modified),
            other => Err(CoreError::InvalidDecision {
                value: other.to_string(),
                allowed: Decision::ALLOWED.to_vec(),
            }),
        }
    }

    pub fn status(self) -> ReviewStatus {
        match self {
            Decision::Approved => ReviewStatus::Approved,
            Decision::Rejected => ReviewStatus::Rejected,
            Decision::Modified => ReviewStatus::Modified,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeQualifiers {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub universe_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyst_id: Option<String>,
}

impl ScopeQualifiers {
    /// The qualifier a scope level requires (`None` for runner-wide).
    pub fn required_for(&self, level: ScopeLevel) -> Option<Option<&str>> {
        match level {
            ScopeLevel::Runner => None,
            ScopeLevel::Domain => Some(self.domain.as_deref()),
            ScopeLevel::Universe => Some(self.universe_id.as_deref()),
            ScopeLevel::Target => Some(self.target_id.as_deref()),
            ScopeLevel::Analyst => Some(self.analyst_id.as_deref()),
        }
    }

    pub fn is_consistent_with(&self, level: ScopeLevel) -> bool {
        match self.required_for(level) {
            None => true,
            Some(v) => v.is_some_and(|s| !s.trim().is_empty()),
        }
    }

    /// Only the qualifier that the level uses.
    pub fn narrowed_to(&self, level: ScopeLevel) -> ScopeQualifiers {
        let mut out = ScopeQualifiers::default();
        match level {
            ScopeLevel::Runner => {}
            ScopeLevel::Domain => out.domain = self.domain.clone(),
            ScopeLevel::Universe => out.universe_id = self.universe_id.clone(),
            ScopeLevel::Target => out.target_id = self.target_id.clone(),
            ScopeLevel::Analyst => out.analyst_id = self.analyst_id.clone(),
        }
        out
    }
}

/// Submission payload for a new pending item.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueItem {
    pub suggested_scope_level: ScopeLevel,
    pub qualifiers: ScopeQualifiers,
    pub suggested_learning_type: LearningType,
    pub suggested_title: String,
    pub suggested_description: String,
    pub suggested_config: Value,
    pub source_evaluation_id: Option<String>,
    pub source_missed_opportunity_id: Option<String>,
    pub ai_reasoning: String,
    pub ai_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningQueueItem {
    pub id: String,
    pub suggested_scope_level: ScopeLevel,
    #[serde(flatten)]
    pub qualifiers: ScopeQualifiers,
    pub suggested_learning_type: LearningType,
    pub suggested_title: String,
    pub suggested_description: String,
    pub suggested_config: Value,
    pub source_evaluation_id: Option<String>,
    pub source_missed_opportunity_id: Option<String>,
    pub ai_reasoning: String,
    pub ai_confidence: f64,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    pub reviewed_by_user_id: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewer_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_scope_level: Option<ScopeLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_learning_type: Option<LearningType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_config: Option<Value>,
    pub materialized_learning_id: Option<String>,
}

impl Filterable for LearningQueueItem {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "status" => Some(self.status.as_str().into()),
            "suggested_scope_level" => Some(self.suggested_scope_level.as_str().into()),
            "suggested_learning_type" => Some(self.suggested_learning_type.as_str().into()),
            "source_missed_opportunity_id" => self
                .source_missed_opportunity_id
                .as_deref()
                .map(FieldValue::from),
            "ai_confidence" => Some(self.ai_confidence.into()),
            _ => None,
        }
    }
}

/// Reviewer-supplied replacements, honoured only for `modified`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalOverrides {
    #[serde(default)]
    pub final_title: Option<String>,
    #[serde(default)]
    pub final_description: Option<String>,
    #[serde(default)]
    pub final_scope_level: Option<ScopeLevel>,
    #[serde(default)]
    pub final_learning_type: Option<LearningType>,
    #[serde(default)]
    pub final_config: Option<Value>,
}

/// The exact change written to an item by a review.
///
/// Serialized form is the persisted update: `final_*` keys appear only for a
/// `modified` decision and only when the reviewer supplied them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewUpdate {
    pub status: ReviewStatus,
    pub reviewer_notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_scope_level: Option<ScopeLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_learning_type: Option<LearningType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_config: Option<Value>,
    pub reviewed_by_user_id: String,
    pub reviewed_at: DateTime<Utc>,
}

impl ReviewUpdate {
    pub fn build(
        decision: Decision,
        reviewer_notes: Option<String>,
        overrides: FinalOverrides,
        reviewer_user_id: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let mut update = ReviewUpdate {
            status: decision.status(),
            reviewer_notes,
            final_title: None,
            final_description: None,
            final_scope_level: None,
            final_learning_type: None,
            final_config: None,
            reviewed_by_user_id: reviewer_user_id.to_string(),
            reviewed_at: now,
        };
        if decision == Decision::Modified {
            update.final_title = overrides.final_title;
            update.final_description = overrides.final_description;
            update.final_scope_level = overrides.final_scope_level;
            update.final_learning_type = overrides.final_learning_type;
            update.final_config = overrides.final_config;
        }
        update
    }

    fn apply_to(self, item: &mut LearningQueueItem) {
        item.status = self.status;
        item.reviewer_notes = self.reviewer_notes;
        item.final_title = self.final_title;
        item.final_description = self.final_description;
        item.final_scope_level = self.final_scope_level;
        item.final_learning_type = self.final_learning_type;
        item.final_config = self.final_config;
        item.reviewed_by_user_id = Some(self.reviewed_by_user_id);
        item.reviewed_at = Some(self.reviewed_at);
    }
}

/// An active behavioral change, materialized from a reviewed item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Learning {
    pub id: String,
    pub scope_level: ScopeLevel,
    #[serde(flatten)]
    pub qualifiers: ScopeQualifiers,
    pub learning_type: LearningType,
    pub title: String,
    pub description: String,
    pub config: Value,
    pub source_queue_item_id: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Filterable for Learning {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "scope_level" => Some(self.scope_level.as_str().into()),
            "learning_type" => Some(self.learning_type.as_str().into()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueFilters {
    pub suggested_scope_level: Option<ScopeLevel>,
    pub suggested_learning_type: Option<LearningType>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub modified: usize,
    pub materialized: usize,
}

#[derive(Debug, Default)]
pub struct LearningQueue {
    items: Mutex<Vec<LearningQueueItem>>,
    learnings: Mutex<Vec<Learning>>,
    seq: AtomicU64,
}

impl LearningQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit(&self, req: NewQueueItem) -> Result<LearningQueueItem> {
        if req.suggested_title.trim().is_empty() {
            return Err(CoreError::missing("MISSING_TITLE", "suggestedTitle"));
        }
        if !req.qualifiers.is_consistent_with(req.suggested_scope_level) {
            return Err(CoreError::validation(
                "INVALID_SCOPE",
                format!(
                    "scope level '{}' requires its qualifier",
                    req.suggested_scope_level.as_str()
                ),
            ));
        }

        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let item = LearningQueueItem {
            id: format!("lq_{n:06}"),
            suggested_scope_level: req.suggested_scope_level,
            qualifiers: req.qualifiers,
            suggested_learning_type: req.suggested_learning_type,
            suggested_title: req.suggested_title,
            suggested_description: req.suggested_description,
            suggested_config: req.suggested_config,
            source_evaluation_id: req.source_evaluation_id,
            source_missed_opportunity_id: req.source_missed_opportunity_id,
            ai_reasoning: req.ai_reasoning,
            ai_confidence: req.ai_confidence.clamp(0.0, 1.0),
            status: ReviewStatus::Pending,
            created_at: Utc::now(),
            reviewed_by_user_id: None,
            reviewed_at: None,
            reviewer_notes: None,
            final_title: None,
            final_description: None,
            final_scope_level: None,
            final_learning_type: None,
            final_config: None,
            materialized_learning_id: None,
        };

        self.items
            .lock()
            .expect("learning queue mutex poisoned")
            .push(item.clone());
        counter!("learning_queue_submitted_total").increment(1);
        info!(
            target: "learning_queue",
            id = %item.id,
            scope = item.suggested_scope_level.as_str(),
            kind = item.suggested_learning_type.as_str(),
            "queued learning for review"
        );
        Ok(item)
    }

    /// Read-only listing over one consistent snapshot of the queue.
    pub fn list(
        &self,
        status: ReviewStatus,
        filters: &QueueFilters,
        page: PageRequest,
    ) -> Page<LearningQueueItem> {
        let snapshot = self
            .items
            .lock()
            .expect("learning queue mutex poisoned")
            .clone();
        ListQuery::new(page)
            .filter(Predicate::Eq("status", status.as_str().into()))
            .filter_eq_opt(
                "suggested_scope_level",
                filters.suggested_scope_level.map(|s| s.as_str()),
            )
            .filter_eq_opt(
                "suggested_learning_type",
                filters.suggested_learning_type.map(|t| t.as_str()),
            )
            .apply(&snapshot)
    }

    pub fn get(&self, id: &str) -> Result<LearningQueueItem> {
        let g = self.items.lock().expect("learning queue mutex poisoned");
        g.iter()
            .find(|it| it.id == id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("learning queue item", id))
    }

    /// Apply a single-shot human review.
    pub fn respond(
        &self,
        id: &str,
        decision: &str,
        reviewer_notes: Option<String>,
        overrides: FinalOverrides,
        reviewer_user_id: &str,
    ) -> Result<LearningQueueItem> {
        let decision = Decision::parse(decision)?;
        if reviewer_user_id.trim().is_empty() {
            return Err(CoreError::missing("MISSING_REVIEWER", "reviewerUserId"));
        }
        let update =
            ReviewUpdate::build(decision, reviewer_notes, overrides, reviewer_user_id, Utc::now());

        let mut g = self.items.lock().expect("learning queue mutex poisoned");
        let item = g
            .iter_mut()
            .find(|it| it.id == id)
            .ok_or_else(|| CoreError::not_found("learning queue item", id))?;
        if item.status != ReviewStatus::Pending {
            return Err(CoreError::AlreadyReviewed(id.to_string()));
        }
        // the final scope must be satisfiable by the item's qualifiers
        if let Some(level) = update.final_scope_level {
            if !item.qualifiers.is_consistent_with(level) {
                return Err(CoreError::validation(
                    "INVALID_SCOPE",
                    format!("final scope level '{}' requires its qualifier", level.as_str()),
                ));
            }
        }
        update.apply_to(item);

        counter!("learning_queue_reviewed_total", "decision" => item.status.as_str())
            .increment(1);
        info!(
            target: "learning_queue",
            id = %item.id,
            decision = item.status.as_str(),
            reviewer = %reviewer_user_id,
            "learning reviewed"
        );
        Ok(item.clone())
    }

    /// Turn an approved/modified item into an active learning, once.
    pub fn materialize(&self, id: &str) -> Result<Learning> {
        let mut g = self.items.lock().expect("learning queue mutex poisoned");
        let item = g
            .iter_mut()
            .find(|it| it.id == id)
            .ok_or_else(|| CoreError::not_found("learning queue item", id))?;

        let not_ok = |reason: &str| CoreError::NotMaterializable {
            id: id.to_string(),
            reason: reason.to_string(),
        };
        match item.status {
            ReviewStatus::Approved | ReviewStatus::Modified => {}
            ReviewStatus::Pending => return Err(not_ok("item has not been reviewed")),
            ReviewStatus::Rejected => return Err(not_ok("item was rejected")),
        }
        if item.materialized_learning_id.is_some() {
            return Err(not_ok("item was already materialized"));
        }

        let scope_level = item.final_scope_level.unwrap_or(item.suggested_scope_level);
        if !item.qualifiers.is_consistent_with(scope_level) {
            return Err(not_ok("final scope level has no matching qualifier"));
        }

        let mut learnings = self.learnings.lock().expect("learnings mutex poisoned");
        let learning = Learning {
            id: format!("ln_{:06}", learnings.len() + 1),
            scope_level,
            qualifiers: item.qualifiers.narrowed_to(scope_level),
            learning_type: item
                .final_learning_type
                .unwrap_or(item.suggested_learning_type),
            title: item
                .final_title
                .clone()
                .unwrap_or_else(|| item.suggested_title.clone()),
            description: item
                .final_description
                .clone()
                .unwrap_or_else(|| item.suggested_description.clone()),
            config: item
                .final_config
                .clone()
                .unwrap_or_else(|| item.suggested_config.clone()),
            source_queue_item_id: item.id.clone(),
            is_active: true,
            created_at: Utc::now(),
        };
        item.materialized_learning_id = Some(learning.id.clone());
        learnings.push(learning.clone());

        counter!("learnings_materialized_total").increment(1);
        info!(
            target: "learning_queue",
            item = %item.id,
            learning = %learning.id,
            scope = scope_level.as_str(),
            "learning materialized"
        );
        Ok(learning)
    }

    pub fn active_learnings(&self, scope: Option<ScopeLevel>, page: PageRequest) -> Page<Learning> {
        let active: Vec<Learning> = self
            .learnings
            .lock()
            .expect("learnings mutex poisoned")
            .iter()
            .filter(|l| l.is_active)
            .cloned()
            .collect();
        ListQuery::new(page)
            .filter_eq_opt("scope_level", scope.map(|s| s.as_str()))
            .apply(&active)
    }

    pub fn stats(&self) -> QueueStats {
        let g = self.items.lock().expect("learning queue mutex poisoned");
        let mut s = QueueStats::default();
        for it in g.iter() {
            match it.status {
                ReviewStatus::Pending => s.pending += 1,
                ReviewStatus::Approved => s.approved += 1,
                ReviewStatus::Rejected => s.rejected += 1,
                ReviewStatus::Modified => s.modified += 1,
            }
            if it.materialized_learning_id.is_some() {
                s.materialized += 1;
            }
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn new_item(scope: ScopeLevel, kind: LearningType) -> NewQueueItem {
        NewQueueItem {
            suggested_scope_level: scope,
            qualifiers: ScopeQualifiers {
                domain: Some("equity".into()),
                universe_id: Some("u-1".into()),
                target_id: Some("t-1".into()),
                analyst_id: None,
            },
            suggested_learning_type: kind,
            suggested_title: "Watch earnings drift".into(),
            suggested_description: "Weight post-earnings drift higher".into(),
            suggested_config: json!({"weight": 1.2}),
            source_evaluation_id: None,
            source_missed_opportunity_id: Some("mo_1".into()),
            ai_reasoning: "three misses in a row after earnings".into(),
            ai_confidence: 0.7,
        }
    }

    #[test]
    fn approved_update_drops_final_fields() {
        let overrides = FinalOverrides {
            final_title: Some("X".into()),
            final_config: Some(json!({"a": 1})),
            ..Default::default()
        };
        let upd = ReviewUpdate::build(Decision::Approved, None, overrides, "user-1", Utc::now());
        let v = serde_json::to_value(&upd).unwrap();
        let obj = v.as_object().unwrap();
        assert_eq!(obj["status"], json!("approved"));
        assert!(!obj.contains_key("final_title"));
        assert!(!obj.contains_key("final_config"));
        assert!(obj.keys().all(|k| !k.starts_with("final_")));
    }

    #[test]
    fn modified_update_carries_exactly_supplied_finals() {
        let overrides = FinalOverrides {
            final_scope_level: Some(ScopeLevel::Domain),
            final_config: Some(json!({"threshold": 0.4})),
            ..Default::default()
        };
        let upd = ReviewUpdate::build(
            Decision::Modified,
            Some("narrow it".into()),
            overrides,
            "user-1",
            Utc::now(),
        );
        let v = serde_json::to_value(&upd).unwrap();
        let finals: Vec<&String> = v
            .as_object()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with("final_"))
            .collect();
        assert_eq!(finals.len(), 2);
        assert_eq!(v["final_scope_level"], json!("domain"));
        assert_eq!(v["final_config"], json!({"threshold": 0.4}));
        assert_eq!(v["status"], json!("modified"));
        assert_eq!(v["reviewer_notes"], json!("narrow it"));
    }

    #[test]
    fn respond_stamps_reviewer_and_is_single_shot() {
        let q = LearningQueue::new();
        let it = q.submit(new_item(ScopeLevel::Target, LearningType::Pattern)).unwrap();
        assert!(it.reviewed_at.is_none() && it.reviewed_by_user_id.is_none());

        let done = q
            .respond(&it.id, "rejected", Some("noise".into()), FinalOverrides::default(), "rev-9")
            .unwrap();
        assert_eq!(done.status, ReviewStatus::Rejected);
        assert_eq!(done.reviewed_by_user_id.as_deref(), Some("rev-9"));
        assert!(done.reviewed_at.is_some());

        let again = q
            .respond(&it.id, "approved", None, FinalOverrides::default(), "rev-9")
            .unwrap_err();
        assert_eq!(again.code(), "ALREADY_REVIEWED");
        assert_eq!(q.get(&it.id).unwrap().status, ReviewStatus::Rejected);
    }

    #[test]
    fn invalid_decision_and_missing_item() {
        let q = LearningQueue::new();
        let it = q.submit(new_item(ScopeLevel::Runner, LearningType::Rule)).unwrap();
        let e = q
            .respond(&it.id, "APPROVE", None, FinalOverrides::default(), "u")
            .unwrap_err();
        assert_eq!(e.code(), "INVALID_DECISION");
        assert_eq!(q.get(&it.id).unwrap().status, ReviewStatus::Pending);

        let e = q
            .respond("lq_missing", "approved", None, FinalOverrides::default(), "u")
            .unwrap_err();
        assert_eq!(e.code(), "NOT_FOUND");
    }

    #[test]
    fn concurrent_responses_have_one_winner() {
        let q = Arc::new(LearningQueue::new());
        let it = q.submit(new_item(ScopeLevel::Target, LearningType::Pattern)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let q = q.clone();
                let id = it.id.clone();
                std::thread::spawn(move || {
                    q.respond(&id, "approved", None, FinalOverrides::default(), &format!("u{i}"))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(wins, 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.code() == "ALREADY_REVIEWED"));
    }

    #[test]
    fn list_filters_intersect_and_default_to_pending() {
        let q = LearningQueue::new();
        q.submit(new_item(ScopeLevel::Universe, LearningType::Rule)).unwrap();
        q.submit(new_item(ScopeLevel::Universe, LearningType::Pattern)).unwrap();
        q.submit(new_item(ScopeLevel::Target, LearningType::Rule)).unwrap();
        let reviewed = q.submit(new_item(ScopeLevel::Universe, LearningType::Rule)).unwrap();
        q.respond(&reviewed.id, "approved", None, FinalOverrides::default(), "u")
            .unwrap();

        let filters = QueueFilters {
            suggested_scope_level: Some(ScopeLevel::Universe),
            suggested_learning_type: Some(LearningType::Rule),
        };
        let page = q.list(ReviewStatus::Pending, &filters, PageRequest::default());
        assert_eq!(page.meta.total_count, 1);
        assert_eq!(page.items[0].id, "lq_000001");

        let all_pending =
            q.list(ReviewStatus::Pending, &QueueFilters::default(), PageRequest::default());
        assert_eq!(all_pending.meta.total_count, 3);
    }

    #[test]
    fn submit_rejects_inconsistent_scope() {
        let q = LearningQueue::new();
        let mut req = new_item(ScopeLevel::Analyst, LearningType::Weight);
        req.qualifiers.analyst_id = None;
        assert_eq!(q.submit(req).unwrap_err().code(), "INVALID_SCOPE");
    }

    #[test]
    fn modified_scope_without_qualifier_is_refused_and_item_stays_pending() {
        let q = LearningQueue::new();
        let it = q.submit(new_item(ScopeLevel::Target, LearningType::Pattern)).unwrap();
        let overrides = FinalOverrides {
            final_scope_level: Some(ScopeLevel::Analyst),
            ..Default::default()
        };
        let e = q.respond(&it.id, "modified", None, overrides, "rev").unwrap_err();
        assert_eq!(e.code(), "INVALID_SCOPE");

        let still = q.get(&it.id).unwrap();
        assert_eq!(still.status, ReviewStatus::Pending);
        assert!(still.final_scope_level.is_none() && still.reviewed_by_user_id.is_none());

        // the reviewer can still settle it with a scope that works
        let overrides = FinalOverrides {
            final_scope_level: Some(ScopeLevel::Universe),
            ..Default::default()
        };
        q.respond(&it.id, "modified", None, overrides, "rev").unwrap();
        let l = q.materialize(&it.id).unwrap();
        assert_eq!(l.scope_level, ScopeLevel::Universe);
        assert_eq!(l.qualifiers.universe_id.as_deref(), Some("u-1"));
    }

    #[test]
    fn materialize_uses_final_overrides_and_runs_once() {
        let q = LearningQueue::new();
        let it = q.submit(new_item(ScopeLevel::Target, LearningType::Pattern)).unwrap();
        assert_eq!(q.materialize(&it.id).unwrap_err().code(), "NOT_MATERIALIZABLE");

        let overrides = FinalOverrides {
            final_title: Some("Domain-wide earnings drift".into()),
            final_scope_level: Some(ScopeLevel::Domain),
            ..Default::default()
        };
        q.respond(&it.id, "modified", None, overrides, "rev").unwrap();

        let l = q.materialize(&it.id).unwrap();
        assert_eq!(l.scope_level, ScopeLevel::Domain);
        assert_eq!(l.qualifiers.domain.as_deref(), Some("equity"));
        assert!(l.qualifiers.target_id.is_none());
        assert_eq!(l.title, "Domain-wide earnings drift");
        assert_eq!(l.learning_type, LearningType::Pattern);
        assert_eq!(q.get(&it.id).unwrap().materialized_learning_id, Some(l.id.clone()));

        assert_eq!(q.materialize(&it.id).unwrap_err().code(), "NOT_MATERIALIZABLE");
        let domain = q.active_learnings(Some(ScopeLevel::Domain), PageRequest::default());
        assert_eq!(domain.meta.total_count, 1);
        assert_eq!(domain.items[0].id, l.id);
        assert!(q
            .active_learnings(Some(ScopeLevel::Target), PageRequest::default())
            .items
            .is_empty());

        let s = q.stats();
        assert_eq!((s.modified, s.materialized, s.pending), (1, 1, 0));
    }
}
