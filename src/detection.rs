//! # Miss Detection Engine
//! Scans a target's recent value history for significant moves that no
//! prediction adequately covered, and records them as missed opportunities.
//!
//! Moves are found with a zigzag segmentation: a run in one direction ends
//! when the value retraces at least half of `min_move_percent` from the run's
//! extreme. Each run whose net change reaches `min_move_percent` is a
//! candidate.
//!
//! A move is recorded once. Re-detection matches a stored record of the same
//! target and direction whose window overlaps the new one, which covers a
//! move that is still running and a lookback that has slid past its start.
//! While the record is `pending` it is widened to the union of both windows
//! and keeps the larger measured move; after that it is frozen.

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::analysis::{DiscoveredDriver, SuggestedLearning};
use crate::collaborators::{PredictionSource, PriceHistory, TargetDirectory};
use crate::config::DetectionConfig;
use crate::error::{CoreError, Result};
use crate::model::{Direction, MissType, Prediction, PricePoint};
use crate::paginate::{FieldValue, Filterable, ListQuery, Page, PageRequest, Predicate};

/// Analysis progress of a missed opportunity. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Pending,
    Analyzing,
    Completed,
}

impl AnalysisStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Analyzing => "analyzing",
            AnalysisStatus::Completed => "completed",
        }
    }
}

/// A detected market move that predictions did not adequately reflect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissedOpportunity {
    pub id: String,
    pub target_id: String,
    pub detected_at: DateTime<Utc>,
    pub move_start: DateTime<Utc>,
    pub move_end: DateTime<Utc>,
    pub move_direction: Direction,
    /// Signed net change over the window, in percent.
    pub move_percent: f64,
    pub miss_type: MissType,
    pub significance_score: f64,
    pub analysis_status: AnalysisStatus,
    pub discovered_drivers: Option<Vec<DiscoveredDriver>>,
    pub source_gaps: Option<Vec<String>>,
    pub suggested_learnings: Option<Vec<SuggestedLearning>>,
    pub analyzed_at: Option<DateTime<Utc>>,
}

impl Filterable for MissedOpportunity {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "target_id" => Some(self.target_id.as_str().into()),
            "analysis_status" => Some(self.analysis_status.as_str().into()),
            "move_direction" => Some(self.move_direction.as_str().into()),
            "significance_score" => Some(self.significance_score.into()),
            _ => None,
        }
    }
}

/// One contiguous directional run in the value history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceMove {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub direction: Direction,
    pub change_pct: f64,
}

impl PriceMove {
    pub fn duration_days(&self) -> f64 {
        (self.end - self.start).num_seconds().max(0) as f64 / 86_400.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    Full,
    Partial,
    Uncovered,
}

/// Per-call overrides for detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectOptions {
    #[serde(default)]
    pub min_move_percent: Option<f64>,
    #[serde(default)]
    pub lookback_days: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MissedOpportunityFilters {
    pub target_id: Option<String>,
    pub status: Option<AnalysisStatus>,
    pub min_significance: Option<f64>,
}

fn pct_change(from: f64, to: f64) -> f64 {
    (to - from) / from * 100.0
}

/// Zigzag segmentation of `points` (sorted by time) into significant runs.
pub fn find_moves(points: &[PricePoint], min_move_pct: f64) -> Vec<PriceMove> {
    let pts: Vec<PricePoint> = points.iter().copied().filter(|p| p.value > 0.0).collect();
    let mut out = Vec::new();
    if pts.len() < 2 {
        return out;
    }
    let reversal = min_move_pct / 2.0;

    let close = |a: usize, b: usize, out: &mut Vec<PriceMove>| {
        let change = pct_change(pts[a].value, pts[b].value);
        if change.abs() >= min_move_pct {
            out.push(PriceMove {
                start: pts[a].at,
                end: pts[b].at,
                direction: if change > 0.0 { Direction::Up } else { Direction::Down },
                change_pct: change,
            });
        }
    };

    let mut pivot = 0usize;
    let mut extreme = 0usize;
    let mut dir = Direction::Flat;

    for i in 1..pts.len() {
        let v = pts[i].value;
        match dir {
            Direction::Flat => {
                let ch = pct_change(pts[pivot].value, v);
                if ch.abs() >= reversal {
                    dir = if ch > 0.0 { Direction::Up } else { Direction::Down };
                    extreme = i;
                }
            }
            Direction::Up => {
                if v >= pts[extreme].value {
                    extreme = i;
                } else if pct_change(pts[extreme].value, v) <= -reversal {
                    close(pivot, extreme, &mut out);
                    pivot = extreme;
                    extreme = i;
                    dir = Direction::Down;
                }
            }
            Direction::Down => {
                if v <= pts[extreme].value {
                    extreme = i;
                } else if pct_change(pts[extreme].value, v) >= reversal {
                    close(pivot, extreme, &mut out);
                    pivot = extreme;
                    extreme = i;
                    dir = Direction::Up;
                }
            }
        }
    }
    if dir != Direction::Flat {
        close(pivot, extreme, &mut out);
    }
    out
}

/// How well overlapping predictions anticipated `mv`.
pub fn assess_coverage(
    predictions: &[Prediction],
    mv: &PriceMove,
    coverage_ratio: f64,
) -> Coverage {
    let needed = mv.change_pct.abs() * coverage_ratio;
    let mut partial = false;
    for p in predictions.iter().filter(|p| p.overlaps(mv.start, mv.end)) {
        if p.direction == mv.direction {
            if p.magnitude >= needed {
                return Coverage::Full;
            }
            partial = true;
        }
    }
    if partial {
        Coverage::Partial
    } else {
        Coverage::Uncovered
    }
}

/// Significance in [0, 1]; grows with move size, suddenness and lack of coverage.
pub fn significance_score(
    mv: &PriceMove,
    coverage: Coverage,
    cfg: &DetectionConfig,
    lookback_days: u32,
    min_move_pct: f64,
) -> f64 {
    let size_abs = mv.change_pct.abs();
    let size = size_abs / (size_abs + min_move_pct);
    let sudden = 1.0 - (mv.duration_days() / lookback_days.max(1) as f64).clamp(0.0, 1.0);
    let cover = match coverage {
        Coverage::Uncovered => 1.0,
        Coverage::Partial => cfg.partial_coverage_factor,
        Coverage::Full => 0.0,
    };
    let raw = (size * (0.85 + 0.15 * sudden) * cover).clamp(0.0, 1.0);
    (raw * 10_000.0).round() / 10_000.0
}

/// Stable id for a move window.
pub fn window_id(target_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(target_id.as_bytes());
    hasher.update(b"|");
    hasher.update(start.to_rfc3339().as_bytes());
    hasher.update(b"|");
    hasher.update(end.to_rfc3339().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(3 + 32);
    out.push_str("mo_");
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Append-only store; records are never deleted.
#[derive(Debug, Default)]
pub struct MissedOpportunityStore {
    inner: Mutex<Vec<MissedOpportunity>>,
}

impl MissedOpportunityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless a record with the same id exists. Returns the stored
    /// record and whether it was newly inserted.
    pub fn insert_if_absent(&self, mo: MissedOpportunity) -> (MissedOpportunity, bool) {
        let mut g = self.inner.lock().expect("missed opportunity mutex poisoned");
        if let Some(existing) = g.iter().find(|m| m.id == mo.id) {
            return (existing.clone(), false);
        }
        g.push(mo.clone());
        (mo, true)
    }

    /// Record a detected move, merging it into an overlapping record of the
    /// same target and direction when one exists. Returns the stored record
    /// and whether it was newly inserted.
    pub fn record_move(&self, mo: MissedOpportunity) -> (MissedOpportunity, bool) {
        let mut g = self.inner.lock().expect("missed opportunity mutex poisoned");
        let pos = g.iter().position(|m| {
            m.target_id == mo.target_id
                && m.move_direction == mo.move_direction
                && m.move_start < mo.move_end
                && mo.move_start < m.move_end
        });
        let Some(pos) = pos else {
            g.push(mo.clone());
            return (mo, true);
        };
        let existing = &mut g[pos];
        if existing.analysis_status == AnalysisStatus::Pending {
            existing.move_start = existing.move_start.min(mo.move_start);
            existing.move_end = existing.move_end.max(mo.move_end);
            if mo.move_percent.abs() > existing.move_percent.abs() {
                existing.move_percent = mo.move_percent;
                existing.miss_type = mo.miss_type;
                existing.significance_score = mo.significance_score;
            }
        }
        (existing.clone(), false)
    }

    pub fn get(&self, id: &str) -> Result<MissedOpportunity> {
        let g = self.inner.lock().expect("missed opportunity mutex poisoned");
        g.iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("missed opportunity", id))
    }

    /// Listing is always ordered by significance, highest first.
    pub fn list(
        &self,
        filters: &MissedOpportunityFilters,
        page: PageRequest,
    ) -> Page<MissedOpportunity> {
        let snapshot = self
            .inner
            .lock()
            .expect("missed opportunity mutex poisoned")
            .clone();
        let mut q = ListQuery::new(page)
            .filter_eq_opt("target_id", filters.target_id.clone())
            .filter_eq_opt("analysis_status", filters.status.map(|s| s.as_str()))
            .sort_desc_by("significance_score");
        if let Some(min) = filters.min_significance {
            q = q.filter(Predicate::Gte("significance_score", min));
        }
        q.apply(&snapshot)
    }

    /// `pending -> analyzing`, atomically. Anything else is a conflict.
    pub fn begin_analysis(&self, id: &str) -> Result<MissedOpportunity> {
        let mut g = self.inner.lock().expect("missed opportunity mutex poisoned");
        let mo = g
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| CoreError::not_found("missed opportunity", id))?;
        if mo.analysis_status != AnalysisStatus::Pending {
            return Err(CoreError::AlreadyAnalyzed(id.to_string()));
        }
        mo.analysis_status = AnalysisStatus::Analyzing;
        Ok(mo.clone())
    }

    /// `analyzing -> completed`, writing the analysis output exactly once.
    pub fn complete_analysis(
        &self,
        id: &str,
        drivers: Vec<DiscoveredDriver>,
        source_gaps: Vec<String>,
        learnings: Vec<SuggestedLearning>,
    ) -> Result<MissedOpportunity> {
        let mut g = self.inner.lock().expect("missed opportunity mutex poisoned");
        let mo = g
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| CoreError::not_found("missed opportunity", id))?;
        if mo.analysis_status != AnalysisStatus::Analyzing || mo.suggested_learnings.is_some() {
            return Err(CoreError::AlreadyAnalyzed(id.to_string()));
        }
        mo.discovered_drivers = Some(drivers);
        mo.source_gaps = Some(source_gaps);
        mo.suggested_learnings = Some(learnings);
        mo.analysis_status = AnalysisStatus::Completed;
        mo.analyzed_at = Some(Utc::now());
        Ok(mo.clone())
    }
}

pub struct DetectionEngine {
    targets: Arc<dyn TargetDirectory>,
    prices: Arc<dyn PriceHistory>,
    predictions: Arc<dyn PredictionSource>,
    store: Arc<MissedOpportunityStore>,
    cfg: DetectionConfig,
}

impl DetectionEngine {
    pub fn new(
        targets: Arc<dyn TargetDirectory>,
        prices: Arc<dyn PriceHistory>,
        predictions: Arc<dyn PredictionSource>,
        store: Arc<MissedOpportunityStore>,
        cfg: DetectionConfig,
    ) -> Self {
        Self {
            targets,
            prices,
            predictions,
            store,
            cfg,
        }
    }

    pub fn store(&self) -> &Arc<MissedOpportunityStore> {
        &self.store
    }

    /// Detect uncovered significant moves for one target. Output order is
    /// not meaningful; use [`MissedOpportunityStore::list`] for ranking.
    pub async fn detect(
        &self,
        target_id: &str,
        opts: DetectOptions,
    ) -> Result<Vec<MissedOpportunity>> {
        let min_move = opts.min_move_percent.unwrap_or(self.cfg.min_move_percent);
        if !(min_move > 0.0) {
            return Err(CoreError::validation("INVALID_PARAMS", "minMovePercent must be > 0"));
        }
        let lookback = opts.lookback_days.unwrap_or(self.cfg.lookback_days);
        if lookback == 0 {
            return Err(CoreError::validation("INVALID_PARAMS", "lookbackDays must be >= 1"));
        }

        let upstream = |e: anyhow::Error| {
            CoreError::upstream("DETECTION_FAILED", "Failed to detect missed opportunities", &e)
        };

        self.targets
            .find_by_id(target_id)
            .await
            .map_err(upstream)?
            .ok_or_else(|| CoreError::not_found("target", target_id))?;

        let now = Utc::now();
        let since = now - Duration::days(i64::from(lookback));
        let mut points = self
            .prices
            .history(target_id, since)
            .await
            .map_err(upstream)?;
        points.sort_by_key(|p| p.at);

        let moves = find_moves(&points, min_move);
        debug!(target: "detection", target_id, candidates = moves.len(), "moves found");

        let mut out = Vec::with_capacity(moves.len());
        let mut fresh = 0u64;
        for mv in moves {
            let preds = self
                .predictions
                .for_target_between(target_id, mv.start, mv.end)
                .await
                .map_err(upstream)?;
            let coverage = assess_coverage(&preds, &mv, self.cfg.coverage_ratio);
            if coverage == Coverage::Full {
                continue;
            }
            let record = MissedOpportunity {
                id: window_id(target_id, mv.start, mv.end),
                target_id: target_id.to_string(),
                detected_at: now,
                move_start: mv.start,
                move_end: mv.end,
                move_direction: mv.direction,
                move_percent: (mv.change_pct * 100.0).round() / 100.0,
                miss_type: match coverage {
                    Coverage::Partial => MissType::MagnitudeWrong,
                    _ => MissType::MissedEntirely,
                },
                significance_score: significance_score(
                    &mv,
                    coverage,
                    &self.cfg,
                    lookback,
                    min_move,
                ),
                analysis_status: AnalysisStatus::Pending,
                discovered_drivers: None,
                source_gaps: None,
                suggested_learnings: None,
                analyzed_at: None,
            };
            let (stored, inserted) = self.store.record_move(record);
            if inserted {
                fresh += 1;
            }
            out.push(stored);
        }

        counter!("missed_opportunities_detected_total").increment(fresh);
        info!(
            target: "detection",
            target_id,
            detected = out.len(),
            new = fresh,
            "detection finished"
        );
        Ok(out)
    }
}
