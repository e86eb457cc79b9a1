//! # Miss Identification & Investigation
//! Finds resolved predictions that missed and explains single misses at the
//! shallowest causal layer that accounts for them.
//!
//! Miss test, given the realised change `a` and predicted magnitude `m`:
//! - actual direction is flat when `|a| < direction_band_pct`
//! - opposite non-flat directions are `direction_wrong`
//! - otherwise `magnitude_wrong` when `||a| - m| >= materiality_pct`
//! - a prediction without an outcome is never a miss
//!
//! Investigation walks an ordered list of probes (predictor, then signal)
//! and stops at the first one that finds something. When none does, the
//! level is `source`: the cause lies in data coverage, which is what
//! analysis of missed opportunities looks at.

use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::collaborators::PredictionSource;
use crate::config::InvestigationConfig;
use crate::error::{CoreError, Result};
use crate::model::{Direction, MissType, Prediction, PredictorContribution, SignalReading};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissIdentification {
    pub prediction: Prediction,
    pub miss_type: MissType,
    pub actual_direction: Direction,
    pub actual_magnitude: f64,
}

/// Outcome of the miss test for one prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Miss {
    pub miss_type: MissType,
    pub actual_direction: Direction,
    pub actual_magnitude: f64,
}

pub fn classify(pred: &Prediction, cfg: &InvestigationConfig) -> Option<Miss> {
    let actual = pred.outcome_value?;
    let actual_direction = Direction::from_change(actual, cfg.direction_band_pct);
    let actual_magnitude = actual.abs();
    let miss_type = if pred.direction.opposes(actual_direction) {
        MissType::DirectionWrong
    } else if (actual_magnitude - pred.magnitude.abs()).abs() >= cfg.materiality_pct {
        MissType::MagnitudeWrong
    } else {
        return None;
    };
    Some(Miss {
        miss_type,
        actual_direction,
        actual_magnitude,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InvestigationLevel {
    Predictor,
    Signal,
    Source,
}

/// What a probe found.
#[derive(Debug, Clone, PartialEq)]
pub enum Explanation {
    UnusedPredictors(Vec<PredictorContribution>),
    MisreadSignals(Vec<SignalReading>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Found(Explanation),
    NotFound,
}

/// One causal layer of the root-cause search.
pub trait CausalProbe: Send + Sync {
    fn level(&self) -> InvestigationLevel;
    fn probe(&self, pred: &Prediction, miss: &Miss, cfg: &InvestigationConfig) -> ProbeOutcome;
}

/// Predictors that called it right but the ensemble outweighed.
pub struct PredictorProbe;

impl CausalProbe for PredictorProbe {
    fn level(&self) -> InvestigationLevel {
        InvestigationLevel::Predictor
    }

    fn probe(&self, pred: &Prediction, miss: &Miss, cfg: &InvestigationConfig) -> ProbeOutcome {
        let right: Vec<PredictorContribution> = pred
            .predictors
            .iter()
            .filter(|p| match miss.miss_type {
                MissType::DirectionWrong => p.direction == miss.actual_direction,
                _ => {
                    !p.direction.opposes(miss.actual_direction)
                        && p
                            .magnitude
                            .is_some_and(|m| {
                                (m.abs() - miss.actual_magnitude).abs() < cfg.materiality_pct
                            })
                }
            })
            .cloned()
            .collect();
        if right.is_empty() {
            ProbeOutcome::NotFound
        } else {
            ProbeOutcome::Found(Explanation::UnusedPredictors(right))
        }
    }
}

/// Signals that pointed the right way but were read the wrong way.
pub struct SignalProbe;

impl CausalProbe for SignalProbe {
    fn level(&self) -> InvestigationLevel {
        InvestigationLevel::Signal
    }

    fn probe(&self, pred: &Prediction, miss: &Miss, _cfg: &InvestigationConfig) -> ProbeOutcome {
        let misread: Vec<SignalReading> = pred
            .signals
            .iter()
            .filter(|s| {
                s.observed_direction == miss.actual_direction
                    && s.interpreted_direction != miss.actual_direction
            })
            .cloned()
            .collect();
        if misread.is_empty() {
            ProbeOutcome::NotFound
        } else {
            ProbeOutcome::Found(Explanation::MisreadSignals(misread))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictedSnapshot {
    pub direction: Direction,
    pub magnitude: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActualSnapshot {
    pub direction: Direction,
    pub magnitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissInvestigation {
    pub prediction_id: String,
    pub target_id: String,
    pub miss_type: MissType,
    pub investigation_level: InvestigationLevel,
    pub unused_predictors: Vec<PredictorContribution>,
    pub misread_signals: Vec<SignalReading>,
    pub predicted: PredictedSnapshot,
    pub actual: ActualSnapshot,
    pub investigated_at: DateTime<Utc>,
}

pub struct InvestigationEngine {
    predictions: Arc<dyn PredictionSource>,
    cfg: InvestigationConfig,
    probes: Vec<Box<dyn CausalProbe>>,
}

impl InvestigationEngine {
    pub fn new(predictions: Arc<dyn PredictionSource>, cfg: InvestigationConfig) -> Self {
        Self {
            predictions,
            cfg,
            probes: vec![Box::new(PredictorProbe), Box::new(SignalProbe)],
        }
    }

    pub fn config(&self) -> &InvestigationConfig {
        &self.cfg
    }

    /// Misses among predictions resolved on `date`. Correct calls are dropped.
    pub async fn identify_misses(
        &self,
        date: NaiveDate,
        universe_id: Option<&str>,
    ) -> Result<Vec<MissIdentification>> {
        let resolved = self
            .predictions
            .resolved_on(date, universe_id)
            .await
            .map_err(|e| {
                CoreError::upstream("INVESTIGATION_FAILED", "Failed to identify misses", &e)
            })?;
        let total = resolved.len();
        let misses: Vec<MissIdentification> = resolved
            .into_iter()
            .filter_map(|p| {
                classify(&p, &self.cfg).map(|m| MissIdentification {
                    prediction: p,
                    miss_type: m.miss_type,
                    actual_direction: m.actual_direction,
                    actual_magnitude: m.actual_magnitude,
                })
            })
            .collect();
        info!(
            target: "investigation",
            %date,
            universe = universe_id.unwrap_or("*"),
            resolved = total,
            misses = misses.len(),
            "misses identified"
        );
        Ok(misses)
    }

    /// `Ok(None)` when the prediction turns out not to be a miss.
    pub async fn investigate_miss_by_id(
        &self,
        prediction_id: &str,
    ) -> Result<Option<MissInvestigation>> {
        let pred = self
            .predictions
            .find_by_id(prediction_id)
            .await
            .map_err(|e| {
                CoreError::upstream("INVESTIGATION_FAILED", "Failed to investigate miss", &e)
            })?
            .ok_or_else(|| CoreError::not_found("prediction", prediction_id))?;
        Ok(self.investigate(&pred))
    }

    pub fn investigate(&self, pred: &Prediction) -> Option<MissInvestigation> {
        let Some(miss) = classify(pred, &self.cfg) else {
            debug!(target: "investigation", prediction = %pred.id, "not a miss");
            return None;
        };

        let mut level = InvestigationLevel::Source;
        let mut unused_predictors = Vec::new();
        let mut misread_signals = Vec::new();
        for probe in &self.probes {
            if let ProbeOutcome::Found(exp) = probe.probe(pred, &miss, &self.cfg) {
                level = probe.level();
                match exp {
                    Explanation::UnusedPredictors(v) => unused_predictors = v,
                    Explanation::MisreadSignals(v) => misread_signals = v,
                }
                break;
            }
        }

        counter!("miss_investigations_total", "level" => level_label(level)).increment(1);
        info!(
            target: "investigation",
            prediction = %pred.id,
            miss = miss.miss_type.as_str(),
            level = level_label(level),
            "miss investigated"
        );

        Some(MissInvestigation {
            prediction_id: pred.id.clone(),
            target_id: pred.target_id.clone(),
            miss_type: miss.miss_type,
            investigation_level: level,
            unused_predictors,
            misread_signals,
            predicted: PredictedSnapshot {
                direction: pred.direction,
                magnitude: pred.magnitude,
                confidence: pred.confidence,
            },
            actual: ActualSnapshot {
                direction: miss.actual_direction,
                magnitude: miss.actual_magnitude,
            },
            investigated_at: Utc::now(),
        })
    }
}

fn level_label(l: InvestigationLevel) -> &'static str {
    match l {
        InvestigationLevel::Predictor => "predictor",
        InvestigationLevel::Signal => "signal",
        InvestigationLevel::Source => "source",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::memory::InMemoryPredictions;
    use crate::model::PredictionStatus;
    use chrono::TimeZone;

    fn pred(id: &str, direction: Direction, magnitude: f64, outcome: Option<f64>) -> Prediction {
        let at = Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap();
        Prediction {
            id: id.into(),
            target_id: "t-aapl".into(),
            universe_id: Some("u-tech".into()),
            direction,
            magnitude,
            confidence: 0.4,
            timeframe: "1d".into(),
            predicted_at: at - chrono::Duration::days(1),
            expires_at: at,
            status: PredictionStatus::Resolved,
            outcome_value: outcome,
            resolved_at: Some(at),
            resolution_notes: None,
            predictors: vec![],
            models: vec![],
            signals: vec![],
        }
    }

    fn predictor(
        id: &str,
        direction: Direction,
        magnitude: Option<f64>,
        weight: f64,
    ) -> PredictorContribution {
        PredictorContribution {
            predictor_id: id.into(),
            name: id.into(),
            direction,
            magnitude,
            confidence: 0.6,
            weight,
        }
    }

    fn signal(name: &str, observed: Direction, interpreted: Direction) -> SignalReading {
        SignalReading {
            name: name.into(),
            observed_direction: observed,
            interpreted_direction: interpreted,
            strength: 0.5,
        }
    }

    fn engine(preds: Vec<Prediction>) -> InvestigationEngine {
        InvestigationEngine::new(
            Arc::new(InMemoryPredictions::new(preds)),
            InvestigationConfig::default(),
        )
    }

    #[test]
    fn miss_boundaries() {
        let cfg = InvestigationConfig::default();
        let c = |d, m, o| classify(&pred("p", d, m, o), &cfg).map(|x| x.miss_type);
        assert_eq!(c(Direction::Up, 2.0, Some(-3.0)), Some(MissType::DirectionWrong));
        // low-size opposite move is still a sign mismatch
        assert_eq!(c(Direction::Up, 0.6, Some(-0.6)), Some(MissType::DirectionWrong));
        // inside the flat band: never a sign mismatch
        assert_eq!(c(Direction::Up, 1.0, Some(-0.4)), None);
        assert_eq!(c(Direction::Up, 1.0, Some(4.0)), Some(MissType::MagnitudeWrong));
        assert_eq!(c(Direction::Up, 2.0, Some(3.5)), None);
        assert_eq!(c(Direction::Up, 2.0, None), None);
    }

    #[tokio::test]
    async fn correct_direction_is_not_a_miss() {
        let eng = engine(vec![pred("p1", Direction::Up, 2.0, Some(2.5))]);
        assert!(eng.investigate_miss_by_id("p1").await.unwrap().is_none());
        assert_eq!(
            eng.investigate_miss_by_id("nope").await.unwrap_err().code(),
            "NOT_FOUND"
        );
    }

    #[tokio::test]
    async fn predictor_level_wins_over_signal_level() {
        let mut p = pred("p1", Direction::Up, 2.0, Some(-3.0));
        p.predictors = vec![
            predictor("momentum", Direction::Up, Some(2.0), 0.7),
            predictor("mean_rev", Direction::Down, Some(3.0), 0.3),
        ];
        p.signals = vec![signal("rsi", Direction::Down, Direction::Up)];
        let inv = engine(vec![p]).investigate_miss_by_id("p1").await.unwrap().unwrap();
        assert_eq!(inv.investigation_level, InvestigationLevel::Predictor);
        assert_eq!(inv.unused_predictors.len(), 1);
        assert_eq!(inv.unused_predictors[0].predictor_id, "mean_rev");
        assert!(inv.misread_signals.is_empty());
    }

    #[tokio::test]
    async fn falls_through_to_signal_then_source() {
        let mut p = pred("p1", Direction::Down, 1.0, Some(5.0));
        p.predictors = vec![predictor("momentum", Direction::Down, None, 1.0)];
        p.signals = vec![
            signal("volume", Direction::Up, Direction::Down),
            signal("macd", Direction::Down, Direction::Down),
        ];
        let eng = engine(vec![p.clone()]);
        let inv = eng.investigate(&p).unwrap();
        assert_eq!(inv.investigation_level, InvestigationLevel::Signal);
        assert_eq!(inv.misread_signals.len(), 1);
        assert_eq!(inv.misread_signals[0].name, "volume");

        p.signals.clear();
        let inv = eng.investigate(&p).unwrap();
        assert_eq!(inv.investigation_level, InvestigationLevel::Source);
        assert!(inv.unused_predictors.is_empty() && inv.misread_signals.is_empty());
    }

    #[tokio::test]
    async fn identify_filters_to_misses() {
        let eng = engine(vec![
            pred("hit", Direction::Up, 2.0, Some(2.2)),
            pred("wrong_way", Direction::Down, 2.0, Some(3.0)),
            pred("too_small", Direction::Up, 1.0, Some(6.0)),
        ]);
        let day = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let misses = eng.identify_misses(day, Some("u-tech")).await.unwrap();
        let ids: Vec<&str> = misses.iter().map(|m| m.prediction.id.as_str()).collect();
        assert_eq!(ids, vec!["wrong_way", "too_small"]);
        assert_eq!(misses[1].miss_type, MissType::MagnitudeWrong);

        let empty = eng.identify_misses(day.succ_opt().unwrap(), None).await.unwrap();
        assert!(empty.is_empty());
    }
}
