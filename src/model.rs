//! # Domain model
//! Targets, predictions and their ensemble chain, price points.
//!
//! These records are owned by external collaborators; the core reads them and
//! never mutates them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a predicted or realised move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    /// Classify a signed percent change; anything inside `±band` is flat.
    pub fn from_change(change_pct: f64, band: f64) -> Self {
        if change_pct >= band && change_pct > 0.0 {
            Direction::Up
        } else if change_pct <= -band && change_pct < 0.0 {
            Direction::Down
        } else {
            Direction::Flat
        }
    }

    /// Both non-flat and pointing opposite ways.
    pub fn opposes(self, other: Direction) -> bool {
        matches!(
            (self, other),
            (Direction::Up, Direction::Down) | (Direction::Down, Direction::Up)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Flat => "flat",
        }
    }
}

/// Why a forecast (or the absence of one) missed.
///
/// Open taxonomy: new kinds are appended, existing names never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissType {
    /// Predicted and actual direction have opposite signs.
    DirectionWrong,
    /// Right sign (or one side flat), materially wrong size.
    MagnitudeWrong,
    /// No covering prediction existed.
    MissedEntirely,
}

impl MissType {
    pub const ALL: [MissType; 3] = [
        MissType::DirectionWrong,
        MissType::MagnitudeWrong,
        MissType::MissedEntirely,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MissType::DirectionWrong => "direction_wrong",
            MissType::MagnitudeWrong => "magnitude_wrong",
            MissType::MissedEntirely => "missed_entirely",
        }
    }
}

/// A trackable entity (symbol, type, universe membership).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    /// e.g. "equity", "crypto", "forex".
    pub target_type: String,
    /// Catalog key used by analysis (usually the same as `target_type`).
    pub domain: String,
    #[serde(default)]
    pub universe_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Pending,
    Resolved,
    Expired,
}

/// One predictor's vote inside the ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictorContribution {
    pub predictor_id: String,
    pub name: String,
    pub direction: Direction,
    /// Predictor's own magnitude estimate in percent, when it made one.
    #[serde(default)]
    pub magnitude: Option<f64>,
    pub confidence: f64,
    /// Weight the ensemble gave this predictor.
    pub weight: f64,
}

/// One model's vote inside the model ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelContribution {
    pub model: String,
    pub direction: Direction,
    pub confidence: f64,
}

/// An input signal and how the ensemble read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalReading {
    pub name: String,
    /// Direction the raw signal pointed to.
    pub observed_direction: Direction,
    /// Direction the ensemble took it to mean.
    pub interpreted_direction: Direction,
    #[serde(default)]
    pub strength: f64,
}

/// A forecast for a target plus, once resolved, its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub id: String,
    pub target_id: String,
    #[serde(default)]
    pub universe_id: Option<String>,
    pub direction: Direction,
    /// Predicted absolute move in percent.
    pub magnitude: f64,
    pub confidence: f64,
    /// e.g. "1d", "1w".
    pub timeframe: String,
    pub predicted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: PredictionStatus,
    /// Realised signed change in percent.
    #[serde(default)]
    pub outcome_value: Option<f64>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolution_notes: Option<String>,
    #[serde(default)]
    pub predictors: Vec<PredictorContribution>,
    #[serde(default)]
    pub models: Vec<ModelContribution>,
    #[serde(default)]
    pub signals: Vec<SignalReading>,
}

impl Prediction {
    /// True when the prediction's active period intersects `[from, to]`.
    pub fn overlaps(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.predicted_at <= to && self.expires_at >= from
    }
}

/// A captured price/value observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub at: DateTime<Utc>,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_band_is_inclusive_at_edges() {
        assert_eq!(Direction::from_change(0.5, 0.5), Direction::Up);
        assert_eq!(Direction::from_change(0.49, 0.5), Direction::Flat);
        assert_eq!(Direction::from_change(-0.5, 0.5), Direction::Down);
        assert_eq!(Direction::from_change(0.0, 0.0), Direction::Flat);
    }

    #[test]
    fn miss_type_taxonomy_is_exactly_three_kinds() {
        let names: Vec<&str> = MissType::ALL.iter().map(|m| m.as_str()).collect();
        assert_eq!(names, vec!["direction_wrong", "magnitude_wrong", "missed_entirely"]);
        for m in MissType::ALL {
            let v = serde_json::to_value(m).unwrap();
            assert_eq!(v, serde_json::json!(m.as_str()));
        }
    }

    #[test]
    fn flat_never_opposes() {
        assert!(Direction::Up.opposes(Direction::Down));
        assert!(!Direction::Up.opposes(Direction::Flat));
        assert!(!Direction::Flat.opposes(Direction::Down));
    }
}
