// src/analysis/drivers.rs
//! Driver discovery: which market events plausibly caused a move.
//!
//! An event is a candidate when it happened inside the move window or within
//! `lead_hours` before it. Relevance = importance × direction alignment ×
//! timing, where timing decays linearly from 1.0 (inside the window) to 0.5
//! (at the far edge of the lead period).

use chrono::{DateTime, Duration, Utc};

use super::{DiscoveredDriver, MarketEvent};
use crate::model::Direction;

fn alignment(event: Option<Direction>, mv: Direction) -> f64 {
    match event {
        Some(d) if d == mv => 1.0,
        Some(d) if d.opposes(mv) => 0.0,
        _ => 0.5,
    }
}

fn timing(at: DateTime<Utc>, start: DateTime<Utc>, lead: Duration) -> f64 {
    if at >= start {
        return 1.0;
    }
    let lead_secs = lead.num_seconds();
    if lead_secs <= 0 {
        return 0.0;
    }
    let before = (start - at).num_seconds() as f64;
    1.0 - 0.5 * (before / lead_secs as f64).clamp(0.0, 1.0)
}

pub fn relevance(
    ev: &MarketEvent,
    mv: Direction,
    start: DateTime<Utc>,
    lead: Duration,
) -> f64 {
    let r = ev.importance.clamp(0.0, 1.0)
        * alignment(ev.direction, mv)
        * timing(ev.occurred_at, start, lead);
    (r * 1000.0).round() / 1000.0
}

/// Top `max` events by relevance (stable on ties), dropping those under `min_relevance`.
pub fn discover(
    events: &[MarketEvent],
    mv: Direction,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    lead_hours: i64,
    max: usize,
    min_relevance: f64,
) -> Vec<DiscoveredDriver> {
    let lead = Duration::hours(lead_hours.max(0));
    let from = start - lead;
    let mut out: Vec<DiscoveredDriver> = events
        .iter()
        .filter(|e| e.occurred_at >= from && e.occurred_at <= end)
        .filter_map(|e| {
            let r = relevance(e, mv, start, lead);
            (r >= min_relevance && r > 0.0).then(|| DiscoveredDriver {
                headline: e.headline.clone(),
                category: e.category.clone(),
                source: e.source.clone(),
                occurred_at: e.occurred_at,
                relevance: r,
            })
        })
        .collect();
    out.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
    out.truncate(max);
    out
}
