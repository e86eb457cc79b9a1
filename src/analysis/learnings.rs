// src/analysis/learnings.rs
//! Turn an audit (drivers, signal and source gaps) into proposals:
//! learnings for the review queue and informational tool suggestions.

use serde_json::{json, Value};

use super::{DiscoveredDriver, SuggestedLearning, ToolSuggestion};
use crate::config::DomainCatalog;
use crate::learning_queue::{LearningType, ScopeLevel};
use crate::model::{Direction, Target};

/// A proposal plus the queue metadata the reviewer sees.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningDraft {
    pub suggestion: SuggestedLearning,
    pub title: String,
    pub config: Value,
    pub confidence: f64,
    pub reasoning: String,
}

/// Signals we had vs. the catalog signals that were absent.
pub fn split_signals(catalog: &DomainCatalog, observed: &[String]) -> (Vec<String>, Vec<String>) {
    let mut had: Vec<String> = Vec::new();
    for s in observed {
        if !had.iter().any(|h| h.eq_ignore_ascii_case(s)) {
            had.push(s.clone());
        }
    }
    let gaps = catalog
        .signals
        .iter()
        .filter(|c| !had.iter().any(|h| h.eq_ignore_ascii_case(c)))
        .cloned()
        .collect();
    (had, gaps)
}

pub fn source_gaps(catalog: &DomainCatalog, available: &[String]) -> Vec<String> {
    catalog
        .sources
        .iter()
        .filter(|c| !available.iter().any(|a| a.eq_ignore_ascii_case(c)))
        .cloned()
        .collect()
}

/// Domain-wide proposals need a domain; without one they stay at target scope.
fn broad_scope(target: &Target) -> ScopeLevel {
    if target.domain.trim().is_empty() {
        ScopeLevel::Target
    } else {
        ScopeLevel::Domain
    }
}

pub fn draft(
    target: &Target,
    direction: Direction,
    move_percent: f64,
    drivers: &[DiscoveredDriver],
    signals_we_had: &[String],
    signal_gaps: &[String],
) -> Vec<LearningDraft> {
    let mut out = Vec::new();
    let dir = direction.as_str();
    let size = move_percent.abs();

    // one pattern per driver category, led by its strongest driver
    let mut seen: Vec<&str> = Vec::new();
    for d in drivers {
        if seen.contains(&d.category.as_str()) {
            continue;
        }
        seen.push(&d.category);
        out.push(LearningDraft {
            suggestion: SuggestedLearning {
                learning_type: LearningType::Pattern,
                content: format!(
                    "{} events such as \"{}\" preceded a {dir} move of {size:.1}% in {}",
                    d.category, d.headline, target.symbol
                ),
                scope: ScopeLevel::Target,
            },
            title: format!("{} {} pattern for {}", d.category, dir, target.symbol),
            config: json!({
                "trigger_category": d.category,
                "expected_direction": dir,
                "expected_move_pct": size,
            }),
            confidence: d.relevance,
            reasoning: format!("driver relevance {:.2} from {}", d.relevance, d.source),
        });
    }

    if !signals_we_had.is_empty() {
        out.push(LearningDraft {
            suggestion: SuggestedLearning {
                learning_type: LearningType::Threshold,
                content: format!(
                    "Signals {} were present before the {dir} move in {} but did not trigger \
                         a forecast; lower their trigger thresholds",
                    signals_we_had.join(", "),
                    target.symbol
                ),
                scope: broad_scope(target),
            },
            title: format!("Lower thresholds for {} signals", target.domain),
            config: json!({ "signals": signals_we_had, "adjustment": "lower" }),
            confidence: 0.6,
            reasoning: format!("{} signal(s) available but unused", signals_we_had.len()),
        });
    }

    if !signal_gaps.is_empty() {
        out.push(LearningDraft {
            suggestion: SuggestedLearning {
                learning_type: LearningType::Rule,
                content: format!(
                    "Reduce forecast confidence for {} targets when {} are unavailable",
                    target.domain,
                    signal_gaps.join(", ")
                ),
                scope: broad_scope(target),
            },
            title: format!("Confidence rule for missing {} signals", target.domain),
            config: json!({ "missing_signals": signal_gaps, "confidence_penalty": 0.1 }),
            confidence: 0.5,
            reasoning: format!("{} expected signal(s) absent", signal_gaps.len()),
        });
    }

    out
}

pub fn tool_suggestions(target: &Target, gaps: &[String]) -> Vec<ToolSuggestion> {
    gaps.iter()
        .map(|g| ToolSuggestion {
            tool_type: g.clone(),
            description: format!("Add a {g} feed for {} targets", target.domain),
            rationale: format!(
                "No {g} data was available when {} moved, so the move could not be \
                     anticipated from it",
                target.symbol
            ),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn target(domain: &str) -> Target {
        Target {
            id: "t-aapl".into(),
            symbol: "AAPL".into(),
            name: None,
            target_type: "equity".into(),
            domain: domain.into(),
            universe_id: Some("u-tech".into()),
            is_active: true,
        }
    }

    fn catalog() -> DomainCatalog {
        DomainCatalog {
            signals: vec!["rsi".into(), "macd".into(), "volume_spike".to_string()],
            sources: vec!["news".into(), "sec_filings".to_string()],
        }
    }

    #[test]
    fn signals_split_against_catalog() {
        let observed = ["RSI".to_string(), "rsi".to_string(), "options_flow".to_string()];
        let (had, gaps) = split_signals(&catalog(), &observed);
        assert_eq!(had, vec!["RSI", "options_flow"]);
        assert_eq!(gaps, vec!["macd", "volume_spike"]);
        assert_eq!(source_gaps(&catalog(), &["NEWS".to_string()]), vec!["sec_filings"]);
    }

    #[test]
    fn drafts_cover_each_kind() {
        let drivers = vec![
            DiscoveredDriver {
                headline: "beat".into(),
                category: "earnings".into(),
                source: "wire".into(),
                occurred_at: Utc::now(),
                relevance: 0.8,
            },
            DiscoveredDriver {
                headline: "second earnings story".into(),
                category: "earnings".into(),
                source: "wire".into(),
                occurred_at: Utc::now(),
                relevance: 0.4,
            },
        ];
        let drafts = draft(
            &target("equity"),
            Direction::Up,
            7.25,
            &drivers,
            &["rsi".to_string()],
            &["macd".to_string()],
        );
        let kinds: Vec<(LearningType, ScopeLevel)> = drafts
            .iter()
            .map(|d| (d.suggestion.learning_type, d.suggestion.scope))
            .collect();
        assert_eq!(
            kinds,
            vec![
                (LearningType::Pattern, ScopeLevel::Target),
                (LearningType::Threshold, ScopeLevel::Domain),
                (LearningType::Rule, ScopeLevel::Domain),
            ]
        );
        let content = &drafts[0].suggestion.content;
        assert!(content.contains("7.2%") || content.contains("7.3%"), "{content}");
    }

    #[test]
    fn no_domain_keeps_broad_learnings_at_target_scope() {
        let drafts = draft(&target(""), Direction::Down, -6.0, &[], &["rsi".to_string()], &[]);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].suggestion.scope, ScopeLevel::Target);
    }
}
