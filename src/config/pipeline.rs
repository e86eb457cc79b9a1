// src/config/pipeline.rs
//! Pipeline configuration: detection thresholds, miss materiality, analysis
//! catalogs and the daily schedule.
//!
//! Lookup order:
//! 1) $MISS_PIPELINE_CONFIG_PATH
//! 2) config/pipeline.toml
//! 3) config/pipeline.json
//! 4) built-in defaults

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_PIPELINE_CONFIG_PATH: &str = "MISS_PIPELINE_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum absolute move (percent) that counts as significant.
    pub min_move_percent: f64,
    pub lookback_days: u32,
    /// A same-direction prediction covers a move when its magnitude is at
    /// least this fraction of the move.
    pub coverage_ratio: f64,
    /// Significance multiplier when a move was only partially covered.
    pub partial_coverage_factor: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_move_percent: 5.0,
            lookback_days: 30,
            coverage_ratio: 0.5,
            partial_coverage_factor: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvestigationConfig {
    /// Realised changes inside ±band are "flat".
    pub direction_band_pct: f64,
    /// Size error (percentage points) that makes a same-direction call a miss.
    pub materiality_pct: f64,
}

impl Default for InvestigationConfig {
    fn default() -> Self {
        Self {
            direction_band_pct: 0.5,
            materiality_pct: 2.0,
        }
    }
}

/// Signals and data sources a domain is expected to have.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DomainCatalog {
    pub signals: Vec<String>,
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// How far before the move window an event may still count as a driver.
    pub driver_lead_hours: i64,
    pub max_drivers: usize,
    pub min_driver_relevance: f64,
    pub catalogs: BTreeMap<String, DomainCatalog>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let mut catalogs = BTreeMap::new();
        catalogs.insert(
            "equity".to_string(),
            DomainCatalog {
                signals: strings(&[
                    "rsi",
                    "macd",
                    "volume_spike",
                    "earnings_surprise",
                    "analyst_revisions",
                ]),
                sources: strings(&["price_feed", "news", "earnings_transcript", "sec_filings"]),
            },
        );
        catalogs.insert(
            "crypto".to_string(),
            DomainCatalog {
                signals: strings(&[
                    "rsi",
                    "funding_rate",
                    "open_interest",
                    "volume_spike",
                    "exchange_netflow",
                ]),
                sources: strings(&["exchange_feed", "news", "on_chain", "social_sentiment"]),
            },
        );
        Self {
            driver_lead_hours: 24,
            max_drivers: 5,
            min_driver_relevance: 0.2,
            catalogs,
        }
    }
}

impl AnalysisConfig {
    /// Catalog for a domain (case-insensitive); empty when unknown.
    pub fn catalog_for(&self, domain: &str) -> DomainCatalog {
        self.catalogs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(domain))
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub interval_secs: u64,
    #[serde(default)]
    pub universe_id: Option<String>,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            interval_secs: 24 * 3600,
            universe_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub detection: DetectionConfig,
    pub investigation: InvestigationConfig,
    pub analysis: AnalysisConfig,
    pub orchestration: OrchestrationConfig,
}

impl PipelineConfig {
    /// Replace out-of-range values with defaults.
    pub fn sanitized(mut self) -> Self {
        let d = DetectionConfig::default();
        if !(self.detection.min_move_percent > 0.0) {
            self.detection.min_move_percent = d.min_move_percent;
        }
        if self.detection.lookback_days == 0 {
            self.detection.lookback_days = d.lookback_days;
        }
        if !(0.0..=1.0).contains(&self.detection.coverage_ratio) {
            self.detection.coverage_ratio = d.coverage_ratio;
        }
        if !(0.0..=1.0).contains(&self.detection.partial_coverage_factor) {
            self.detection.partial_coverage_factor = d.partial_coverage_factor;
        }

        let i = InvestigationConfig::default();
        if !(self.investigation.direction_band_pct >= 0.0) {
            self.investigation.direction_band_pct = i.direction_band_pct;
        }
        if !(self.investigation.materiality_pct > 0.0) {
            self.investigation.materiality_pct = i.materiality_pct;
        }

        if self.analysis.max_drivers == 0 {
            self.analysis.max_drivers = AnalysisConfig::default().max_drivers;
        }
        if self.analysis.driver_lead_hours < 0 {
            self.analysis.driver_lead_hours = 0;
        }
        if self.orchestration.interval_secs == 0 {
            self.orchestration.interval_secs = OrchestrationConfig::default().interval_secs;
        }
        self
    }
}

/// Load from an explicit path. Supports TOML or JSON.
pub fn load_pipeline_config_from(path: &Path) -> Result<PipelineConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading pipeline config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let cfg: PipelineConfig = match ext.as_str() {
        "json" => serde_json::from_str(&content).context("parsing pipeline config JSON")?,
        _ => toml::from_str(&content).context("parsing pipeline config TOML")?,
    };
    Ok(cfg.sanitized())
}

pub fn load_pipeline_config_default() -> Result<PipelineConfig> {
    if let Ok(p) = std::env::var(ENV_PIPELINE_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_pipeline_config_from(&pb);
        }
        return Err(anyhow!(
            "{ENV_PIPELINE_CONFIG_PATH} points to non-existent path"
        ));
    }
    for candidate in ["config/pipeline.toml", "config/pipeline.json"] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return load_pipeline_config_from(&p);
        }
    }
    Ok(PipelineConfig::default())
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
