//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable overrides for paths. Every section falls back to defaults, so a
//! config file only needs the universes to scan.

use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::data::AdjustMode;
use crate::{Instrument, InstrumentClass};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub indicators: IndicatorConfig,
    pub scoring: ScoringConfig,
    pub ranking: RankingConfig,
    pub enrichment: EnrichmentConfig,
    pub data: DataConfig,
    pub scan: ScanConfig,
    pub universes: Vec<UniverseConfig>,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Override paths from the environment (also picks up values loaded from `.env`)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("BREAKOUT_DATA_DIR") {
            self.data.data_dir = dir;
        }
        if let Ok(file) = std::env::var("BREAKOUT_NEWS_FILE") {
            self.enrichment.news_file = Some(file);
        }
    }

    /// Check windows, thresholds and cut points for consistency
    pub fn validate(&self) -> Result<()> {
        self.indicators.validate()?;
        self.scoring.validate()?;
        self.enrichment.validate(self.scoring.max_score)?;
        ensure!(self.scan.max_concurrency >= 1, "scan.max_concurrency must be >= 1");
        ensure!(
            self.scan.circuit_breaker_threshold >= 1,
            "scan.circuit_breaker_threshold must be >= 1"
        );
        for universe in &self.universes {
            ensure!(!universe.name.is_empty(), "universe name must not be empty");
        }
        Ok(())
    }
}

// =============================================================================
// Indicators
// =============================================================================

/// Canonical indicator windows and the floors below which they shrink or drop out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub ma_short: usize,
    pub ma_medium: usize,
    pub ma_long: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub rsi_period: usize,
    pub bollinger_period: usize,
    pub bollinger_std: f64,
    pub volume_recent: usize,
    pub volume_baseline: usize,
    /// Trailing high-low range for the price position
    pub price_position_window: usize,
    /// Adapted moving-average windows smaller than this are omitted
    pub min_window: usize,
    /// History needed before the long moving average is computed at all
    pub long_ma_floor: usize,
    pub macd_floor: usize,
    pub rsi_floor: usize,
    /// History length treated as full confidence
    pub canonical_history: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            ma_short: 5,
            ma_medium: 20,
            ma_long: 60,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            rsi_period: 14,
            bollinger_period: 20,
            bollinger_std: 2.0,
            volume_recent: 10,
            volume_baseline: 10,
            price_position_window: 20,
            min_window: 5,
            long_ma_floor: 30,
            macd_floor: 26,
            rsi_floor: 14,
            canonical_history: 60,
        }
    }
}

impl IndicatorConfig {
    pub fn validate(&self) -> Result<()> {
        let windows = [
            ("ma_short", self.ma_short),
            ("ma_medium", self.ma_medium),
            ("ma_long", self.ma_long),
            ("macd_fast", self.macd_fast),
            ("macd_slow", self.macd_slow),
            ("macd_signal", self.macd_signal),
            ("rsi_period", self.rsi_period),
            ("bollinger_period", self.bollinger_period),
            ("volume_recent", self.volume_recent),
            ("volume_baseline", self.volume_baseline),
            ("price_position_window", self.price_position_window),
            ("canonical_history", self.canonical_history),
        ];
        for (name, value) in windows {
            ensure!(value > 0, "indicators.{} must be > 0", name);
        }
        ensure!(
            self.macd_fast < self.macd_slow,
            "indicators.macd_fast ({}) must be < macd_slow ({})",
            self.macd_fast,
            self.macd_slow
        );
        ensure!(
            self.bollinger_std > 0.0,
            "indicators.bollinger_std must be positive"
        );
        Ok(())
    }
}

// =============================================================================
// Scoring
// =============================================================================

/// Which price the drawdown peak is measured on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawdownBasis {
    #[default]
    Close,
    High,
}

/// Points awarded per satisfied condition and per bonus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionWeights {
    pub drawdown: f64,
    pub volume: f64,
    pub price: f64,
    pub momentum: f64,
    pub bonus: f64,
}

impl Default for ConditionWeights {
    fn default() -> Self {
        ConditionWeights {
            drawdown: 2.0,
            volume: 2.0,
            price: 3.0,
            momentum: 2.0,
            bonus: 1.0,
        }
    }
}

/// Lower bounds of each strength label
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrengthThresholds {
    pub strong: f64,
    pub medium: f64,
    pub weak: f64,
}

impl Default for StrengthThresholds {
    fn default() -> Self {
        StrengthThresholds {
            strong: 7.0,
            medium: 5.0,
            weak: 3.0,
        }
    }
}

/// Scoring used when history is too short for the full model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicModeConfig {
    pub ma_window: usize,
    pub min_ma_bars: usize,
    pub volume_window: usize,
    pub volume_threshold: f64,
    pub above_ma_points: f64,
    pub volume_points: f64,
    pub change_points: f64,
}

impl Default for BasicModeConfig {
    fn default() -> Self {
        BasicModeConfig {
            ma_window: 5,
            min_ma_bars: 3,
            volume_window: 5,
            volume_threshold: 1.2,
            above_ma_points: 2.0,
            volume_points: 2.0,
            change_points: 1.0,
        }
    }
}

/// Smallest confidence factor a short history may discount a score by
pub const MIN_CONFIDENCE_FLOOR: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Below this many bars the basic model is used
    pub min_bars: usize,
    pub analysis_window: usize,
    pub drawdown_lookback: usize,
    pub drawdown_basis: DrawdownBasis,
    pub drawdown_threshold: f64,
    pub volume_surge_threshold: f64,
    pub strong_volume_threshold: f64,
    pub breakout_lookback: usize,
    pub rsi_lookback: usize,
    pub rsi_oversold: f64,
    pub rsi_recovery: f64,
    pub weights: ConditionWeights,
    pub max_score: f64,
    /// Confidence factor for the shortest histories and for basic mode
    pub min_confidence: f64,
    pub strength: StrengthThresholds,
    pub basic: BasicModeConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            min_bars: 20,
            analysis_window: 60,
            drawdown_lookback: 120,
            drawdown_basis: DrawdownBasis::Close,
            drawdown_threshold: 0.15,
            volume_surge_threshold: 1.3,
            strong_volume_threshold: 1.8,
            breakout_lookback: 20,
            rsi_lookback: 5,
            rsi_oversold: 30.0,
            rsi_recovery: 50.0,
            weights: ConditionWeights::default(),
            max_score: 10.0,
            min_confidence: 0.5,
            strength: StrengthThresholds::default(),
            basic: BasicModeConfig::default(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.min_bars >= 2, "scoring.min_bars must be >= 2");
        ensure!(
            self.analysis_window >= 2,
            "scoring.analysis_window must be >= 2"
        );
        ensure!(
            self.drawdown_lookback >= 1,
            "scoring.drawdown_lookback must be >= 1"
        );
        ensure!(self.max_score > 0.0, "scoring.max_score must be positive");
        ensure!(
            (MIN_CONFIDENCE_FLOOR..=1.0).contains(&self.min_confidence),
            "scoring.min_confidence must be within [{}, 1]",
            MIN_CONFIDENCE_FLOOR
        );
        ensure!(
            self.rsi_oversold < self.rsi_recovery,
            "scoring.rsi_oversold must be below scoring.rsi_recovery"
        );

        let s = &self.strength;
        if !(s.strong >= s.medium && s.medium >= s.weak && s.weak >= 0.0) {
            bail!(
                "strength cut points must satisfy strong >= medium >= weak >= 0 (got {}, {}, {})",
                s.strong,
                s.medium,
                s.weak
            );
        }
        ensure!(
            s.strong <= self.max_score,
            "strength.strong ({}) exceeds max_score ({})",
            s.strong,
            self.max_score
        );
        Ok(())
    }
}

// =============================================================================
// Ranking & Enrichment
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    /// Overall recommendations
    pub top_n: usize,
    /// Entries kept per sector category
    pub category_top_n: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        RankingConfig {
            top_n: 5,
            category_top_n: 2,
        }
    }
}

/// Largest bonus a news lookup may add to a score
pub const MAX_ENRICHMENT_BONUS: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    /// JSON file mapping instrument names to news snippets
    pub news_file: Option<String>,
    /// Only records at or above this score are looked up
    pub min_score: f64,
    pub bonus: f64,
    pub max_lookups: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        EnrichmentConfig {
            enabled: true,
            news_file: None,
            min_score: 6.0,
            bonus: 0.5,
            max_lookups: 10,
        }
    }
}

impl EnrichmentConfig {
    pub fn validate(&self, max_score: f64) -> Result<()> {
        ensure!(
            (0.0..=MAX_ENRICHMENT_BONUS).contains(&self.bonus),
            "enrichment.bonus must be within [0, {}]",
            MAX_ENRICHMENT_BONUS
        );
        ensure!(
            self.min_score <= max_score,
            "enrichment.min_score ({}) exceeds max_score ({})",
            self.min_score,
            max_score
        );
        Ok(())
    }
}

// =============================================================================
// Data & Scan
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub data_dir: String,
    pub results_dir: String,
    /// Calendar days of history requested per instrument
    pub lookback_days: i64,
    pub adjust: AdjustMode,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            data_dir: "data".to_string(),
            results_dir: "results".to_string(),
            lookback_days: 365,
            adjust: AdjustMode::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub fetch_timeout_secs: u64,
    pub batch_timeout_secs: u64,
    pub max_concurrency: usize,
    pub circuit_breaker_threshold: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            max_retries: 2,
            retry_backoff_ms: 1000,
            fetch_timeout_secs: 30,
            batch_timeout_secs: 600,
            max_concurrency: 1,
            circuit_breaker_threshold: 5,
        }
    }
}

// =============================================================================
// Universes
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentEntry {
    pub symbol: String,
    pub name: String,
}

/// A named list of instruments of one class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseConfig {
    pub name: String,
    #[serde(default)]
    pub class: InstrumentClass,
    /// Keep only the best N of this universe before merging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_limit: Option<usize>,
    pub instruments: Vec<InstrumentEntry>,
}

impl UniverseConfig {
    pub fn instruments(&self) -> Vec<Instrument> {
        self.instruments
            .iter()
            .map(|entry| Instrument::new(&entry.symbol, entry.name.clone(), self.class))
            .collect()
    }
}
