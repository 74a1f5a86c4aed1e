//! Bottom-breakout scoring
//!
//! A bottom breakout needs four things at once: a meaningful drawdown, a
//! volume surge, price clearing resistance, and momentum turning up. Each
//! satisfied condition earns points, confirming combinations earn bonus
//! points, and the total is discounted when the history is short.
//!
//! Series shorter than `min_bars` fall back to a basic model built from the
//! day-over-day change, a short moving average and recent volume.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::config::{Config, DrawdownBasis, ScoringConfig, StrengthThresholds};
use crate::indicators::IndicatorSet;
use crate::{BarSeries, Instrument, InstrumentClass, Symbol};

// =============================================================================
// Assessment Types
// =============================================================================

/// Strength label derived from the final score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    None,
    Weak,
    Medium,
    Strong,
}

impl Strength {
    /// Step function over the configured cut points
    pub fn from_score(score: f64, thresholds: &StrengthThresholds) -> Self {
        if score >= thresholds.strong {
            Strength::Strong
        } else if score >= thresholds.medium {
            Strength::Medium
        } else if score >= thresholds.weak {
            Strength::Weak
        } else {
            Strength::None
        }
    }
}

impl std::fmt::Display for Strength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Strength::None => "none",
            Strength::Weak => "weak",
            Strength::Medium => "medium",
            Strength::Strong => "strong",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Full,
    Basic,
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisMode::Full => f.write_str("full"),
            AnalysisMode::Basic => f.write_str("basic"),
        }
    }
}

/// The four breakout conditions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BreakoutConditions {
    pub drawdown: bool,
    pub volume_surge: bool,
    pub price_breakout: bool,
    pub momentum_turn: bool,
}

impl BreakoutConditions {
    /// All four conditions hold. Independent of the score.
    pub fn fully_confirmed(&self) -> bool {
        self.drawdown && self.volume_surge && self.price_breakout && self.momentum_turn
    }

    pub fn count(&self) -> usize {
        [
            self.drawdown,
            self.volume_surge,
            self.price_breakout,
            self.momentum_turn,
        ]
        .iter()
        .filter(|c| **c)
        .count()
    }
}

/// Measurements behind a full-mode assessment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakoutSignals {
    pub peak_price: f64,
    pub trough_price: f64,
    /// Fraction, e.g. 0.25 for a 25% drawdown
    pub drawdown: f64,
    pub volume_ratio: f64,
    pub ma_medium: Option<f64>,
    pub recent_high: Option<f64>,
    pub price_break_ma: bool,
    pub price_break_high: bool,
    pub macd_golden_cross: bool,
    pub rsi: Option<f64>,
    pub rsi_recovery: bool,
    /// Close within the recent high-low range, 0..=100
    pub price_position: Option<f64>,
}

/// Measurements behind a basic-mode assessment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasicSignals {
    /// Day-over-day change in percent
    pub price_change_pct: f64,
    pub short_ma: Option<f64>,
    pub above_short_ma: bool,
    pub volume_ratio: f64,
    pub price_position: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum AnalysisDetail {
    Full(BreakoutSignals),
    Basic(BasicSignals),
}

/// Result of scoring one instrument
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakoutAssessment {
    pub symbol: Symbol,
    pub name: String,
    pub class: InstrumentClass,
    pub latest_price: f64,
    pub detail: AnalysisDetail,
    pub conditions: BreakoutConditions,
    pub fully_confirmed: bool,
    /// Points before the data-quality discount, capped at the maximum score
    pub raw_score: f64,
    pub confidence: f64,
    pub score: f64,
    pub strength: Strength,
    pub reduced_confidence: bool,
    pub bars_available: usize,
    pub analysis_window: usize,
}

impl BreakoutAssessment {
    pub fn mode(&self) -> AnalysisMode {
        match self.detail {
            AnalysisDetail::Full(_) => AnalysisMode::Full,
            AnalysisDetail::Basic(_) => AnalysisMode::Basic,
        }
    }

    /// Drawdown in percent; zero in basic mode
    pub fn drawdown_pct(&self) -> f64 {
        match &self.detail {
            AnalysisDetail::Full(s) => s.drawdown * 100.0,
            AnalysisDetail::Basic(_) => 0.0,
        }
    }

    pub fn volume_ratio(&self) -> f64 {
        match &self.detail {
            AnalysisDetail::Full(s) => s.volume_ratio,
            AnalysisDetail::Basic(b) => b.volume_ratio,
        }
    }

    pub fn price_position(&self) -> Option<f64> {
        match &self.detail {
            AnalysisDetail::Full(s) => s.price_position,
            AnalysisDetail::Basic(b) => b.price_position,
        }
    }
}

// =============================================================================
// Scorer
// =============================================================================

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn max_of(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    values.into_iter().map(OrderedFloat).max().map(|v| v.0)
}

fn min_of(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    values.into_iter().map(OrderedFloat).min().map(|v| v.0)
}

/// Scores bar series against the breakout conditions
#[derive(Debug, Clone)]
pub struct BreakoutScorer {
    config: ScoringConfig,
    canonical_history: usize,
}

impl BreakoutScorer {
    pub fn new(config: ScoringConfig, canonical_history: usize) -> Self {
        Self {
            config,
            canonical_history: canonical_history.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.scoring.clone(), config.indicators.canonical_history)
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Data-quality factor for a full-mode assessment: history coverage,
    /// never below `min_confidence`
    pub fn confidence_factor(&self, bars_available: usize) -> f64 {
        let coverage = (bars_available as f64 / self.canonical_history as f64).min(1.0);
        coverage.max(self.config.min_confidence)
    }

    /// Score an instrument. `None` only when the series holds no bars.
    pub fn assess(
        &self,
        instrument: &Instrument,
        series: &BarSeries,
        indicators: &IndicatorSet,
    ) -> Option<BreakoutAssessment> {
        let latest = series.last()?;
        let len = series.len();

        let (detail, conditions, points, analysis_window) = if len < self.config.min_bars {
            let (signals, points) = self.basic_signals(series, indicators);
            (
                AnalysisDetail::Basic(signals),
                BreakoutConditions::default(),
                points,
                len,
            )
        } else {
            let window = self.config.analysis_window.min(len);
            let (signals, conditions, points) = self.full_signals(series, indicators, window);
            (AnalysisDetail::Full(signals), conditions, points, window)
        };

        let raw_score = points.clamp(0.0, self.config.max_score);
        // Basic mode carries the full discount regardless of length
        let confidence = match detail {
            AnalysisDetail::Basic(_) => self.config.min_confidence,
            AnalysisDetail::Full(_) => self.confidence_factor(len),
        };
        let score = round1((raw_score * confidence).clamp(0.0, self.config.max_score));
        let strength = Strength::from_score(score, &self.config.strength);
        let reduced_confidence =
            matches!(detail, AnalysisDetail::Basic(_)) || indicators.reduced_confidence;

        Some(BreakoutAssessment {
            symbol: instrument.symbol.clone(),
            name: instrument.name.clone(),
            class: instrument.class,
            latest_price: latest.close,
            detail,
            conditions,
            fully_confirmed: conditions.fully_confirmed(),
            raw_score,
            confidence,
            score,
            strength,
            reduced_confidence,
            bars_available: len,
            analysis_window,
        })
    }

    fn full_signals(
        &self,
        series: &BarSeries,
        indicators: &IndicatorSet,
        window: usize,
    ) -> (BreakoutSignals, BreakoutConditions, f64) {
        let cfg = &self.config;
        let bars = series.bars();
        let len = bars.len();
        let current = bars[len - 1].close;
        let recent = &bars[len - window..];

        // Drawdown: peak over the longer lookback against the trough inside the window
        let lookback = cfg.drawdown_lookback.min(len);
        let peak_bars = &bars[len - lookback..];
        let peak_price = match cfg.drawdown_basis {
            DrawdownBasis::Close => max_of(peak_bars.iter().map(|b| b.close)),
            DrawdownBasis::High => max_of(peak_bars.iter().map(|b| b.high)),
        }
        .unwrap_or(current);
        let trough_price = min_of(recent.iter().map(|b| b.close)).unwrap_or(current);
        let drawdown = if peak_price > 0.0 {
            ((peak_price - trough_price) / peak_price).max(0.0)
        } else {
            0.0
        };

        let volume_ratio = IndicatorSet::latest(&indicators.volume_ratio).unwrap_or(1.0);

        let ma_medium = IndicatorSet::latest(&indicators.ma_medium);
        let price_break_ma = ma_medium.is_some_and(|ma| current > ma);

        // Highest high of the prior N-1 bars, excluding the current bar
        let high_lookback = cfg.breakout_lookback.min(window.saturating_sub(1));
        let recent_high = if high_lookback > 1 {
            max_of(bars[len - high_lookback..len - 1].iter().map(|b| b.high))
        } else {
            None
        };
        let price_break_high = recent_high.is_some_and(|high| current > high);

        let macd_golden_cross = indicators.golden_cross_on_last();

        let rsi = IndicatorSet::latest(&indicators.rsi);
        let rsi_lookback = cfg.rsi_lookback.min(len - 1);
        let prior_rsi_low = min_of(
            indicators.rsi[len - 1 - rsi_lookback..len - 1]
                .iter()
                .flatten()
                .copied(),
        );
        let rsi_recovery = match (prior_rsi_low, rsi) {
            (Some(low), Some(now)) => low < cfg.rsi_oversold && now > cfg.rsi_recovery,
            _ => false,
        };

        let conditions = BreakoutConditions {
            drawdown: drawdown > cfg.drawdown_threshold,
            volume_surge: volume_ratio > cfg.volume_surge_threshold,
            price_breakout: price_break_ma || price_break_high,
            momentum_turn: macd_golden_cross || rsi_recovery,
        };

        let w = &cfg.weights;
        let mut points = 0.0;
        if conditions.drawdown {
            points += w.drawdown;
        }
        if conditions.volume_surge {
            points += w.volume;
        }
        if conditions.price_breakout {
            points += w.price;
        }
        if conditions.momentum_turn {
            points += w.momentum;
        }
        if volume_ratio > cfg.strong_volume_threshold {
            points += w.bonus;
        }
        if price_break_ma && price_break_high {
            points += w.bonus;
        }
        if macd_golden_cross && rsi_recovery {
            points += w.bonus;
        }

        let signals = BreakoutSignals {
            peak_price,
            trough_price,
            drawdown,
            volume_ratio,
            ma_medium,
            recent_high,
            price_break_ma,
            price_break_high,
            macd_golden_cross,
            rsi,
            rsi_recovery,
            price_position: IndicatorSet::latest(&indicators.price_position),
        };

        (signals, conditions, points)
    }

    fn basic_signals(&self, series: &BarSeries, indicators: &IndicatorSet) -> (BasicSignals, f64) {
        let cfg = &self.config.basic;
        let closes = series.closes();
        let volumes = series.volumes();
        let len = closes.len();
        let current = closes[len - 1];

        let price_change_pct = if len >= 2 && closes[len - 2] > 0.0 {
            (current - closes[len - 2]) / closes[len - 2] * 100.0
        } else {
            0.0
        };

        let ma_window = cfg.ma_window.min(len);
        let short_ma = (ma_window >= cfg.min_ma_bars).then(|| mean(&closes[len - ma_window..]));
        let above_short_ma = short_ma.is_some_and(|ma| current > ma);

        let vw = cfg.volume_window;
        let volume_ratio = if vw > 0 && len >= vw {
            let recent = mean(&volumes[len - vw..]);
            let prior = if len >= 2 * vw {
                mean(&volumes[len - 2 * vw..len - vw])
            } else {
                recent
            };
            if prior > 0.0 {
                recent / prior
            } else {
                1.0
            }
        } else {
            1.0
        };

        let mut points = 0.0;
        if above_short_ma {
            points += cfg.above_ma_points;
        }
        if volume_ratio > cfg.volume_threshold {
            points += cfg.volume_points;
        }
        if price_change_pct > 0.0 {
            points += cfg.change_points;
        }

        let signals = BasicSignals {
            price_change_pct,
            short_ma,
            above_short_ma,
            volume_ratio,
            price_position: IndicatorSet::latest(&indicators.price_position),
        };
        (signals, points)
    }
}
