//! Technical indicators with adaptive windowing
//!
//! Every column is aligned to the input: position `i` describes bar `i`, and
//! a value is `None` until the indicator has enough bars behind it. Moving
//! averages and Bollinger bands wrap the `ta` crate; EMA, MACD and RSI are
//! computed directly so that flat inputs stay exactly flat.
//!
//! When a series is shorter than the canonical windows, [`IndicatorSet::compute`]
//! shrinks the windows proportionally to the available history and drops
//! indicators whose floor is not met, recording the windows it actually used.

use itertools::Itertools;
use serde::Serialize;
use ta::indicators::{BollingerBands as TaBB, Maximum, Minimum, SimpleMovingAverage};
use ta::Next;

use crate::config::IndicatorConfig;
use crate::BarSeries;

// =============================================================================
// Type Aliases for Complex Return Types
// =============================================================================

/// Type alias for band indicators (upper, middle, lower)
pub type BandOutput = (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>);

/// Type alias for MACD output (line, signal, histogram)
pub type MacdOutput = (Vec<Option<f64>>, Vec<Option<f64>>, Vec<Option<f64>>);

// =============================================================================
// Moving Averages
// =============================================================================

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut indicator = match SimpleMovingAverage::new(period) {
        Ok(i) => i,
        Err(_) => return vec![None; values.len()],
    };

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let sma_val = indicator.next(value);
            (i + 1 >= period).then_some(sma_val)
        })
        .collect()
}

/// Raw exponential smoothing with α = 2/(span+1), seeded by the first value.
///
/// Written as `prev + α·(x − prev)` so a constant input reproduces itself exactly.
fn ema_raw(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &value in values {
        let next = match prev {
            Some(p) => p + alpha * (value - p),
            None => value,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// Calculate Exponential Moving Average, reported from index `span - 1`
pub fn ema(values: &[f64], span: usize) -> Vec<Option<f64>> {
    if values.is_empty() || span == 0 {
        return vec![];
    }

    ema_raw(values, span)
        .into_iter()
        .enumerate()
        .map(|(i, v)| (i + 1 >= span).then_some(v))
        .collect()
}

// =============================================================================
// Momentum
// =============================================================================

/// Calculate MACD.
///
/// `histogram = signal - line`, so a negative histogram means the line is
/// above its signal. All three columns are reported from index `slow - 1`.
pub fn macd(values: &[f64], fast: usize, slow: usize, signal: usize) -> MacdOutput {
    if values.is_empty() {
        return (vec![], vec![], vec![]);
    }
    if fast == 0 || slow == 0 || signal == 0 {
        let none = vec![None; values.len()];
        return (none.clone(), none.clone(), none);
    }

    let fast_ema = ema_raw(values, fast);
    let slow_ema = ema_raw(values, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_raw(&line, signal);

    let mut macd_line = Vec::with_capacity(values.len());
    let mut signal_out = Vec::with_capacity(values.len());
    let mut histogram = Vec::with_capacity(values.len());

    for (i, (&l, &s)) in line.iter().zip(&signal_line).enumerate() {
        if i + 1 >= slow {
            macd_line.push(Some(l));
            signal_out.push(Some(s));
            histogram.push(Some(s - l));
        } else {
            macd_line.push(None);
            signal_out.push(None);
            histogram.push(None);
        }
    }

    (macd_line, signal_out, histogram)
}

/// Whether `line` crosses above `signal` at bar `t`:
/// `line(t-1) <= signal(t-1)` and `line(t) > signal(t)`
pub fn is_golden_cross_at(line: &[Option<f64>], signal: &[Option<f64>], t: usize) -> bool {
    if t == 0 || t >= line.len() || t >= signal.len() {
        return false;
    }
    match (line[t - 1], signal[t - 1], line[t], signal[t]) {
        (Some(prev_line), Some(prev_signal), Some(line_now), Some(signal_now)) => {
            prev_line <= prev_signal && line_now > signal_now
        }
        _ => false,
    }
}

/// Every bar index at which `line` crosses above `signal`
pub fn golden_crosses(line: &[Option<f64>], signal: &[Option<f64>]) -> Vec<usize> {
    line.iter()
        .zip(signal)
        .enumerate()
        .tuple_windows()
        .filter_map(|((_, (l0, s0)), (t, (l1, s1)))| match (l0, s0, l1, s1) {
            (Some(l0), Some(s0), Some(l1), Some(s1)) if l0 <= s0 && l1 > s1 => Some(t),
            _ => None,
        })
        .collect()
}

/// RSI from average gain and average loss, bounded to [0, 100].
///
/// No losses saturates at 100; no movement at all is neutral 50.
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss <= 0.0 {
        return if avg_gain <= 0.0 { 50.0 } else { 100.0 };
    }
    let rs = avg_gain / avg_loss;
    (100.0 - 100.0 / (1.0 + rs)).clamp(0.0, 100.0)
}

/// Calculate RSI using simple rolling means of gains and losses.
///
/// Needs `period` price changes, so the first value appears at index `period`.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if values.is_empty() || period == 0 {
        return vec![];
    }

    let mut result = vec![None; values.len()];
    let deltas: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    if deltas.len() < period {
        return result;
    }

    for end in period..=deltas.len() {
        let window = &deltas[end - period..end];
        let gain: f64 = window.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
        let loss: f64 = window.iter().filter(|d| **d < 0.0).map(|d| -d).sum::<f64>() / period as f64;
        result[end] = Some(rsi_from_averages(gain, loss));
    }

    result
}

// =============================================================================
// Volatility
// =============================================================================

/// Calculate Bollinger Bands using ta crate
pub fn bollinger_bands(values: &[f64], period: usize, num_std: f64) -> BandOutput {
    if values.is_empty() || period == 0 {
        return (vec![], vec![], vec![]);
    }

    let mut indicator = match TaBB::new(period, num_std) {
        Ok(i) => i,
        Err(_) => {
            return (
                vec![None; values.len()],
                vec![None; values.len()],
                vec![None; values.len()],
            )
        }
    };

    let mut upper = Vec::with_capacity(values.len());
    let mut middle = Vec::with_capacity(values.len());
    let mut lower = Vec::with_capacity(values.len());

    for (i, &value) in values.iter().enumerate() {
        let bb = indicator.next(value);
        if i + 1 >= period {
            upper.push(Some(bb.upper));
            middle.push(Some(bb.average));
            lower.push(Some(bb.lower));
        } else {
            upper.push(None);
            middle.push(None);
            lower.push(None);
        }
    }

    (upper, middle, lower)
}

// =============================================================================
// Volume
// =============================================================================

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Ratio of the mean volume of the last `recent` bars to the mean of the
/// `baseline` bars immediately before them. A zero baseline yields 1.0.
pub fn volume_ratio(volumes: &[f64], recent: usize, baseline: usize) -> Vec<Option<f64>> {
    if recent == 0 || baseline == 0 {
        return vec![None; volumes.len()];
    }
    let span = recent + baseline;

    (0..volumes.len())
        .map(|i| {
            if i + 1 < span {
                return None;
            }
            let recent_mean = mean(&volumes[i + 1 - recent..=i]);
            let baseline_mean = mean(&volumes[i + 1 - span..i + 1 - recent]);
            Some(if baseline_mean > 0.0 {
                recent_mean / baseline_mean
            } else {
                1.0
            })
        })
        .collect()
}

// =============================================================================
// Price Position
// =============================================================================

/// Close relative to the trailing `window` high-low range, in percent.
///
/// 0 is the range low, 100 the range high. A range with no width is neutral 50.
pub fn price_position(closes: &[f64], highs: &[f64], lows: &[f64], window: usize) -> Vec<Option<f64>> {
    let len = closes.len().min(highs.len()).min(lows.len());
    let (mut max, mut min) = match (Maximum::new(window), Minimum::new(window)) {
        (Ok(max), Ok(min)) => (max, min),
        _ => return vec![None; len],
    };

    (0..len)
        .map(|i| {
            let high = max.next(highs[i]);
            let low = min.next(lows[i]);
            if i + 1 < window {
                return None;
            }
            Some(if high > low {
                ((closes[i] - low) / (high - low) * 100.0).clamp(0.0, 100.0)
            } else {
                50.0
            })
        })
        .collect()
}

// =============================================================================
// Adaptive Indicator Set
// =============================================================================

/// Shrink `canonical` to `len / divisor`, dropping the window when it falls below `floor`
pub fn adaptive_window(canonical: usize, len: usize, divisor: usize, floor: usize) -> Option<usize> {
    let window = canonical.min(len / divisor.max(1));
    (window >= floor.max(1)).then_some(window)
}

/// MACD spans after adaptation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MacdSpans {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

/// Windows actually used for each indicator; `None` means omitted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EffectiveWindows {
    pub ma_short: Option<usize>,
    pub ma_medium: Option<usize>,
    pub ma_long: Option<usize>,
    pub macd: Option<MacdSpans>,
    pub rsi: Option<usize>,
    pub bollinger: Option<usize>,
    pub volume: Option<(usize, usize)>,
    pub price_position: Option<usize>,
}

impl EffectiveWindows {
    /// Pick windows for a series of `len` bars
    pub fn for_length(len: usize, config: &IndicatorConfig) -> Self {
        let macd = if len >= config.macd_floor {
            let fast = adaptive_window(config.macd_fast, len, 2, 1);
            let slow = adaptive_window(config.macd_slow, len, 2, 1);
            let signal = adaptive_window(config.macd_signal, len, 3, 1);
            match (fast, slow, signal) {
                (Some(fast), Some(slow), Some(signal)) if fast < slow => {
                    Some(MacdSpans { fast, slow, signal })
                }
                _ => None,
            }
        } else {
            None
        };

        Self {
            ma_short: adaptive_window(
                config.ma_short,
                len,
                1,
                config.min_window.min(config.ma_short),
            ),
            ma_medium: adaptive_window(config.ma_medium, len, 3, config.min_window),
            ma_long: if len >= config.long_ma_floor {
                adaptive_window(config.ma_long, len, 2, config.min_window)
            } else {
                None
            },
            macd,
            rsi: (len >= config.rsi_floor).then_some(config.rsi_period),
            bollinger: adaptive_window(config.bollinger_period, len, 3, config.min_window),
            volume: (len >= config.volume_recent + config.volume_baseline)
                .then_some((config.volume_recent, config.volume_baseline)),
            price_position: adaptive_window(config.price_position_window, len, 1, 1),
        }
    }
}

/// Indicator columns aligned to a bar series
#[derive(Debug, Clone, Default)]
pub struct IndicatorSet {
    pub len: usize,
    pub ma_short: Vec<Option<f64>>,
    pub ma_medium: Vec<Option<f64>>,
    pub ma_long: Vec<Option<f64>>,
    pub ema_fast: Vec<Option<f64>>,
    pub ema_slow: Vec<Option<f64>>,
    pub macd_line: Vec<Option<f64>>,
    pub macd_signal: Vec<Option<f64>>,
    pub macd_histogram: Vec<Option<f64>>,
    pub rsi: Vec<Option<f64>>,
    pub bollinger_upper: Vec<Option<f64>>,
    pub bollinger_middle: Vec<Option<f64>>,
    pub bollinger_lower: Vec<Option<f64>>,
    pub volume_ratio: Vec<Option<f64>>,
    /// Percent position of the close in the recent high-low range
    pub price_position: Vec<Option<f64>>,
    pub windows: EffectiveWindows,
    /// History is shorter than the canonical length
    pub reduced_confidence: bool,
}

impl IndicatorSet {
    /// Compute every indicator the series is long enough to support
    pub fn compute(series: &BarSeries, config: &IndicatorConfig) -> Self {
        Self::from_columns(
            &series.closes(),
            &series.highs(),
            &series.lows(),
            &series.volumes(),
            config,
        )
    }

    /// Compute from raw price and volume columns of equal length
    pub fn from_columns(
        closes: &[f64],
        highs: &[f64],
        lows: &[f64],
        volumes: &[f64],
        config: &IndicatorConfig,
    ) -> Self {
        let len = closes
            .len()
            .min(highs.len())
            .min(lows.len())
            .min(volumes.len());
        let closes = &closes[..len];
        let highs = &highs[..len];
        let lows = &lows[..len];
        let volumes = &volumes[..len];

        if len == 0 {
            return Self {
                reduced_confidence: true,
                ..Self::default()
            };
        }

        let windows = EffectiveWindows::for_length(len, config);
        let omitted = || vec![None; len];
        let column = |w: Option<usize>| w.map_or_else(omitted, |w| sma(closes, w));

        let (ema_fast, ema_slow, macd_line, macd_signal, macd_histogram) = match windows.macd {
            Some(spans) => {
                let (line, signal, histogram) = macd(closes, spans.fast, spans.slow, spans.signal);
                (
                    ema(closes, spans.fast),
                    ema(closes, spans.slow),
                    line,
                    signal,
                    histogram,
                )
            }
            None => (omitted(), omitted(), omitted(), omitted(), omitted()),
        };

        let (bollinger_upper, bollinger_middle, bollinger_lower) = match windows.bollinger {
            Some(w) => bollinger_bands(closes, w, config.bollinger_std),
            None => (omitted(), omitted(), omitted()),
        };

        Self {
            len,
            ma_short: column(windows.ma_short),
            ma_medium: column(windows.ma_medium),
            ma_long: column(windows.ma_long),
            ema_fast,
            ema_slow,
            macd_line,
            macd_signal,
            macd_histogram,
            rsi: windows.rsi.map_or_else(omitted, |p| rsi(closes, p)),
            bollinger_upper,
            bollinger_middle,
            bollinger_lower,
            volume_ratio: windows
                .volume
                .map_or_else(omitted, |(r, b)| volume_ratio(volumes, r, b)),
            price_position: windows
                .price_position
                .map_or_else(omitted, |w| price_position(closes, highs, lows, w)),
            windows,
            reduced_confidence: len < config.canonical_history,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Value of a column at the most recent bar
    pub fn latest(column: &[Option<f64>]) -> Option<f64> {
        column.last().copied().flatten()
    }

    /// MACD golden cross on the most recent bar
    pub fn golden_cross_on_last(&self) -> bool {
        self.len >= 2 && is_golden_cross_at(&self.macd_line, &self.macd_signal, self.len - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&values, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert!((result[2].unwrap() - 2.0).abs() < 0.001);
        assert!((result[3].unwrap() - 3.0).abs() < 0.001);
        assert!((result[4].unwrap() - 4.0).abs() < 0.001);
    }

    #[test]
    fn test_ema_seeded_by_first_value() {
        let values = vec![10.0, 11.0, 12.0, 13.0];
        let result = ema(&values, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        // alpha = 0.5: 10 -> 10.5 -> 11.25 -> 12.125
        assert!((result[2].unwrap() - 11.25).abs() < 1e-12);
        assert!((result[3].unwrap() - 12.125).abs() < 1e-12);
    }

    #[test]
    fn test_ema_flat_input_is_exact() {
        let values = vec![123.456; 50];
        let result = ema(&values, 12);
        assert!(result.iter().flatten().all(|v| *v == 123.456));
    }

    #[test]
    fn test_macd_histogram_is_signal_minus_line() {
        let values: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0).collect();
        let (line, signal, histogram) = macd(&values, 12, 26, 9);

        assert_eq!(line[24], None);
        assert!(line[25].is_some());
        for i in 25..60 {
            let expected = signal[i].unwrap() - line[i].unwrap();
            assert!((histogram[i].unwrap() - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn test_golden_cross_detection() {
        let line = vec![None, Some(-1.0), Some(0.0), Some(1.0), Some(0.5), Some(2.0)];
        let signal = vec![None, Some(0.0), Some(0.0), Some(0.5), Some(1.0), Some(1.0)];

        // t=3: 0.0 <= 0.0 then 1.0 > 0.5; t=5: 0.5 <= 1.0 then 2.0 > 1.0
        assert_eq!(golden_crosses(&line, &signal), vec![3, 5]);
        assert!(is_golden_cross_at(&line, &signal, 3));
        assert!(!is_golden_cross_at(&line, &signal, 2));
        assert!(!is_golden_cross_at(&line, &signal, 1));
        assert!(!is_golden_cross_at(&line, &signal, 0));
        assert!(!is_golden_cross_at(&line, &signal, 99));
    }

    #[test]
    fn test_no_cross_when_line_stays_below() {
        let line: Vec<Option<f64>> = (0..30).map(|i| Some(i as f64)).collect();
        let signal: Vec<Option<f64>> = (0..30).map(|i| Some(i as f64 + 1.0)).collect();
        assert!(golden_crosses(&line, &signal).is_empty());
    }

    #[test]
    fn test_rsi_bounds_and_degenerate_windows() {
        let rising: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let rsi_up = rsi(&rising, 14);
        assert_eq!(rsi_up[13], None);
        assert_eq!(rsi_up[14], Some(100.0));

        let falling: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        assert_eq!(rsi(&falling, 14)[29], Some(0.0));

        let flat = vec![50.0; 30];
        assert_eq!(rsi(&flat, 14)[29], Some(50.0));

        let mixed = vec![
            44.0, 44.3, 44.1, 43.6, 44.3, 44.8, 45.1, 45.4, 45.8, 46.0, 45.9, 46.2, 45.6, 46.3,
            46.3, 46.0,
        ];
        let value = rsi(&mixed, 14)[15].unwrap();
        assert!((0.0..=100.0).contains(&value));
    }

    #[test]
    fn test_volume_ratio() {
        let mut volumes = vec![100.0; 10];
        volumes.extend(vec![200.0; 10]);
        let ratio = volume_ratio(&volumes, 10, 10);
        assert_eq!(ratio[18], None);
        assert!((ratio[19].unwrap() - 2.0).abs() < 1e-12);

        let zeros = vec![0.0; 20];
        assert_eq!(volume_ratio(&zeros, 10, 10)[19], Some(1.0));
    }

    #[test]
    fn test_bollinger_bands_order() {
        let values = vec![1.0, 2.0, 3.0, 2.0, 1.0, 2.0, 3.0];
        let (upper, middle, lower) = bollinger_bands(&values, 5, 2.0);
        assert_eq!(upper[3], None);
        assert!(upper[4].unwrap() > middle[4].unwrap());
        assert!(middle[4].unwrap() > lower[4].unwrap());
    }

    #[test]
    fn test_adaptive_windows_short_history() {
        let config = IndicatorConfig::default();

        let w = EffectiveWindows::for_length(15, &config);
        assert_eq!(w.ma_short, Some(5));
        assert_eq!(w.ma_medium, Some(5));
        assert_eq!(w.ma_long, None);
        assert_eq!(w.macd, None);
        assert_eq!(w.rsi, Some(14));
        assert_eq!(w.volume, None);

        let w = EffectiveWindows::for_length(40, &config);
        assert_eq!(w.ma_medium, Some(13));
        assert_eq!(w.ma_long, Some(20));
        assert_eq!(
            w.macd,
            Some(MacdSpans {
                fast: 12,
                slow: 20,
                signal: 9
            })
        );

        let w = EffectiveWindows::for_length(200, &config);
        assert_eq!(w.ma_medium, Some(20));
        assert_eq!(w.ma_long, Some(60));
        assert_eq!(
            w.macd,
            Some(MacdSpans {
                fast: 12,
                slow: 26,
                signal: 9
            })
        );
    }

    #[test]
    fn test_compute_empty_and_short() {
        let config = IndicatorConfig::default();
        let empty = IndicatorSet::from_columns(&[], &[], &[], &[], &config);
        assert!(empty.is_empty());
        assert!(empty.reduced_confidence);
        assert!(!empty.golden_cross_on_last());

        let closes: Vec<f64> = (0..12).map(|i| 10.0 + i as f64).collect();
        let highs: Vec<f64> = closes.iter().map(|c| c + 0.5).collect();
        let lows: Vec<f64> = closes.iter().map(|c| c - 0.5).collect();
        let volumes = vec![1000.0; 12];
        let set = IndicatorSet::from_columns(&closes, &highs, &lows, &volumes, &config);
        assert_eq!(set.len(), 12);
        assert!(set.reduced_confidence);
        assert!(set.macd_line.iter().all(Option::is_none));
        assert!(set.volume_ratio.iter().all(Option::is_none));
        assert_eq!(set.ma_short.len(), 12);
        assert!(IndicatorSet::latest(&set.ma_short).is_some());
        assert_eq!(set.windows.price_position, Some(12));
        // range 9.5..21.5, close 21
        let position = IndicatorSet::latest(&set.price_position).unwrap();
        assert!((position - 11.5 / 12.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_price_position() {
        let closes = vec![10.0, 12.0, 11.0, 14.0];
        let highs = vec![10.5, 12.5, 11.5, 14.0];
        let lows = vec![9.5, 11.5, 10.5, 13.5];
        let result = price_position(&closes, &highs, &lows, 3);

        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        // window 9.5..12.5, close 11
        assert!((result[2].unwrap() - 50.0).abs() < 1e-9);
        // window 10.5..14.0, close at the high
        assert!((result[3].unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_price_position_flat_range_is_neutral() {
        let flat = vec![5.0; 6];
        let result = price_position(&flat, &flat, &flat, 4);
        assert_eq!(result[3], Some(50.0));
        assert_eq!(result[5], Some(50.0));
        assert!(price_position(&flat, &flat, &flat, 0).iter().all(Option::is_none));
    }
}
