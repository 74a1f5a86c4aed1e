//! Integration tests for the breakout scanner
//!
//! These tests verify that all components work together correctly.

use approx::assert_relative_eq;
use chrono::{Duration, NaiveDate};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use breakout_scanner::config::{InstrumentEntry, UniverseConfig};
use breakout_scanner::data::BarRequest;
use breakout_scanner::ranking::UniverseResult;
use breakout_scanner::scanner::evaluate_series;
use breakout_scanner::scoring::AnalysisDetail;
use breakout_scanner::{
    classify, AnalysisMode, Bar, BarSeries, BarSource, BreakoutScorer, Config, CsvBarSource,
    Instrument, InstrumentClass, MemoryBarSource, RankedResultSet, ScanError, Scanner,
    SectorCategory, SourceError, Strength, Symbol,
};

// =============================================================================
// Test Utilities
// =============================================================================

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 28).unwrap()
}

/// Bars ending at `as_of()` with open = close and a 1% high/low band
fn generate_bars(closes: &[f64], volumes: &[f64]) -> Vec<Bar> {
    let start = as_of() - Duration::days(closes.len() as i64 - 1);
    closes
        .iter()
        .zip(volumes)
        .enumerate()
        .map(|(i, (&c, &v))| {
            Bar::new(start + Duration::days(i as i64), c, c * 1.01, c * 0.99, c, v).unwrap()
        })
        .collect()
}

/// 199 bars sliding 0.2 per day from 100, then a jump to 66
fn breakout_closes() -> Vec<f64> {
    let mut closes: Vec<f64> = (0..199).map(|t| 100.0 - 0.2 * t as f64).collect();
    closes.push(66.0);
    closes
}

/// Flat volume with the last five bars doubled
fn surging_volumes(len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| if i + 5 >= len { 2000.0 } else { 1000.0 })
        .collect()
}

fn assess(closes: &[f64], volumes: &[f64]) -> breakout_scanner::BreakoutAssessment {
    let config = Config::default();
    let instrument = Instrument::new("sh.512480", "半导体ETF", InstrumentClass::Fund);
    let series = BarSeries::new(instrument.symbol.clone(), generate_bars(closes, volumes)).unwrap();
    let scorer = BreakoutScorer::from_config(&config);
    evaluate_series(&instrument, &series, &config.indicators, &scorer).unwrap()
}

fn universe(name: &str, class: InstrumentClass, entries: &[(&str, &str)]) -> UniverseConfig {
    UniverseConfig {
        name: name.to_string(),
        class,
        candidate_limit: None,
        instruments: entries
            .iter()
            .map(|(symbol, name)| InstrumentEntry {
                symbol: symbol.to_string(),
                name: name.to_string(),
            })
            .collect(),
    }
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.scan.retry_backoff_ms = 1;
    config.scan.max_concurrency = 4;
    config
}

// =============================================================================
// Scoring Scenarios
// =============================================================================

#[test]
fn test_full_breakout_is_strong_and_confirmed() {
    let closes = breakout_closes();
    let assessment = assess(&closes, &surging_volumes(closes.len()));

    let AnalysisDetail::Full(signals) = &assessment.detail else {
        panic!("expected full analysis");
    };
    assert_relative_eq!(signals.volume_ratio, 1.5, epsilon = 1e-9);
    assert!(signals.drawdown > 0.25 && signals.drawdown < 0.30);
    assert!(signals.price_break_ma);
    assert!(signals.price_break_high);
    assert!(signals.macd_golden_cross);
    assert!(signals.rsi_recovery);

    assert!(assessment.fully_confirmed);
    assert_eq!(assessment.conditions.count(), 4);
    assert_relative_eq!(assessment.raw_score, 10.0);
    assert_relative_eq!(assessment.score, 10.0);
    assert_eq!(assessment.strength, Strength::Strong);
    assert_eq!(assessment.mode(), AnalysisMode::Full);
    assert!(!assessment.reduced_confidence);
}

#[test]
fn test_three_of_four_conditions_is_not_confirmed() {
    let closes = breakout_closes();
    let assessment = assess(&closes, &vec![1000.0; closes.len()]);

    assert!(!assessment.conditions.volume_surge);
    assert_eq!(assessment.conditions.count(), 3);
    assert!(!assessment.fully_confirmed);
    assert_relative_eq!(assessment.score, 9.0);
    assert_eq!(assessment.strength, Strength::Strong);
}

#[test]
fn test_short_history_uses_basic_mode_with_discount() {
    let closes: Vec<f64> = (0..15).map(|t| 10.0 + 0.1 * t as f64).collect();
    let volumes: Vec<f64> = (0..15).map(|t| if t >= 10 { 3000.0 } else { 1000.0 }).collect();
    let assessment = assess(&closes, &volumes);

    assert_eq!(assessment.mode(), AnalysisMode::Basic);
    assert!(assessment.reduced_confidence);
    assert!(!assessment.fully_confirmed);
    assert_relative_eq!(assessment.confidence, 0.5);
    assert_relative_eq!(assessment.raw_score, 5.0);
    assert_relative_eq!(assessment.score, 2.5);
    assert_eq!(assessment.strength, Strength::None);
}

#[test]
fn test_short_tail_scores_at_most_half_of_full_history() {
    let closes: Vec<f64> = (0..80).map(|t| 10.0 + 0.1 * t as f64).collect();
    let volumes: Vec<f64> = (0..80)
        .map(|t| match t {
            70..=74 => 1000.0,
            75.. => 3000.0,
            _ => 2000.0,
        })
        .collect();
    let parent = assess(&closes, &volumes);
    let tail = assess(&closes[65..], &volumes[65..]);

    assert_eq!(parent.mode(), AnalysisMode::Full);
    assert_eq!(tail.mode(), AnalysisMode::Basic);
    assert!(parent.score >= 5.0);
    assert!(tail.score > 0.0);
    assert!(tail.score <= parent.score * 0.5);

    // rising closes sit in the upper half of the recent range
    assert!(parent.price_position().unwrap() > 50.0);
    assert!(tail.price_position().unwrap() > 50.0);
}

#[test]
fn test_flat_series_scores_zero() {
    let assessment = assess(&vec![100.0; 120], &vec![1000.0; 120]);

    assert_relative_eq!(assessment.score, 0.0);
    assert_eq!(assessment.strength, Strength::None);
    assert_relative_eq!(assessment.drawdown_pct(), 0.0);
    assert_relative_eq!(assessment.volume_ratio(), 1.0);
    assert!(!assessment.fully_confirmed);
}

// =============================================================================
// Classification & Ranking
// =============================================================================

#[test]
fn test_classification_of_configured_names() {
    assert_eq!(classify("半导体ETF"), SectorCategory::Semiconductors);
    assert_eq!(classify("医疗ETF"), SectorCategory::Healthcare);
    assert_eq!(classify("新能源ETF"), SectorCategory::NewEnergy);
    assert_eq!(classify("上证能源"), SectorCategory::Cyclical);
    assert_eq!(classify("上证50"), SectorCategory::Other);
}

#[test]
fn test_merge_keeps_best_score_per_symbol() {
    let closes = breakout_closes();
    let strong = assess(&closes, &surging_volumes(closes.len()));
    let flat = assess(&vec![100.0; 120], &vec![1000.0; 120]);

    let index = UniverseResult::new("industry_index", InstrumentClass::Index)
        .with_assessments(vec![flat.clone()]);
    let fund = UniverseResult::new("industry_etf", InstrumentClass::Fund)
        .with_assessments(vec![strong.clone()]);

    let merged = RankedResultSet::merge(&[index, fund]);
    assert_eq!(merged.len(), 1);
    let record = merged.get("sh.512480").unwrap();
    assert_relative_eq!(record.score, 10.0);
    assert_eq!(record.universe, "industry_etf");
    assert_eq!(record.rank, 1);
}

// =============================================================================
// Batch Scans
// =============================================================================

/// Fails every request with a transport error
struct DownSource {
    calls: AtomicUsize,
}

impl BarSource for DownSource {
    fn name(&self) -> &str {
        "down"
    }

    fn fetch(&self, _request: &BarRequest) -> Result<Vec<Bar>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SourceError::Transport("connection refused".to_string()))
    }
}

struct UnreachableSource;

impl BarSource for UnreachableSource {
    fn name(&self) -> &str {
        "unreachable"
    }

    fn probe(&self) -> Result<(), SourceError> {
        Err(SourceError::Unreachable("login failed".to_string()))
    }

    fn fetch(&self, _request: &BarRequest) -> Result<Vec<Bar>, SourceError> {
        unreachable!("probe failed")
    }
}

/// Blocks longer than the batch deadline
struct SlowSource;

impl BarSource for SlowSource {
    fn name(&self) -> &str {
        "slow"
    }

    fn fetch(&self, _request: &BarRequest) -> Result<Vec<Bar>, SourceError> {
        std::thread::sleep(std::time::Duration::from_secs(2));
        Err(SourceError::NoData {
            symbol: "late".to_string(),
        })
    }
}

#[tokio::test]
async fn test_scan_ranks_and_skips_missing_data() {
    let closes = breakout_closes();
    let source = MemoryBarSource::new()
        .with_bars("sh.512480", generate_bars(&closes, &surging_volumes(closes.len())))
        .with_bars("sh.512170", generate_bars(&vec![1.0; 120], &vec![1000.0; 120]));

    let universes = vec![universe(
        "industry_etf",
        InstrumentClass::Fund,
        &[("sh.512480", "半导体ETF"), ("sh.512170", "医疗ETF"), ("sh.512690", "酒ETF")],
    )];
    let scanner = Scanner::new(Arc::new(source), fast_config());
    let report = scanner.scan(&universes, as_of()).await.unwrap();

    assert_eq!(report.requested, 3);
    assert_eq!(report.scored, 2);
    assert!(!report.incomplete);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].symbol, "sh.512690");

    assert_eq!(report.top[0].symbol, "sh.512480");
    assert_eq!(report.top[0].category, SectorCategory::Semiconductors);
    assert_eq!(report.fully_confirmed.len(), 1);

    let total: usize = report.categories.iter().map(|g| g.count).sum();
    assert_eq!(total, report.scored);
}

#[tokio::test]
async fn test_candidate_limit_truncates_universe() {
    let source = MemoryBarSource::new()
        .with_bars("sh.000008", generate_bars(&vec![1.0; 60], &vec![1.0; 60]))
        .with_bars("sh.000009", generate_bars(&vec![1.0; 60], &vec![1.0; 60]));
    let mut index = universe(
        "industry_index",
        InstrumentClass::Index,
        &[("sh.000008", "上证材料"), ("sh.000009", "上证工业")],
    );
    index.candidate_limit = Some(1);

    let scanner = Scanner::new(Arc::new(source), fast_config());
    let report = scanner.scan(&[index], as_of()).await.unwrap();
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results.records()[0].symbol, "sh.000008");
}

#[tokio::test]
async fn test_open_circuit_fails_batch_with_partial_report() {
    let mut config = fast_config();
    config.scan.max_retries = 0;
    config.scan.max_concurrency = 1;
    config.scan.circuit_breaker_threshold = 2;

    let entries: Vec<(String, String)> = (0..5)
        .map(|i| (format!("sh.51200{}", i), format!("ETF{}", i)))
        .collect();
    let refs: Vec<(&str, &str)> = entries.iter().map(|(s, n)| (s.as_str(), n.as_str())).collect();
    let universes = vec![universe("industry_etf", InstrumentClass::Fund, &refs)];

    let source = Arc::new(DownSource {
        calls: AtomicUsize::new(0),
    });
    let scanner = Scanner::new(source.clone(), config);

    let err = scanner.scan(&universes, as_of()).await.unwrap_err();
    let ScanError::SourceUnavailable { reason, partial } = err;
    assert!(reason.contains("circuit"));
    assert_eq!(partial.requested, 5);
    assert_eq!(partial.skipped.len(), 5);
    assert_eq!(source.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unreachable_source_fails_before_fetching() {
    let universes = vec![universe("industry_etf", InstrumentClass::Fund, &[("sh.512480", "半导体ETF")])];
    let scanner = Scanner::new(Arc::new(UnreachableSource), fast_config());

    let err = scanner.scan(&universes, as_of()).await.unwrap_err();
    let partial = err.into_partial();
    assert_eq!(partial.requested, 1);
    assert!(partial.results.is_empty());
}

#[tokio::test]
async fn test_batch_deadline_marks_report_incomplete() {
    let mut config = fast_config();
    config.scan.batch_timeout_secs = 1;
    config.scan.fetch_timeout_secs = 10;
    let universes = vec![universe("industry_etf", InstrumentClass::Fund, &[("sh.512480", "半导体ETF")])];

    let scanner = Scanner::new(Arc::new(SlowSource), config);
    let report = scanner.scan(&universes, as_of()).await.unwrap();
    assert!(report.incomplete);
    assert_eq!(report.scored, 0);
    assert_eq!(report.skipped.len(), 1);
}

// =============================================================================
// CSV End-to-End
// =============================================================================

#[tokio::test]
async fn test_csv_directory_scan() {
    let dir = std::env::temp_dir().join(format!("breakout_scanner_it_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let closes = breakout_closes();
    let bars = generate_bars(&closes, &surging_volumes(closes.len()));
    let mut csv = String::from("date,open,high,low,close,volume\n");
    for bar in &bars {
        csv.push_str(&format!(
            "{},{},{},{},{},{}\n",
            bar.date, bar.open, bar.high, bar.low, bar.close, bar.volume
        ));
    }
    std::fs::write(dir.join("sh.512480.csv"), csv).unwrap();

    let universes = vec![universe(
        "industry_etf",
        InstrumentClass::Fund,
        &[("sh.512480", "半导体ETF"), ("sh.512170", "医疗ETF")],
    )];
    let scanner = Scanner::new(Arc::new(CsvBarSource::new(&dir)), fast_config());
    let report = scanner.scan(&universes, as_of()).await.unwrap();

    assert_eq!(report.scored, 1);
    assert_eq!(report.top[0].symbol, Symbol::new("sh.512480").as_str());
    assert_eq!(report.top[0].strength, Strength::Strong);
    assert_eq!(report.skipped[0].symbol, "sh.512170");

    std::fs::remove_dir_all(&dir).ok();
}
