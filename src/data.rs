//! Market data access
//!
//! The scanner talks to market data through [`BarSource`], a narrow blocking
//! contract: given a symbol and a date range, return daily bars or a
//! [`SourceError`]. Two implementations ship with the crate: a directory of
//! per-symbol CSV files and an in-memory map used by tests and benchmarks.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::{Bar, Symbol};

// =============================================================================
// Request Types
// =============================================================================

/// Bar frequency; only daily bars are scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    Daily,
}

/// Price adjustment for corporate actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustMode {
    #[default]
    None,
    Forward,
    Backward,
}

impl std::str::FromStr for AdjustMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(AdjustMode::None),
            "forward" | "qfq" => Ok(AdjustMode::Forward),
            "backward" | "hfq" => Ok(AdjustMode::Backward),
            _ => Err(format!(
                "Unknown adjust mode: {}. Use 'none', 'forward' or 'backward'",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarRequest {
    pub symbol: Symbol,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub frequency: Frequency,
    pub adjust: AdjustMode,
}

impl BarRequest {
    /// Daily bars for the `lookback_days` calendar days ending at `end`
    pub fn daily(symbol: Symbol, end: NaiveDate, lookback_days: i64, adjust: AdjustMode) -> Self {
        Self {
            symbol,
            start: end - chrono::Duration::days(lookback_days.max(0)),
            end,
            frequency: Frequency::Daily,
            adjust,
        }
    }

    fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

// =============================================================================
// Source Trait
// =============================================================================

/// Blocking market-data collaborator
///
/// `fetch` runs on a blocking thread under the scan's fetch timeout. The
/// timeout only stops waiting: the call keeps its thread until it returns,
/// and the request is not retried while it does. Implementations should bound
/// their own I/O (socket or read timeouts) near the configured fetch timeout.
pub trait BarSource: Send + Sync {
    fn name(&self) -> &str;

    /// Check that the source can be reached at all
    fn probe(&self) -> Result<(), SourceError> {
        Ok(())
    }

    /// Fetch bars for the request. An empty result is reported as `NoData`.
    fn fetch(&self, request: &BarRequest) -> Result<Vec<Bar>, SourceError>;
}

// =============================================================================
// CSV Directory Source
// =============================================================================

/// Reads `<data_dir>/<symbol>.csv` files with columns
/// `date,open,high,low,close,volume[,turnover,pct_change]`
#[derive(Debug, Clone)]
pub struct CsvBarSource {
    data_dir: PathBuf,
}

impl CsvBarSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn path_for(&self, symbol: &Symbol) -> PathBuf {
        self.data_dir.join(format!("{}.csv", symbol.as_str()))
    }
}

impl BarSource for CsvBarSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn probe(&self) -> Result<(), SourceError> {
        if self.data_dir.is_dir() {
            Ok(())
        } else {
            Err(SourceError::Unreachable(format!(
                "data directory {} does not exist",
                self.data_dir.display()
            )))
        }
    }

    fn fetch(&self, request: &BarRequest) -> Result<Vec<Bar>, SourceError> {
        let path = self.path_for(&request.symbol);
        if !path.exists() {
            debug!("No data file for {} at {}", request.symbol, path.display());
            return Err(SourceError::NoData {
                symbol: request.symbol.to_string(),
            });
        }

        let bars = load_csv(&path).map_err(|e| SourceError::Malformed {
            symbol: request.symbol.to_string(),
            reason: format!("{:#}", e),
        })?;

        let bars: Vec<Bar> = bars.into_iter().filter(|b| request.contains(b.date)).collect();
        if bars.is_empty() {
            return Err(SourceError::NoData {
                symbol: request.symbol.to_string(),
            });
        }
        Ok(bars)
    }
}

// =============================================================================
// In-Memory Source
// =============================================================================

/// Serves preloaded bars; used by tests, benchmarks and the `score` command
#[derive(Debug, Clone, Default)]
pub struct MemoryBarSource {
    bars: HashMap<Symbol, Vec<Bar>>,
}

impl MemoryBarSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: Symbol, bars: Vec<Bar>) {
        self.bars.insert(symbol, bars);
    }

    pub fn with_bars(mut self, symbol: impl AsRef<str>, bars: Vec<Bar>) -> Self {
        self.insert(Symbol::new(symbol), bars);
        self
    }
}

impl BarSource for MemoryBarSource {
    fn name(&self) -> &str {
        "memory"
    }

    fn fetch(&self, request: &BarRequest) -> Result<Vec<Bar>, SourceError> {
        let bars: Vec<Bar> = self
            .bars
            .get(&request.symbol)
            .map(|bars| {
                bars.iter()
                    .filter(|b| request.contains(b.date))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if bars.is_empty() {
            Err(SourceError::NoData {
                symbol: request.symbol.to_string(),
            })
        } else {
            Ok(bars)
        }
    }
}

// =============================================================================
// CSV Data Loading
// =============================================================================

fn parse_optional(field: Option<&str>) -> Option<f64> {
    field
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

/// Load daily bars from a CSV file, skipping rows that fail validation
pub fn load_csv(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path).context("Failed to open CSV file")?;

    let mut bars = Vec::new();
    let mut invalid_count = 0;

    for (row_idx, result) in reader.records().enumerate() {
        let record = result.context(format!("Failed to read row {}", row_idx + 1))?;

        let date_str = record.get(0).context("Missing date column")?;
        let date = parse_date(date_str)?;

        let column = |idx: usize, name: &str| -> Result<f64> {
            record
                .get(idx)
                .with_context(|| format!("Missing {} column", name))?
                .trim()
                .parse::<f64>()
                .with_context(|| format!("Failed to parse {} at row {}", name, row_idx + 1))
        };
        let open = column(1, "open")?;
        let high = column(2, "high")?;
        let low = column(3, "low")?;
        let close = column(4, "close")?;
        let volume = column(5, "volume")?;

        match Bar::new(date, open, high, low, close, volume) {
            Ok(bar) => bars.push(
                bar.with_turnover(parse_optional(record.get(6)))
                    .with_pct_change(parse_optional(record.get(7))),
            ),
            Err(e) => {
                invalid_count += 1;
                warn!(
                    "Skipping invalid bar at row {} in {:?}: {}",
                    row_idx + 2, // +2 for 1-indexed and header row
                    path.file_name().unwrap_or_default(),
                    e
                );
            }
        }
    }

    if invalid_count > 0 {
        warn!(
            "Skipped {} invalid bars out of {} in {:?}",
            invalid_count,
            invalid_count + bars.len(),
            path.file_name().unwrap_or_default()
        );
    }

    Ok(bars)
}

/// Parse a date string (YYYY-MM-DD, YYYY-MM-DD HH:MM:SS or YYYYMMDD)
pub fn parse_date(date_str: &str) -> Result<NaiveDate> {
    let date_str = date_str.trim();

    if let Ok(nd) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
        return Ok(nd);
    }

    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(date_str, "%Y-%m-%d %H:%M:%S") {
        return Ok(ndt.date());
    }

    if let Ok(nd) = NaiveDate::parse_from_str(date_str, "%Y%m%d") {
        return Ok(nd);
    }

    anyhow::bail!(
        "Failed to parse date: {}. Use YYYY-MM-DD or YYYY-MM-DD HH:MM:SS format",
        date_str
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("breakout_scanner_{}_{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(parse_date("2024-03-15").unwrap(), expected);
        assert_eq!(parse_date("2024-03-15 00:00:00").unwrap(), expected);
        assert_eq!(parse_date("20240315").unwrap(), expected);
        assert!(parse_date("15/03/2024").is_err());
    }

    #[test]
    fn test_adjust_mode_from_str() {
        assert_eq!("qfq".parse::<AdjustMode>().unwrap(), AdjustMode::Forward);
        assert_eq!("None".parse::<AdjustMode>().unwrap(), AdjustMode::None);
        assert!("sideways".parse::<AdjustMode>().is_err());
    }

    #[test]
    fn test_csv_source_filters_and_skips_invalid() {
        let dir = temp_dir("csv_source");
        let mut file = std::fs::File::create(dir.join("sh.512480.csv")).unwrap();
        writeln!(file, "date,open,high,low,close,volume,turnover,pct_change").unwrap();
        writeln!(file, "2024-01-02,1.0,1.1,0.9,1.05,1000,0.5,").unwrap();
        writeln!(file, "2024-01-03,1.05,1.0,1.2,1.1,1000,,").unwrap(); // high < low
        writeln!(file, "2024-01-04,1.1,1.2,1.0,1.15,1200,0.7,4.5").unwrap();
        writeln!(file, "2024-02-01,1.1,1.2,1.0,1.15,1200,,").unwrap();
        drop(file);

        let source = CsvBarSource::new(&dir);
        assert!(source.probe().is_ok());

        let request = BarRequest {
            symbol: Symbol::new("sh.512480"),
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            frequency: Frequency::Daily,
            adjust: AdjustMode::None,
        };
        let bars = source.fetch(&request).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].turnover, Some(0.5));
        assert_eq!(bars[0].pct_change, None);
        assert_eq!(bars[1].pct_change, Some(4.5));

        let missing = BarRequest {
            symbol: Symbol::new("sh.000000"),
            ..request
        };
        assert!(matches!(source.fetch(&missing), Err(SourceError::NoData { .. })));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_csv_source_unreachable_dir() {
        let source = CsvBarSource::new("/nonexistent/breakout/data");
        assert!(matches!(source.probe(), Err(SourceError::Unreachable(_))));
    }

    #[test]
    fn test_memory_source_range() {
        let d = |n| NaiveDate::from_ymd_opt(2024, 1, n).unwrap();
        let source = MemoryBarSource::new().with_bars(
            "sz.159805",
            (1..=10)
                .map(|n| Bar::new_unchecked(d(n), 1.0, 1.0, 1.0, 1.0, 1.0))
                .collect(),
        );
        let request = BarRequest::daily(Symbol::new("sz.159805"), d(10), 4, AdjustMode::None);
        assert_eq!(source.fetch(&request).unwrap().len(), 5);
    }
}
