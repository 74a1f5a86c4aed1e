//! Breakout Scanner
//!
//! Technical breakout detection for daily bar series: adaptive indicators,
//! a weighted four-condition breakout score, keyword sector classification,
//! and cross-universe ranking of the results.

pub mod classify;
pub mod common;
pub mod config;
pub mod data;
pub mod enrichment;
pub mod error;
pub mod indicators;
pub mod ranking;
pub mod scanner;
pub mod scoring;
pub mod types;

pub use classify::{classify, SectorCategory};
pub use config::Config;
pub use data::{BarSource, CsvBarSource, MemoryBarSource};
pub use error::{ScanError, SourceError};
pub use indicators::IndicatorSet;
pub use ranking::{RankedRecord, RankedResultSet, ScanReport};
pub use scanner::Scanner;
pub use scoring::{AnalysisMode, BreakoutAssessment, BreakoutScorer, Strength};
pub use types::*;
