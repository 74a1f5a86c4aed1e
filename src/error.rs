//! Error types for the data collaborator and batch scans

use thiserror::Error;

use crate::ranking::ScanReport;

/// Failure reported by a market-data source for a single request
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// The source answered but has no bars for the instrument and range
    #[error("no data for {symbol}")]
    NoData { symbol: String },

    #[error("request for {symbol} timed out after {secs}s")]
    Timeout { symbol: String, secs: u64 },

    /// The source returned data that could not be parsed
    #[error("malformed data for {symbol}: {reason}")]
    Malformed { symbol: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    /// The source cannot be reached or resolved at all
    #[error("data source unreachable: {0}")]
    Unreachable(String),

    #[error("circuit breaker is open, rejecting request for {symbol}")]
    CircuitOpen { symbol: String },
}

impl SourceError {
    /// Whether repeating the same request could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::Timeout { .. } | SourceError::Transport(_))
    }
}

/// Batch-level fault; per-instrument failures never surface here
#[derive(Debug, Error)]
pub enum ScanError {
    /// The data source became unusable; whatever finished is still ranked
    #[error("data source unavailable: {reason}")]
    SourceUnavailable {
        reason: String,
        partial: Box<ScanReport>,
    },
}

impl ScanError {
    /// Results that completed before the fault
    pub fn partial(&self) -> &ScanReport {
        match self {
            ScanError::SourceUnavailable { partial, .. } => partial,
        }
    }

    pub fn into_partial(self) -> ScanReport {
        match self {
            ScanError::SourceUnavailable { partial, .. } => *partial,
        }
    }
}
