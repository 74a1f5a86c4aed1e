//! Circuit breaker guarding the market-data source
//!
//! A scan issues one request per instrument. When the source itself is down,
//! every request would otherwise burn its full retry budget; the breaker
//! counts consecutive transport failures and, past the threshold, rejects
//! further requests until a cooldown has passed.
//!
//! States:
//! - Closed: requests pass through
//! - Open: requests are rejected until the cooldown elapses
//! - HalfOpen: trial requests decide whether to close or reopen

use std::time::Duration;
use tokio::time::Instant;

use crate::config::ScanConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Consecutive HalfOpen successes before closing
    pub success_threshold: u32,
    /// Time spent Open before trial requests are allowed
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn from_scan_config(scan: &ScanConfig) -> Self {
        Self::default().with_failure_threshold(scan.circuit_breaker_threshold)
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Consecutive-failure circuit breaker
///
/// # Example
///
/// ```
/// use breakout_scanner::common::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
///
/// let mut cb = CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_threshold(2));
/// assert!(cb.can_attempt());
///
/// cb.record_failure();
/// cb.record_failure();
/// assert_eq!(cb.state(), CircuitState::Open);
/// assert!(!cb.can_attempt());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    config: CircuitBreakerConfig,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            config,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Whether a request may be sent now. Moves Open to HalfOpen once the cooldown has passed.
    pub fn can_attempt(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = self
                    .opened_at
                    .map_or(true, |opened| opened.elapsed() >= self.config.cooldown);
                if cooled {
                    tracing::info!("Data source circuit half-open, allowing trial request");
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                }
                cooled
            }
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => self.failure_count = 0,
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    tracing::info!("Data source circuit closed after recovery");
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        "Data source circuit opened after {} consecutive failures",
                        self.failure_count
                    );
                    self.open();
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!("Trial request failed, data source circuit re-opened");
                self.open();
            }
            CircuitState::Open => {}
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.success_count = 0;
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }
}
