//! Batch scan orchestration
//!
//! A scan runs in three phases:
//! 1. Fetch: one request per instrument on tokio tasks, bounded by a
//!    semaphore, each attempt under a timeout and retried with exponential
//!    backoff. A circuit breaker stops hammering a source that is down.
//! 2. Evaluate: indicators and scoring for every fetched series, in
//!    parallel with rayon.
//! 3. Rank: once every evaluation has finished, merge universes, apply the
//!    optional news bonus and build the report.
//!
//! A failing instrument is logged and recorded as skipped; only a source that
//! is unreachable or trips the breaker fails the batch, and even then the
//! partial report is returned inside the error.

use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::common::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::{Config, IndicatorConfig, ScanConfig, UniverseConfig};
use crate::data::{BarRequest, BarSource};
use crate::enrichment::{enrich, NewsSource};
use crate::error::{ScanError, SourceError};
use crate::indicators::IndicatorSet;
use crate::ranking::{RankedResultSet, ScanReport, SkippedInstrument, UniverseResult};
use crate::scoring::{BreakoutAssessment, BreakoutScorer};
use crate::{Bar, BarSeries, Instrument};

// =============================================================================
// Retry
// =============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub fetch_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_scan_config(scan: &ScanConfig) -> Self {
        Self {
            max_retries: scan.max_retries,
            backoff: Duration::from_millis(scan.retry_backoff_ms),
            fetch_timeout: Duration::from_secs(scan.fetch_timeout_secs),
        }
    }

    /// Delay before retry number `attempt` (1-based): backoff, 2x, 4x, ...
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Fetch bars for one request with timeout, bounded retries and the circuit breaker.
///
/// Only timeouts and transport errors are retried. `NoData` and malformed
/// responses prove the source is reachable and are returned immediately.
///
/// A timed-out fetch cannot be cancelled and keeps its blocking thread until
/// the source returns. No further attempt is started while it is still
/// running, so one request holds at most one blocking thread.
pub async fn fetch_with_retry(
    source: Arc<dyn BarSource>,
    request: BarRequest,
    policy: &RetryPolicy,
    breaker: &Mutex<CircuitBreaker>,
) -> Result<Vec<Bar>, SourceError> {
    let symbol = request.symbol.to_string();
    let mut last_error = None;
    let mut stalled: Option<JoinHandle<Result<Vec<Bar>, SourceError>>> = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay(attempt);
            debug!("Retrying {} after {}ms", symbol, delay.as_millis());
            sleep(delay).await;
        }

        if stalled.as_ref().is_some_and(|task| !task.is_finished()) {
            warn!(
                "Timed-out fetch for {} is still running, giving up after attempt {}",
                symbol, attempt
            );
            break;
        }

        if !breaker.lock().await.can_attempt() {
            return Err(SourceError::CircuitOpen { symbol });
        }

        let task_source = Arc::clone(&source);
        let task_request = request.clone();
        let mut fetch = tokio::task::spawn_blocking(move || task_source.fetch(&task_request));

        let waited = timeout(policy.fetch_timeout, &mut fetch).await;
        let outcome = match waited {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(SourceError::Transport(format!(
                "fetch task failed: {}",
                join_err
            ))),
            Err(_) => {
                stalled = Some(fetch);
                Err(SourceError::Timeout {
                    symbol: symbol.clone(),
                    secs: policy.fetch_timeout.as_secs(),
                })
            }
        };

        match outcome {
            Ok(bars) => {
                breaker.lock().await.record_success();
                return Ok(bars);
            }
            Err(e) if e.is_retryable() => {
                breaker.lock().await.record_failure();
                warn!(
                    "Request for {} failed (attempt {}/{}): {}",
                    symbol,
                    attempt + 1,
                    policy.max_retries + 1,
                    e
                );
                last_error = Some(e);
            }
            Err(e) => {
                breaker.lock().await.record_success();
                return Err(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| SourceError::Transport("retries exhausted".to_string())))
}

// =============================================================================
// Evaluation
// =============================================================================

/// Compute indicators and score one series
pub fn evaluate_series(
    instrument: &Instrument,
    series: &BarSeries,
    indicator_config: &IndicatorConfig,
    scorer: &BreakoutScorer,
) -> Option<BreakoutAssessment> {
    let indicators = IndicatorSet::compute(series, indicator_config);
    scorer.assess(instrument, series, &indicators)
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█░ "),
    );
    pb
}

// =============================================================================
// Scanner
// =============================================================================

struct Job {
    universe: usize,
    instrument: Instrument,
}

/// Runs batch scans against a market-data source
pub struct Scanner {
    source: Arc<dyn BarSource>,
    news: Option<Arc<dyn NewsSource>>,
    config: Config,
    scorer: BreakoutScorer,
    show_progress: bool,
}

impl Scanner {
    pub fn new(source: Arc<dyn BarSource>, config: Config) -> Self {
        let scorer = BreakoutScorer::from_config(&config);
        Self {
            source,
            news: None,
            config,
            scorer,
            show_progress: false,
        }
    }

    pub fn with_news(mut self, news: Option<Arc<dyn NewsSource>>) -> Self {
        self.news = news;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Scan every configured universe as of `as_of`
    pub async fn scan_configured(&self, as_of: NaiveDate) -> Result<ScanReport, ScanError> {
        self.scan(&self.config.universes, as_of).await
    }

    /// Scan the given universes as of `as_of`
    pub async fn scan(
        &self,
        universes: &[UniverseConfig],
        as_of: NaiveDate,
    ) -> Result<ScanReport, ScanError> {
        let jobs: Vec<Job> = universes
            .iter()
            .enumerate()
            .flat_map(|(universe, u)| {
                u.instruments()
                    .into_iter()
                    .map(move |instrument| Job { universe, instrument })
            })
            .collect();
        let requested = jobs.len();
        info!(
            "Scanning {} instruments across {} universes from source '{}'",
            requested,
            universes.len(),
            self.source.name()
        );

        let probe_source = Arc::clone(&self.source);
        let probe = tokio::task::spawn_blocking(move || probe_source.probe())
            .await
            .unwrap_or_else(|e| Err(SourceError::Unreachable(e.to_string())));
        if let Err(e) = probe {
            warn!("Data source unavailable: {}", e);
            let partial = self.build_report(universes, &jobs, Vec::new(), Vec::new(), as_of, false);
            return Err(ScanError::SourceUnavailable {
                reason: e.to_string(),
                partial: Box::new(partial),
            });
        }

        // Phase 1: fetch
        let (fetched, incomplete) = self.fetch_all(&jobs, as_of).await;

        let mut skipped = Vec::new();
        let mut series = Vec::new();
        let mut circuit_rejections = 0;
        for (idx, outcome) in fetched.into_iter().enumerate() {
            let job = &jobs[idx];
            match outcome {
                Some(Ok(bars)) => {
                    series.push((idx, BarSeries::from_unsorted(job.instrument.symbol.clone(), bars)))
                }
                Some(Err(e)) => {
                    if matches!(e, SourceError::CircuitOpen { .. }) {
                        circuit_rejections += 1;
                    }
                    info!("Skipping {} ({}): {}", job.instrument.symbol, job.instrument.name, e);
                    skipped.push(self.skipped(universes, job, e.to_string()));
                }
                None => skipped.push(self.skipped(universes, job, "batch deadline passed".to_string())),
            }
        }

        // Phase 2: evaluate
        let assessments = self.evaluate_all(&jobs, series).await;
        let mut scored = Vec::with_capacity(assessments.len());
        for (idx, assessment) in assessments {
            match assessment {
                Some(a) => scored.push((idx, a)),
                None => skipped.push(self.skipped(universes, &jobs[idx], "no bars".to_string())),
            }
        }

        // Phase 3: rank
        let report = self.build_report(universes, &jobs, scored, skipped, as_of, incomplete);
        info!(
            "Scan finished: {} scored, {} skipped, {} fully confirmed",
            report.scored,
            report.skipped.len(),
            report.fully_confirmed.len()
        );

        if circuit_rejections > 0 {
            return Err(ScanError::SourceUnavailable {
                reason: format!(
                    "circuit breaker open, {} requests rejected",
                    circuit_rejections
                ),
                partial: Box::new(report),
            });
        }

        Ok(report)
    }

    async fn fetch_all(
        &self,
        jobs: &[Job],
        as_of: NaiveDate,
    ) -> (Vec<Option<Result<Vec<Bar>, SourceError>>>, bool) {
        let scan = &self.config.scan;
        let policy = Arc::new(RetryPolicy::from_scan_config(scan));
        let breaker = Arc::new(Mutex::new(CircuitBreaker::new(
            CircuitBreakerConfig::from_scan_config(scan),
        )));
        let semaphore = Arc::new(Semaphore::new(scan.max_concurrency.max(1)));

        let mut join_set = JoinSet::new();
        for (idx, job) in jobs.iter().enumerate() {
            let request = BarRequest::daily(
                job.instrument.symbol.clone(),
                as_of,
                self.config.data.lookback_days,
                self.config.data.adjust,
            );
            let source = Arc::clone(&self.source);
            let policy = Arc::clone(&policy);
            let breaker = Arc::clone(&breaker);
            let semaphore = Arc::clone(&semaphore);

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = fetch_with_retry(source, request, &policy, &breaker).await;
                (idx, result)
            });
        }

        let mut outcomes: Vec<Option<Result<Vec<Bar>, SourceError>>> =
            (0..jobs.len()).map(|_| None).collect();
        let deadline = Instant::now() + Duration::from_secs(scan.batch_timeout_secs);
        let mut incomplete = false;

        loop {
            match timeout_at(deadline, join_set.join_next()).await {
                Ok(Some(Ok((idx, result)))) => outcomes[idx] = Some(result),
                Ok(Some(Err(e))) => warn!("Fetch task failed: {}", e),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Batch timeout after {}s, {} fetches still outstanding",
                        scan.batch_timeout_secs,
                        join_set.len()
                    );
                    join_set.abort_all();
                    incomplete = true;
                    break;
                }
            }
        }

        (outcomes, incomplete)
    }

    async fn evaluate_all(
        &self,
        jobs: &[Job],
        series: Vec<(usize, BarSeries)>,
    ) -> Vec<(usize, Option<BreakoutAssessment>)> {
        let work: Vec<(usize, Instrument, BarSeries)> = series
            .into_iter()
            .map(|(idx, s)| (idx, jobs[idx].instrument.clone(), s))
            .collect();
        let indicator_config = self.config.indicators.clone();
        let scorer = self.scorer.clone();
        let pb = progress_bar(work.len(), self.show_progress);

        let task = tokio::task::spawn_blocking(move || {
            let results: Vec<(usize, Option<BreakoutAssessment>)> = work
                .par_iter()
                .map(|(idx, instrument, series)| {
                    let assessment = evaluate_series(instrument, series, &indicator_config, &scorer);
                    if let Some(a) = &assessment {
                        debug!(
                            symbol = %a.symbol,
                            score = a.score,
                            strength = %a.strength,
                            mode = %a.mode(),
                            "Assessed"
                        );
                    }
                    pb.inc(1);
                    (*idx, assessment)
                })
                .collect();
            pb.finish_and_clear();
            results
        });

        match task.await {
            Ok(results) => results,
            Err(e) => {
                warn!("Evaluation task failed: {}", e);
                Vec::new()
            }
        }
    }

    fn skipped(&self, universes: &[UniverseConfig], job: &Job, reason: String) -> SkippedInstrument {
        SkippedInstrument {
            symbol: job.instrument.symbol.to_string(),
            name: job.instrument.name.clone(),
            universe: universes[job.universe].name.clone(),
            reason,
        }
    }

    fn build_report(
        &self,
        universes: &[UniverseConfig],
        jobs: &[Job],
        mut scored: Vec<(usize, BreakoutAssessment)>,
        skipped: Vec<SkippedInstrument>,
        as_of: NaiveDate,
        incomplete: bool,
    ) -> ScanReport {
        scored.sort_by_key(|(idx, _)| *idx);

        let mut results: Vec<UniverseResult> = universes
            .iter()
            .map(|u| UniverseResult::new(&u.name, u.class).with_candidate_limit(u.candidate_limit))
            .collect();
        for (idx, assessment) in scored {
            results[jobs[idx].universe].assessments.push(assessment);
        }

        let mut ranked = RankedResultSet::merge(&results);
        let enriched = enrich(
            &mut ranked,
            self.news.as_deref(),
            &self.config.enrichment,
            self.config.scoring.max_score,
        );
        if enriched > 0 {
            info!("Applied news bonus to {} instruments", enriched);
        }

        ScanReport::build(
            ranked,
            skipped,
            jobs.len(),
            as_of,
            incomplete,
            &self.config.ranking,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySource {
        calls: AtomicU32,
        failures_before_success: u32,
    }

    impl BarSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        fn fetch(&self, request: &BarRequest) -> Result<Vec<Bar>, SourceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                Err(SourceError::Transport("connection reset".to_string()))
            } else {
                Ok(vec![Bar::new_unchecked(request.end, 1.0, 1.0, 1.0, 1.0, 1.0)])
            }
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(1),
            fetch_timeout: Duration::from_secs(5),
        }
    }

    fn request() -> BarRequest {
        BarRequest::daily(
            crate::Symbol::new("sh.512480"),
            NaiveDate::from_ymd_opt(2024, 6, 28).unwrap(),
            30,
            crate::data::AdjustMode::None,
        )
    }

    struct StallingSource {
        calls: AtomicU32,
        stall: Duration,
    }

    impl BarSource for StallingSource {
        fn name(&self) -> &str {
            "stalling"
        }

        fn fetch(&self, request: &BarRequest) -> Result<Vec<Bar>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.stall);
            Ok(vec![Bar::new_unchecked(request.end, 1.0, 1.0, 1.0, 1.0, 1.0)])
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let p = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(100),
            fetch_timeout: Duration::from_secs(1),
        };
        assert_eq!(p.delay(1), Duration::from_millis(100));
        assert_eq!(p.delay(2), Duration::from_millis(200));
        assert_eq!(p.delay(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let source = Arc::new(FlakySource {
            calls: AtomicU32::new(0),
            failures_before_success: 2,
        });
        let breaker = Mutex::new(CircuitBreaker::new(CircuitBreakerConfig::default()));

        let bars = fetch_with_retry(source.clone(), request(), &policy(2), &breaker)
            .await
            .unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_budget() {
        let source = Arc::new(FlakySource {
            calls: AtomicU32::new(0),
            failures_before_success: 10,
        });
        let breaker = Mutex::new(CircuitBreaker::new(CircuitBreakerConfig::default()));

        let result = fetch_with_retry(source.clone(), request(), &policy(1), &breaker).await;
        assert!(matches!(result, Err(SourceError::Transport(_))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_open_breaker_rejects_without_calling_source() {
        let source = Arc::new(FlakySource {
            calls: AtomicU32::new(0),
            failures_before_success: 0,
        });
        let mut cb = CircuitBreaker::new(CircuitBreakerConfig::default().with_failure_threshold(1));
        cb.record_failure();
        let breaker = Mutex::new(cb);

        let result = fetch_with_retry(source.clone(), request(), &policy(2), &breaker).await;
        assert!(matches!(result, Err(SourceError::CircuitOpen { .. })));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_retry_while_timed_out_fetch_still_runs() {
        let source = Arc::new(StallingSource {
            calls: AtomicU32::new(0),
            stall: Duration::from_millis(300),
        });
        let breaker = Mutex::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
        let p = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(1),
            fetch_timeout: Duration::from_millis(50),
        };

        let result = fetch_with_retry(source.clone(), request(), &p, &breaker).await;
        assert!(matches!(result, Err(SourceError::Timeout { .. })));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
