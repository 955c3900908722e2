//! Fetch orchestrator: walks the symbol universe, retries transient failures
//! and collects per-field series plus a per-symbol failure list.
//!
//! Symbols are fetched one at a time in universe order. A symbol that keeps
//! failing is recorded and skipped; it never aborts the run.

use super::provider::{FetchError, FetchProgress, OhlcvSource};
use super::universe::Universe;
use crate::domain::{Candle, Field, FieldSeries, Symbol, TimeRange};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// Bounded retry with linear backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    /// Base delay; the n-th retry waits `backoff * n`.
    pub backoff: Duration,
    /// Rate-limit retries wait this many times longer.
    pub rate_limit_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(500),
            rate_limit_multiplier: 4,
        }
    }
}

impl RetryPolicy {
    /// No retries and no waiting.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
            rate_limit_multiplier: 1,
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    ///
    /// A server-provided `Retry-After` wins when it is longer than the
    /// computed rate-limit backoff.
    pub fn delay_for(&self, attempt: u32, error: &FetchError) -> Duration {
        let linear = self.backoff * attempt;
        match error {
            FetchError::RateLimited { retry_after } => {
                let backoff = linear * self.rate_limit_multiplier.max(1);
                retry_after.map_or(backoff, |server| server.max(backoff))
            }
            _ => linear,
        }
    }
}

/// Successfully fetched symbol, projected onto the requested fields.
#[derive(Debug, Clone)]
pub struct FetchedSymbol {
    pub symbol: Symbol,
    pub attempts: u32,
    pub series: BTreeMap<Field, FieldSeries>,
}

impl FetchedSymbol {
    pub(crate) fn from_candles(
        symbol: &str,
        attempts: u32,
        candles: &[Candle],
        fields: &[Field],
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            attempts,
            series: fields
                .iter()
                .map(|&field| (field, FieldSeries::project(candles, field)))
                .collect(),
        }
    }

    /// Number of candles fetched (every field series has this length).
    pub fn rows(&self) -> usize {
        self.series.values().next().map_or(0, FieldSeries::len)
    }
}

/// A symbol that could not be fetched.
#[derive(Debug, Clone)]
pub struct SymbolFailure {
    pub symbol: Symbol,
    pub attempts: u32,
    pub error: FetchError,
}

/// Result of one orchestrator run.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Fetched symbols, in universe order.
    pub fetched: Vec<FetchedSymbol>,
    /// Failed symbols, in universe order.
    pub failures: Vec<SymbolFailure>,
}

impl FetchOutcome {
    pub fn get(&self, symbol: &str) -> Option<&FetchedSymbol> {
        self.fetched.iter().find(|f| f.symbol == symbol)
    }

    pub fn succeeded(&self) -> usize {
        self.fetched.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Drives a source over a universe.
pub struct FetchOrchestrator<'a> {
    source: &'a dyn OhlcvSource,
    range: TimeRange,
    retry: RetryPolicy,
    request_delay: Duration,
}

impl<'a> FetchOrchestrator<'a> {
    pub fn new(source: &'a dyn OhlcvSource, range: TimeRange) -> Self {
        Self {
            source,
            range,
            retry: RetryPolicy::default(),
            request_delay: Duration::from_millis(200),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Pause between a successful fetch and the next request.
    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    /// Fetch every symbol in the universe and project onto `fields`.
    pub fn run(
        &self,
        universe: &Universe,
        fields: &[Field],
        progress: &dyn FetchProgress,
    ) -> FetchOutcome {
        let total = universe.len();
        let mut outcome = FetchOutcome::default();
        let mut pause_before_next = false;

        info!(
            source = self.source.name(),
            symbols = total,
            range = %self.range,
            "starting fetch"
        );

        for (i, symbol) in universe.symbols().iter().enumerate() {
            if pause_before_next {
                sleep(self.request_delay);
            }
            progress.on_start(symbol, i, total);

            match self.fetch_with_retry(symbol) {
                Ok((candles, attempts)) => {
                    let inconsistent = candles.iter().filter(|c| !c.is_consistent()).count();
                    if inconsistent > 0 {
                        warn!(symbol = %symbol, inconsistent, "source returned inconsistent candles");
                    }
                    info!(symbol = %symbol, rows = candles.len(), attempts, "fetched");
                    progress.on_complete(symbol, i, total, &Ok(candles.len()));
                    outcome
                        .fetched
                        .push(FetchedSymbol::from_candles(symbol, attempts, &candles, fields));
                    pause_before_next = true;
                }
                Err((error, attempts)) => {
                    warn!(symbol = %symbol, attempts, error = %error, "giving up on symbol");
                    progress.on_complete(symbol, i, total, &Err(error.clone()));
                    outcome.failures.push(SymbolFailure {
                        symbol: symbol.clone(),
                        attempts,
                        error,
                    });
                    pause_before_next = false;
                }
            }
        }

        progress.on_batch_complete(outcome.succeeded(), outcome.failed(), total);
        outcome
    }

    /// Fetch one symbol, retrying transient errors. Returns the attempt count either way.
    fn fetch_with_retry(&self, symbol: &str) -> Result<(Vec<Candle>, u32), (FetchError, u32)> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.source.fetch(symbol, &self.range) {
                Ok(candles) if candles.is_empty() => {
                    return Err((
                        FetchError::NoData {
                            symbol: symbol.to_string(),
                        },
                        attempt,
                    ));
                }
                Ok(candles) => return Ok((candles, attempt)),
                Err(e) if e.is_retryable() && attempt <= self.retry.max_retries => {
                    let delay = self.retry.delay_for(attempt, &e);
                    warn!(
                        symbol,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient fetch failure, retrying"
                    );
                    sleep(delay);
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }
}

fn sleep(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}
