//! Data source trait and structured error types.
//!
//! The `OhlcvSource` trait abstracts over where candles come from (the live
//! exchange API or the deterministic mock) so the orchestrator can run
//! unchanged against either, and tests can substitute their own sources.

use crate::domain::{Candle, TimeRange};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from fetching candles or exchange metadata.
///
/// `Network` and `RateLimited` are transient and retried by the orchestrator;
/// everything else fails the symbol on the first attempt.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by exchange{}", retry_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("no data returned for '{symbol}'")]
    NoData { symbol: String },
}

fn retry_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::RateLimited { .. })
    }
}

/// Exchange listing entry, as needed for universe selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub is_spot_trading_allowed: bool,
}

impl SymbolInfo {
    pub fn trading(symbol: &str, base: &str, quote: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            status: "TRADING".to_string(),
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
            is_spot_trading_allowed: true,
        }
    }
}

/// Which source variant a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    Live,
    #[default]
    Mock,
}

/// A source of OHLCV candles.
pub trait OhlcvSource {
    /// Short name recorded in logs and the run manifest.
    fn name(&self) -> &str;

    /// Fetch candles for `symbol` whose open time falls in `range`,
    /// ordered by open time ascending.
    fn fetch(&self, symbol: &str, range: &TimeRange) -> Result<Vec<Candle>, FetchError>;

    /// List the instruments the exchange offers.
    fn exchange_symbols(&self) -> Result<Vec<SymbolInfo>, FetchError>;
}

impl<S: OhlcvSource + ?Sized> OhlcvSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(&self, symbol: &str, range: &TimeRange) -> Result<Vec<Candle>, FetchError> {
        (**self).fetch(symbol, range)
    }

    fn exchange_symbols(&self) -> Result<Vec<SymbolInfo>, FetchError> {
        (**self).exchange_symbols()
    }
}

/// Progress callback for multi-symbol fetches.
pub trait FetchProgress {
    /// Called when starting to fetch a symbol.
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    /// Called when a symbol is finished, successfully or not.
    fn on_complete(&self, symbol: &str, index: usize, total: usize, result: &Result<usize, FetchError>);

    /// Called once the whole universe has been processed.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that does nothing.
pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn on_start(&self, _symbol: &str, _index: usize, _total: usize) {}

    fn on_complete(
        &self,
        _symbol: &str,
        _index: usize,
        _total: usize,
        _result: &Result<usize, FetchError>,
    ) {
    }

    fn on_batch_complete(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}

/// Simple progress reporter that prints to stdout.
pub struct StdoutProgress;

impl FetchProgress for StdoutProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        println!("[{}/{}] Fetching {symbol}...", index + 1, total);
    }

    fn on_complete(
        &self,
        symbol: &str,
        _index: usize,
        _total: usize,
        result: &Result<usize, FetchError>,
    ) {
        match result {
            Ok(rows) => println!("  OK: {symbol} ({rows} candles)"),
            Err(e) => println!("  FAIL: {symbol}: {e}"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        println!("\nFetch complete: {succeeded}/{total} succeeded, {failed} failed");
    }
}
