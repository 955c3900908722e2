//! Deterministic mock source for offline development and tests.
//!
//! Each symbol gets an independent seeded random walk: the RNG seed is the
//! BLAKE3 hash of `(seed, symbol)`, so the same configuration always yields
//! the same candles and adding a symbol never perturbs the others.

use super::provider::{FetchError, OhlcvSource, SymbolInfo};
use crate::domain::{Candle, Interval, TimeRange};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Starting prices by base asset. Unknown bases start at `DEFAULT_BASE_PRICE`.
const BASE_PRICES: [(&str, f64); 7] = [
    ("BTC", 50_000.0),
    ("ETH", 3_000.0),
    ("BNB", 400.0),
    ("SOL", 100.0),
    ("DOT", 7.0),
    ("ADA", 1.0),
    ("XRP", 0.6),
];

const DEFAULT_BASE_PRICE: f64 = 10.0;

/// Listings returned by [`MockSource::exchange_symbols`].
const MOCK_LISTINGS: [(&str, &str, &str); 7] = [
    ("BTCUSDT", "BTC", "USDT"),
    ("ETHUSDT", "ETH", "USDT"),
    ("ADAUSDT", "ADA", "USDT"),
    ("DOTUSDT", "DOT", "USDT"),
    ("SOLUSDT", "SOL", "USDT"),
    ("BNBUSDT", "BNB", "USDT"),
    ("XRPUSDT", "XRP", "USDT"),
];

/// Mock OHLCV source. Pure: no I/O, never fails.
#[derive(Debug, Clone)]
pub struct MockSource {
    seed: u64,
    interval: Interval,
}

impl MockSource {
    pub fn new(seed: u64, interval: Interval) -> Self {
        Self { seed, interval }
    }

    fn rng_for(&self, symbol: &str) -> StdRng {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.seed.to_le_bytes());
        hasher.update(symbol.as_bytes());
        StdRng::from_seed(*hasher.finalize().as_bytes())
    }

    fn base_price(symbol: &str) -> f64 {
        BASE_PRICES
            .iter()
            .find(|(base, _)| symbol.starts_with(base))
            .map(|(_, price)| *price)
            .unwrap_or(DEFAULT_BASE_PRICE)
    }

    /// Generate one candle per interval open time in `range`.
    pub fn generate(&self, symbol: &str, range: &TimeRange) -> Vec<Candle> {
        let mut rng = self.rng_for(symbol);
        let mut price = Self::base_price(symbol) * rng.gen_range(0.95..1.05);

        range
            .open_times(self.interval)
            .map(|open_time| {
                let ret: f64 = rng.gen_range(-0.03..0.03);
                let open = price;
                let close = open * (1.0 + ret);
                let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.02));
                let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.02));
                let volume = rng.gen_range(100.0..1_000.0);
                price = close;

                Candle {
                    open_time,
                    open,
                    high,
                    low,
                    close,
                    volume,
                }
            })
            .collect()
    }
}

impl OhlcvSource for MockSource {
    fn name(&self) -> &str {
        "mock"
    }

    fn fetch(&self, symbol: &str, range: &TimeRange) -> Result<Vec<Candle>, FetchError> {
        Ok(self.generate(symbol, range))
    }

    fn exchange_symbols(&self) -> Result<Vec<SymbolInfo>, FetchError> {
        Ok(MOCK_LISTINGS
            .iter()
            .map(|(symbol, base, quote)| SymbolInfo::trading(symbol, base, quote))
            .collect())
    }
}
