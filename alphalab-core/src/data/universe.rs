//! Symbol universe: an explicit ordered list, or a selection of liquid spot
//! pairs discovered from the exchange listing.

use super::provider::{FetchError, OhlcvSource, SymbolInfo};
use crate::domain::Symbol;
use std::collections::HashSet;

/// Quote assets in preference order when discovering symbols.
pub const DEFAULT_QUOTE_PRIORITY: [&str; 5] = ["USDT", "USDC", "FDUSD", "BTC", "ETH"];

/// Leveraged and index tokens carry one of these markers in their symbol.
const LEVERAGED_MARKERS: [&str; 4] = ["UP", "DOWN", "BEAR", "BULL"];

/// Ordered list of symbols to collect. Order is the fetch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Universe {
    symbols: Vec<Symbol>,
}

impl Universe {
    /// Use the given symbols as-is, dropping repeats but keeping first-seen order.
    pub fn explicit<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        let mut seen = HashSet::new();
        let symbols = symbols
            .into_iter()
            .map(Into::into)
            .filter(|s: &Symbol| seen.insert(s.clone()))
            .collect();
        Self { symbols }
    }

    /// Discover the top `limit` spot symbols from the source's exchange listing.
    pub fn discover(
        source: &dyn OhlcvSource,
        quote_priority: &[String],
        limit: usize,
    ) -> Result<Self, FetchError> {
        let listings = source.exchange_symbols()?;
        Ok(Self {
            symbols: select_top_symbols(&listings, quote_priority, limit),
        })
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Pick liquid spot symbols from an exchange listing.
///
/// Keeps trading, spot-enabled pairs whose quote asset is in `quote_priority`,
/// ranks them by quote priority then base asset, skips leveraged tokens and
/// keeps only the best-ranked quote per base asset.
pub fn select_top_symbols(
    listings: &[SymbolInfo],
    quote_priority: &[String],
    limit: usize,
) -> Vec<Symbol> {
    let rank = |quote: &str| quote_priority.iter().position(|q| q == quote);

    let mut candidates: Vec<(usize, &SymbolInfo)> = listings
        .iter()
        .filter(|s| s.status == "TRADING" && s.is_spot_trading_allowed)
        .filter(|s| !LEVERAGED_MARKERS.iter().any(|m| s.symbol.contains(m)))
        .filter_map(|s| rank(s.quote_asset.as_str()).map(|r| (r, s)))
        .collect();
    candidates.sort_by(|(ra, a), (rb, b)| ra.cmp(rb).then_with(|| a.base_asset.cmp(&b.base_asset)));

    let mut seen_bases = HashSet::new();
    candidates
        .into_iter()
        .filter(|&(_, s)| seen_bases.insert(s.base_asset.as_str()))
        .map(|(_, s)| s.symbol.clone())
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mock::MockSource;
    use crate::domain::Interval;

    fn priority() -> Vec<String> {
        DEFAULT_QUOTE_PRIORITY.iter().map(|q| q.to_string()).collect()
    }

    fn listings() -> Vec<SymbolInfo> {
        let mut halted = SymbolInfo::trading("LUNAUSDT", "LUNA", "USDT");
        halted.status = "BREAK".into();
        let mut margin_only = SymbolInfo::trading("XYZUSDT", "XYZ", "USDT");
        margin_only.is_spot_trading_allowed = false;

        vec![
            SymbolInfo::trading("ETHBTC", "ETH", "BTC"),
            SymbolInfo::trading("SOLUSDC", "SOL", "USDC"),
            SymbolInfo::trading("ETHUSDT", "ETH", "USDT"),
            SymbolInfo::trading("BTCUPUSDT", "BTCUP", "USDT"),
            SymbolInfo::trading("BTCUSDT", "BTC", "USDT"),
            SymbolInfo::trading("BTCEUR", "BTC", "EUR"),
            SymbolInfo::trading("ADAETH", "ADA", "ETH"),
            halted,
            margin_only,
        ]
    }

    #[test]
    fn ranks_by_quote_then_base() {
        let picked = select_top_symbols(&listings(), &priority(), 25);
        assert_eq!(picked, vec!["BTCUSDT", "ETHUSDT", "SOLUSDC", "ADAETH"]);
    }

    #[test]
    fn one_quote_per_base() {
        let picked = select_top_symbols(&listings(), &priority(), 25);
        assert!(!picked.contains(&"ETHBTC".to_string()));
    }

    #[test]
    fn skips_leveraged_halted_and_unlisted_quotes() {
        let picked = select_top_symbols(&listings(), &priority(), 25);
        assert!(!picked.iter().any(|s| s == "BTCUPUSDT"));
        assert!(!picked.iter().any(|s| s == "LUNAUSDT"));
        assert!(!picked.iter().any(|s| s == "XYZUSDT"));
        assert!(!picked.iter().any(|s| s == "BTCEUR"));
    }

    #[test]
    fn respects_limit() {
        let picked = select_top_symbols(&listings(), &priority(), 2);
        assert_eq!(picked, vec!["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn explicit_universe_dedups_in_order() {
        let u = Universe::explicit(["ETHUSDT", "BTCUSDT", "ETHUSDT"]);
        assert_eq!(u.symbols(), &["ETHUSDT".to_string(), "BTCUSDT".to_string()]);
        assert_eq!(u.len(), 2);
    }

    #[test]
    fn discovery_against_mock_listing() {
        let source = MockSource::new(1, Interval::Day1);
        let u = Universe::discover(&source, &priority(), 3).unwrap();
        assert_eq!(u.symbols(), &["ADAUSDT", "BNBUSDT", "BTCUSDT"]);
    }
}
