//! Binance spot market-data source.
//!
//! Fetches candles from the public `/api/v3/klines` endpoint and instrument
//! listings from `/api/v3/exchangeInfo`. Each call is a single blocking HTTP
//! request with a bounded timeout; retries are the orchestrator's job, so this
//! module only classifies failures into retryable and permanent ones.
//!
//! Binance caps a klines response at 1000 rows, so longer ranges are paged by
//! advancing `startTime` past the last returned open time.

use super::provider::{FetchError, OhlcvSource, SymbolInfo};
use crate::domain::{canonicalize, Candle, Interval, TimeRange};
use chrono::DateTime;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Global Binance spot API.
pub const BINANCE_GLOBAL: &str = "https://api.binance.com";

/// Binance.US spot API.
pub const BINANCE_US: &str = "https://api.binance.us";

/// Maximum rows Binance returns per klines request.
pub const MAX_PAGE_LIMIT: usize = 1000;

const USER_AGENT: &str = concat!("crypto-alpha-lab/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

/// Live Binance source.
pub struct BinanceSource {
    client: reqwest::blocking::Client,
    base_url: String,
    interval: Interval,
    page_limit: usize,
}

impl BinanceSource {
    pub fn new(
        base_url: impl Into<String>,
        interval: Interval,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            interval,
            page_limit: MAX_PAGE_LIMIT,
        })
    }

    /// Override the rows requested per page (clamped to `1..=1000`).
    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit.clamp(1, MAX_PAGE_LIMIT);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `{base_url}{path}` and decode the JSON body.
    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .map_err(|e| FetchError::Network(format!("GET {path}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = resp.text().unwrap_or_default();
            return Err(error_for_status(status, retry_after, &body));
        }

        let body = resp
            .text()
            .map_err(|e| FetchError::Network(format!("reading {path} body: {e}")))?;
        serde_json::from_str(&body)
            .map_err(|e| FetchError::InvalidResponse(format!("{path}: {e}")))
    }

    /// One klines request covering open times `[start_ms, end_ms]`.
    fn fetch_page(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, FetchError> {
        let rows: Vec<Vec<Value>> = self.get_json(
            "/api/v3/klines",
            &[
                ("symbol", symbol.to_string()),
                ("interval", self.interval.as_str().to_string()),
                ("startTime", start_ms.to_string()),
                ("endTime", end_ms.to_string()),
                ("limit", self.page_limit.to_string()),
            ],
        )?;
        parse_klines(&rows)
    }
}

impl OhlcvSource for BinanceSource {
    fn name(&self) -> &str {
        "binance"
    }

    fn fetch(&self, symbol: &str, range: &TimeRange) -> Result<Vec<Candle>, FetchError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }

        // endTime is inclusive on the exchange side.
        let end_ms = range.end_millis() - 1;
        let mut cursor = range.start_millis();
        let mut candles = Vec::new();
        let mut pages = 0usize;

        while cursor <= end_ms {
            let page = self.fetch_page(symbol, cursor, end_ms)?;
            pages += 1;
            let rows = page.len();
            let Some(last) = page.last() else {
                break;
            };
            let next = last.open_time.timestamp_millis() + self.interval.millis();
            debug!(symbol, page = pages, rows, "fetched klines page");
            candles.extend(page);

            if rows < self.page_limit || next <= cursor {
                break;
            }
            cursor = next;
        }

        candles.retain(|c| c.open_time >= range.start && c.open_time < range.end);
        let dropped = canonicalize(&mut candles);
        if dropped > 0 {
            debug!(symbol, dropped, "dropped duplicate klines across pages");
        }
        Ok(candles)
    }

    fn exchange_symbols(&self) -> Result<Vec<SymbolInfo>, FetchError> {
        let info: ExchangeInfo = self.get_json("/api/v3/exchangeInfo", &[])?;
        Ok(info.symbols)
    }
}

/// Map a non-success status to a fetch error.
///
/// 429 is the request-weight limit; 418 is the IP ban Binance escalates to
/// when 429s are ignored. Both are rate limiting. Any other status is a
/// network error.
fn error_for_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> FetchError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return FetchError::RateLimited { retry_after };
    }
    let snippet: String = body.chars().take(200).collect();
    if snippet.is_empty() {
        FetchError::Network(format!("HTTP {status}"))
    } else {
        FetchError::Network(format!("HTTP {status}: {snippet}"))
    }
}

/// Parse klines rows: `[open_time_ms, "open", "high", "low", "close", "volume", close_time_ms, ...]`.
fn parse_klines(rows: &[Vec<Value>]) -> Result<Vec<Candle>, FetchError> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            parse_kline_row(row)
                .map_err(|e| FetchError::InvalidResponse(format!("kline row {i}: {e}")))
        })
        .collect()
}

fn parse_kline_row(row: &[Value]) -> Result<Candle, String> {
    if row.len() < 6 {
        return Err(format!("expected at least 6 elements, got {}", row.len()));
    }
    let open_ms = row[0]
        .as_i64()
        .ok_or_else(|| format!("open time is not an integer: {}", row[0]))?;
    let open_time = DateTime::from_timestamp_millis(open_ms)
        .ok_or_else(|| format!("open time out of range: {open_ms}"))?;

    Ok(Candle {
        open_time,
        open: decimal(&row[1], "open")?,
        high: decimal(&row[2], "high")?,
        low: decimal(&row[3], "low")?,
        close: decimal(&row[4], "close")?,
        volume: decimal(&row[5], "volume")?,
    })
}

/// Binance encodes decimals as strings; accept plain JSON numbers too.
fn decimal(value: &Value, name: &str) -> Result<f64, String> {
    match value {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| format!("{name} '{s}' is not a decimal: {e}")),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("{name} {n} is not representable")),
        other => Err(format!("{name} has unexpected type: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_documented_kline_rows() {
        let rows: Vec<Vec<Value>> = serde_json::from_value(json!([
            [1704067200000i64, "42283.58", "44184.10", "42180.77", "44179.55", "27174.29903",
             1704153599999i64, "1169995682.37", 1144027, "14300.3", "615867733.5", "0"],
            [1704153600000i64, "44179.55", "45879.63", "44148.34", "44946.91", "65146.40661",
             1704239999999i64, "2944175890.54", 2007522, "34134.2", "1542962010.4", "0"]
        ]))
        .unwrap();

        let candles = parse_klines(&rows).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time.timestamp_millis(), 1704067200000);
        assert_eq!(candles[0].open, 42283.58);
        assert_eq!(candles[1].volume, 65146.40661);
        assert!(candles.iter().all(|c| c.is_consistent()));
    }

    #[test]
    fn numeric_decimals_are_accepted() {
        let row: Vec<Value> = serde_json::from_value(json!([0, 1.5, 2, 1, 1.5, 10])).unwrap();
        let candle = parse_kline_row(&row).unwrap();
        assert_eq!(candle.high, 2.0);
    }

    #[test]
    fn malformed_rows_are_invalid_responses() {
        let short: Vec<Vec<Value>> = serde_json::from_value(json!([[1, "1", "1"]])).unwrap();
        assert!(matches!(parse_klines(&short), Err(FetchError::InvalidResponse(_))));

        let bad_decimal: Vec<Vec<Value>> =
            serde_json::from_value(json!([[1, "abc", "1", "1", "1", "1"]])).unwrap();
        let err = parse_klines(&bad_decimal).unwrap_err();
        assert!(err.to_string().contains("open 'abc'"));
    }

    #[test]
    fn throttling_statuses_are_rate_limits() {
        let err = error_for_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(5)),
            "",
        );
        assert!(matches!(
            err,
            FetchError::RateLimited {
                retry_after: Some(d)
            } if d == Duration::from_secs(5)
        ));

        let ban = error_for_status(StatusCode::from_u16(418).unwrap(), None, "");
        assert!(matches!(ban, FetchError::RateLimited { retry_after: None }));
    }

    #[test]
    fn other_statuses_are_network_errors() {
        let err = error_for_status(
            StatusCode::BAD_REQUEST,
            None,
            r#"{"code":-1121,"msg":"Invalid symbol."}"#,
        );
        match err {
            FetchError::Network(msg) => {
                assert!(msg.contains("400"));
                assert!(msg.contains("Invalid symbol"));
            }
            other => panic!("expected network error, got {other:?}"),
        }
        assert!(error_for_status(StatusCode::BAD_GATEWAY, None, "").is_retryable());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let source =
            BinanceSource::new("http://127.0.0.1:1/", Interval::Day1, Duration::from_secs(1))
                .unwrap()
                .with_page_limit(5000);
        assert_eq!(source.base_url(), "http://127.0.0.1:1");
        assert_eq!(source.page_limit, MAX_PAGE_LIMIT);
    }

    #[test]
    fn unreachable_endpoint_is_a_network_error() {
        // Port 1 on loopback refuses connections.
        let source =
            BinanceSource::new("http://127.0.0.1:1", Interval::Day1, Duration::from_secs(2))
                .unwrap();
        let range = TimeRange::new(
            DateTime::from_timestamp_millis(1704067200000).unwrap(),
            DateTime::from_timestamp_millis(1704153600000).unwrap(),
        );
        let err = source.fetch("BTCUSDT", &range).unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
    }
}
