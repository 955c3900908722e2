//! Domain types: OHLCV fields, candles, field series, candle intervals and time ranges.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tradable pair identifier, e.g. `BTCUSDT`.
pub type Symbol = String;

/// Symbols become file names, so only non-empty ASCII alphanumerics are accepted.
pub fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty() && symbol.chars().all(|c| c.is_ascii_alphanumeric())
}

/// One of the five candle fields. Each field is persisted as its own file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Open,
        Field::High,
        Field::Low,
        Field::Close,
        Field::Volume,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Field::Open => "open",
            Field::High => "high",
            Field::Low => "low",
            Field::Close => "close",
            Field::Volume => "volume",
        }
    }

    /// True for open/high/low/close.
    pub fn is_price(self) -> bool {
        !matches!(self, Field::Volume)
    }

    /// Project a candle onto this field.
    pub fn value_of(self, candle: &Candle) -> f64 {
        match self {
            Field::Open => candle.open,
            Field::High => candle.high,
            Field::Low => candle.low,
            Field::Close => candle.close,
            Field::Volume => candle.volume,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Field::Open),
            "high" => Ok(Field::High),
            "low" => Ok(Field::Low),
            "close" => Ok(Field::Close),
            "volume" => Ok(Field::Volume),
            other => Err(format!(
                "unknown field '{other}' (expected open, high, low, close or volume)"
            )),
        }
    }
}

/// A single OHLCV candle.
///
/// Invariants for well-formed data: `low <= open, close <= high` and `volume >= 0`.
/// Sources are expected to produce well-formed candles; the validator reports
/// anything that slips through.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Check the OHLC ordering and volume invariants.
    pub fn is_consistent(&self) -> bool {
        let finite = [self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.low <= self.open.min(self.close)
            && self.high >= self.open.max(self.close)
            && self.volume >= 0.0
    }
}

/// Sort candles by open time and drop duplicate open times (first occurrence wins).
///
/// Returns the number of candles dropped.
pub fn canonicalize(candles: &mut Vec<Candle>) -> usize {
    let before = candles.len();
    candles.sort_by_key(|c| c.open_time);
    candles.dedup_by_key(|c| c.open_time);
    before - candles.len()
}

/// One `(timestamp, value)` observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Time-ordered values of one field for one symbol.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSeries {
    pub points: Vec<SeriesPoint>,
}

impl FieldSeries {
    pub fn new(points: Vec<SeriesPoint>) -> Self {
        Self { points }
    }

    /// Project candles onto a single field, keeping candle order.
    pub fn project(candles: &[Candle], field: Field) -> Self {
        Self {
            points: candles
                .iter()
                .map(|c| SeriesPoint {
                    timestamp: c.open_time,
                    value: field.value_of(c),
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.points.first().map(|p| p.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.points.last().map(|p| p.timestamp)
    }

    pub fn is_strictly_increasing(&self) -> bool {
        self.points
            .windows(2)
            .all(|w| w[0].timestamp < w[1].timestamp)
    }
}

/// Candle width, using the exchange's interval codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "4h")]
    Hour4,
    #[default]
    #[serde(rename = "1d")]
    Day1,
    #[serde(rename = "1w")]
    Week1,
}

impl Interval {
    pub fn as_str(self) -> &'static str {
        match self {
            Interval::Minute1 => "1m",
            Interval::Minute5 => "5m",
            Interval::Minute15 => "15m",
            Interval::Hour1 => "1h",
            Interval::Hour4 => "4h",
            Interval::Day1 => "1d",
            Interval::Week1 => "1w",
        }
    }

    pub fn duration(self) -> Duration {
        match self {
            Interval::Minute1 => Duration::minutes(1),
            Interval::Minute5 => Duration::minutes(5),
            Interval::Minute15 => Duration::minutes(15),
            Interval::Hour1 => Duration::hours(1),
            Interval::Hour4 => Duration::hours(4),
            Interval::Day1 => Duration::days(1),
            Interval::Week1 => Duration::weeks(1),
        }
    }

    pub fn millis(self) -> i64 {
        self.duration().num_milliseconds()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1m" => Ok(Interval::Minute1),
            "5m" => Ok(Interval::Minute5),
            "15m" => Ok(Interval::Minute15),
            "1h" => Ok(Interval::Hour1),
            "4h" => Ok(Interval::Hour4),
            "1d" => Ok(Interval::Day1),
            "1w" => Ok(Interval::Week1),
            other => Err(format!(
                "unknown interval '{other}' (expected 1m, 5m, 15m, 1h, 4h, 1d or 1w)"
            )),
        }
    }
}

/// Half-open UTC time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Range from midnight UTC of `start` to midnight UTC of `end`.
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: start.and_time(NaiveTime::MIN).and_utc(),
            end: end.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }

    /// Number of candle open times `start + k * interval` strictly before `end`.
    pub fn candle_count(&self, interval: Interval) -> usize {
        if self.is_empty() {
            return 0;
        }
        let span = (self.end - self.start).num_milliseconds();
        let step = interval.millis();
        ((span + step - 1) / step) as usize
    }

    /// Candle open times covering the range, oldest first.
    pub fn open_times(&self, interval: Interval) -> impl Iterator<Item = DateTime<Utc>> {
        let start = self.start;
        let step = interval.duration();
        (0..self.candle_count(interval)).map(move |k| start + step * k as i32)
    }

    pub fn start_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_millis(&self) -> i64 {
        self.end.timestamp_millis()
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} .. {}",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(day: u32, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: TimeRange::from_dates(
                NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            )
            .start,
            open,
            high,
            low,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn field_parses_case_insensitively() {
        assert_eq!("Close".parse::<Field>().unwrap(), Field::Close);
        assert_eq!(" volume ".parse::<Field>().unwrap(), Field::Volume);
        assert!("adj_close".parse::<Field>().is_err());
    }

    #[test]
    fn projection_keeps_order_and_values() {
        let candles = vec![
            candle(1, 10.0, 12.0, 9.0, 11.0),
            candle(2, 11.0, 13.0, 10.0, 12.5),
        ];
        let highs = FieldSeries::project(&candles, Field::High);
        assert_eq!(highs.len(), 2);
        assert_eq!(highs.points[0].value, 12.0);
        assert_eq!(highs.points[1].value, 13.0);
        assert!(highs.is_strictly_increasing());
    }

    #[test]
    fn consistency_check_catches_inverted_range() {
        assert!(candle(1, 10.0, 12.0, 9.0, 11.0).is_consistent());
        assert!(!candle(1, 10.0, 9.5, 9.0, 11.0).is_consistent());
        let mut negative_volume = candle(1, 10.0, 12.0, 9.0, 11.0);
        negative_volume.volume = -1.0;
        assert!(!negative_volume.is_consistent());
    }

    #[test]
    fn canonicalize_sorts_and_dedups() {
        let mut candles = vec![
            candle(3, 1.0, 1.0, 1.0, 1.0),
            candle(1, 1.0, 1.0, 1.0, 1.0),
            candle(3, 2.0, 2.0, 2.0, 2.0),
            candle(2, 1.0, 1.0, 1.0, 1.0),
        ];
        let dropped = canonicalize(&mut candles);
        assert_eq!(dropped, 1);
        assert_eq!(candles.len(), 3);
        assert!(candles.windows(2).all(|w| w[0].open_time < w[1].open_time));
    }

    #[test]
    fn candle_count_rounds_partial_interval_up() {
        let range = TimeRange::from_dates(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        );
        assert_eq!(range.candle_count(Interval::Day1), 31);
        assert_eq!(range.candle_count(Interval::Week1), 5);
        assert_eq!(range.open_times(Interval::Day1).count(), 31);

        let empty = TimeRange::new(range.end, range.start);
        assert_eq!(empty.candle_count(Interval::Day1), 0);
    }

    #[test]
    fn range_is_half_open() {
        let range = TimeRange::from_dates(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        );
        assert!(range.contains(range.start));
        assert!(!range.contains(range.end));
    }

    #[test]
    fn interval_codes_roundtrip_through_strings() {
        for code in ["1m", "5m", "15m", "1h", "4h", "1d", "1w"] {
            let interval: Interval = code.parse().unwrap();
            assert_eq!(interval.as_str(), code);
        }
        assert!("3d".parse::<Interval>().is_err());
    }

    #[test]
    fn symbol_validation() {
        assert!(is_valid_symbol("BTCUSDT"));
        assert!(!is_valid_symbol(""));
        assert!(!is_valid_symbol("../etc"));
        assert!(!is_valid_symbol("BTC/USDT"));
    }
}
