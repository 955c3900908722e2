//! Collector configuration, loaded from TOML.
//!
//! Every section and key is optional:
//!
//! ```toml
//! [source]
//! mode = "mock"                        # or "live"
//! base_url = "https://api.binance.com"
//! timeout_secs = 30
//! mock_seed = 42
//!
//! [range]
//! start = "2024-01-01"
//! end = "2024-04-01"                   # defaults to today (UTC)
//! interval = "1d"
//!
//! [universe]
//! symbols = ["BTCUSDT", "ETHUSDT"]
//! discover = false
//! limit = 25
//! quote_priority = ["USDT", "USDC", "FDUSD", "BTC", "ETH"]
//!
//! [fetch]
//! request_delay_ms = 200
//! max_retries = 3
//! backoff_ms = 500
//! rate_limit_multiplier = 4
//! fallback_to_store = false            # serve failed symbols from stored files
//!
//! [storage]
//! root = "storage/ohlcv"
//! fields = ["open", "high", "low", "close", "volume"]
//! ```

use crate::data::binance::{BinanceSource, BINANCE_GLOBAL};
use crate::data::download::RetryPolicy;
use crate::data::mock::MockSource;
use crate::data::provider::{FetchError, OhlcvSource, SourceMode};
use crate::data::universe::{Universe, DEFAULT_QUOTE_PRIORITY};
use crate::domain::{is_valid_symbol, Field, Interval, TimeRange};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorConfig {
    pub source: SourceConfig,
    pub range: RangeConfig,
    pub universe: UniverseConfig,
    pub fetch: FetchConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub mode: SourceMode,
    pub base_url: String,
    pub timeout_secs: u64,
    pub mock_seed: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            mode: SourceMode::Mock,
            base_url: BINANCE_GLOBAL.to_string(),
            timeout_secs: 30,
            mock_seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RangeConfig {
    pub start: NaiveDate,
    /// Exclusive. `None` means today (UTC).
    pub end: Option<NaiveDate>,
    pub interval: Interval,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            end: None,
            interval: Interval::Day1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UniverseConfig {
    pub symbols: Vec<String>,
    pub discover: bool,
    pub limit: usize,
    pub quote_priority: Vec<String>,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".into(), "ETHUSDT".into()],
            discover: false,
            limit: 25,
            quote_priority: DEFAULT_QUOTE_PRIORITY.iter().map(|q| q.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub request_delay_ms: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub rate_limit_multiplier: u32,
    /// Serve a symbol from its stored files when its fetch fails.
    pub fallback_to_store: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_delay_ms: 200,
            max_retries: 3,
            backoff_ms: 500,
            rate_limit_multiplier: 4,
            fallback_to_store: false,
        }
    }
}

impl FetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.backoff_ms),
            rate_limit_multiplier: self.rate_limit_multiplier,
        }
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub fields: Vec<Field>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("storage/ohlcv"),
            fields: Field::ALL.to_vec(),
        }
    }
}

impl CollectorConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without validating.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(format!("serialize config: {e}")))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.fields.is_empty() {
            return Err(ConfigError::Invalid("storage.fields must name at least one field".into()));
        }
        let mut seen = BTreeSet::new();
        if let Some(dup) = self.storage.fields.iter().find(|&&f| !seen.insert(f)) {
            return Err(ConfigError::Invalid(format!("storage.fields lists '{dup}' twice")));
        }
        let range = self.time_range();
        if range.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "range.start {} must be before range.end {}",
                range.start.date_naive(),
                range.end.date_naive()
            )));
        }
        if let Some(bad) = self.universe.symbols.iter().find(|s| !is_valid_symbol(s)) {
            return Err(ConfigError::Invalid(format!(
                "universe symbol '{bad}' must be ASCII letters and digits"
            )));
        }
        if !self.universe.discover && self.universe.symbols.is_empty() {
            return Err(ConfigError::Invalid(
                "universe.symbols is empty and discovery is off".into(),
            ));
        }
        if self.universe.discover && self.universe.limit == 0 {
            return Err(ConfigError::Invalid("universe.limit must be at least 1".into()));
        }
        Ok(())
    }

    /// Requested range, with a missing end resolved to today (UTC).
    pub fn time_range(&self) -> TimeRange {
        let end = self.range.end.unwrap_or_else(|| Utc::now().date_naive());
        TimeRange::from_dates(self.range.start, end)
    }

    /// Construct the source variant selected by `source.mode`.
    pub fn build_source(&self) -> Result<Box<dyn OhlcvSource>, FetchError> {
        match self.source.mode {
            SourceMode::Mock => Ok(Box::new(MockSource::new(
                self.source.mock_seed,
                self.range.interval,
            ))),
            SourceMode::Live => Ok(Box::new(BinanceSource::new(
                self.source.base_url.as_str(),
                self.range.interval,
                Duration::from_secs(self.source.timeout_secs),
            )?)),
        }
    }

    /// The explicit symbol list, or the discovered one when `universe.discover` is set.
    pub fn resolve_universe(&self, source: &dyn OhlcvSource) -> Result<Universe, FetchError> {
        if self.universe.discover {
            Universe::discover(source, &self.universe.quote_priority, self.universe.limit)
        } else {
            Ok(Universe::explicit(self.universe.symbols.iter().cloned()))
        }
    }
}
