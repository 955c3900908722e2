//! AlphaLab Core: OHLCV collection for crypto spot markets.
//!
//! - Domain types (fields, candles, field series, intervals, time ranges)
//! - Candle sources: live Binance REST and a deterministic mock
//! - Fetch orchestrator with bounded linear-backoff retries
//! - Per-field Parquet store with atomic writes
//! - Post-write validator and run manifest

pub mod config;
pub mod data;
pub mod domain;
pub mod pipeline;

pub use config::{CollectorConfig, ConfigError};
pub use pipeline::{Pipeline, RunReport};
