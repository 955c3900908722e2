//! Data sources, fetch orchestration, storage and verification.

pub mod binance;
pub mod download;
pub mod manifest;
pub mod mock;
pub mod provider;
pub mod store;
pub mod universe;
pub mod validate;

pub use binance::BinanceSource;
pub use download::{FetchOrchestrator, FetchOutcome, FetchedSymbol, RetryPolicy, SymbolFailure};
pub use manifest::RunManifest;
pub use mock::MockSource;
pub use provider::{FetchError, FetchProgress, NoProgress, OhlcvSource, SourceMode, StdoutProgress};
pub use store::{FieldStore, StorageError};
pub use universe::Universe;
pub use validate::{Discrepancy, DiscrepancyKind, Validator};
