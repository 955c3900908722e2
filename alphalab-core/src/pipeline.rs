//! Collection pipeline: fetch → write → verify → manifest.

use crate::config::CollectorConfig;
use crate::data::download::{FetchOrchestrator, FetchedSymbol, RetryPolicy, SymbolFailure};
use crate::data::manifest::RunManifest;
use crate::data::provider::{FetchProgress, OhlcvSource};
use crate::data::store::{FieldStore, StorageError};
use crate::data::universe::Universe;
use crate::data::validate::{Discrepancy, Validator};
use crate::domain::{Field, Interval, Symbol, TimeRange};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A (symbol, field) file that could not be written.
#[derive(Debug)]
pub struct WriteFailure {
    pub symbol: Symbol,
    pub field: Field,
    pub error: StorageError,
}

/// What one pipeline run did.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Symbols fetched and fully persisted, in universe order.
    pub succeeded: Vec<Symbol>,
    /// Symbols whose fetch failed but whose stored files were used instead.
    pub from_store: Vec<SymbolFailure>,
    pub failures: Vec<SymbolFailure>,
    pub storage_errors: Vec<WriteFailure>,
    pub discrepancies: Vec<Discrepancy>,
    pub files_written: usize,
    pub manifest_path: Option<PathBuf>,
    pub manifest_error: Option<StorageError>,
}

impl RunReport {
    /// True when every symbol has data on disk and every write went through.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.storage_errors.is_empty() && self.manifest_error.is_none()
    }
}

pub struct Pipeline<'a> {
    source: &'a dyn OhlcvSource,
    store: FieldStore,
    range: TimeRange,
    interval: Interval,
    fields: Vec<Field>,
    retry: RetryPolicy,
    request_delay: Duration,
    store_fallback: bool,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        source: &'a dyn OhlcvSource,
        store: FieldStore,
        range: TimeRange,
        interval: Interval,
        fields: &[Field],
    ) -> Self {
        Self {
            source,
            store,
            range,
            interval,
            fields: fields.to_vec(),
            retry: RetryPolicy::default(),
            request_delay: Duration::from_millis(200),
            store_fallback: false,
        }
    }

    /// Pipeline wired from a loaded config.
    pub fn from_config(config: &CollectorConfig, source: &'a dyn OhlcvSource) -> Self {
        Self::new(
            source,
            FieldStore::new(&config.storage.root),
            config.time_range(),
            config.range.interval,
            &config.storage.fields,
        )
        .with_retry(config.fetch.retry_policy())
        .with_request_delay(config.fetch.request_delay())
        .with_store_fallback(config.fetch.fallback_to_store)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    /// Serve symbols whose fetch fails from files already in the store.
    pub fn with_store_fallback(mut self, enabled: bool) -> Self {
        self.store_fallback = enabled;
        self
    }

    pub fn store(&self) -> &FieldStore {
        &self.store
    }

    pub fn run(&self, universe: &Universe, progress: &dyn FetchProgress) -> RunReport {
        let outcome = FetchOrchestrator::new(self.source, self.range)
            .with_retry(self.retry.clone())
            .with_request_delay(self.request_delay)
            .run(universe, &self.fields, progress);

        let mut report = RunReport::default();
        let mut manifest =
            RunManifest::new(self.source.name(), self.interval, &self.range, &self.fields);

        for fetched in &outcome.fetched {
            let mut first_error: Option<String> = None;
            for (&field, series) in &fetched.series {
                match self.store.write(&fetched.symbol, field, series) {
                    Ok(_) => report.files_written += 1,
                    Err(error) => {
                        warn!(symbol = %fetched.symbol, %field, error = %error, "write failed");
                        first_error.get_or_insert_with(|| format!("write failed: {error}"));
                        report.storage_errors.push(WriteFailure {
                            symbol: fetched.symbol.clone(),
                            field,
                            error,
                        });
                    }
                }
            }
            match first_error {
                None => {
                    manifest.record_stored(fetched, false);
                    report.succeeded.push(fetched.symbol.clone());
                }
                Some(error) => manifest.record_failure(&fetched.symbol, fetched.attempts, error),
            }
        }

        for failure in outcome.failures {
            if self.store_fallback {
                match self.load_stored(&failure.symbol, failure.attempts) {
                    Ok(stored) => {
                        warn!(
                            symbol = %failure.symbol,
                            rows = stored.rows(),
                            error = %failure.error,
                            "fetch failed, serving stored files"
                        );
                        manifest.record_stored(&stored, true);
                        report.from_store.push(failure);
                        continue;
                    }
                    Err(error) => {
                        debug!(symbol = %failure.symbol, error = %error, "no usable stored files");
                    }
                }
            }
            manifest.record_failure(&failure.symbol, failure.attempts, &failure.error);
            report.failures.push(failure);
        }

        let mut verified = report.succeeded.clone();
        verified.extend(report.from_store.iter().map(|f| f.symbol.clone()));
        report.discrepancies = Validator::new(&self.store).verify(&verified, &self.fields);

        match manifest.write(self.store.root()) {
            Ok(path) => report.manifest_path = Some(path),
            Err(error) => {
                warn!(error = %error, "manifest write failed");
                report.manifest_error = Some(error);
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            from_store = report.from_store.len(),
            failed = report.failures.len(),
            storage_errors = report.storage_errors.len(),
            discrepancies = report.discrepancies.len(),
            files = report.files_written,
            "collection run finished"
        );
        report
    }

    /// Rebuild a symbol from its stored candles, clipped to the run range.
    fn load_stored(&self, symbol: &str, attempts: u32) -> Result<FetchedSymbol, StorageError> {
        let mut candles = self.store.load_candles(symbol)?;
        candles.retain(|c| self.range.contains(c.open_time));
        if candles.is_empty() {
            return Err(StorageError::NotFound {
                path: self.store.path(Field::Open, symbol),
            });
        }
        Ok(FetchedSymbol::from_candles(symbol, attempts, &candles, &self.fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mock::MockSource;
    use crate::data::provider::{FetchError, NoProgress, SymbolInfo};
    use crate::domain::Candle;
    use chrono::NaiveDate;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn range() -> TimeRange {
        TimeRange::from_dates(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        )
    }

    #[test]
    fn writes_every_field_and_manifest() {
        let dir = TempDir::new().unwrap();
        let source = MockSource::new(42, Interval::Day1);
        let pipeline = Pipeline::new(
            &source,
            FieldStore::new(dir.path()),
            range(),
            Interval::Day1,
            &Field::ALL,
        )
        .with_request_delay(Duration::ZERO);

        let report = pipeline.run(&Universe::explicit(["BTCUSDT"]), &NoProgress);

        assert!(report.is_success());
        assert_eq!(report.succeeded, vec!["BTCUSDT"]);
        assert_eq!(report.files_written, 5);
        assert!(report.discrepancies.is_empty());

        let manifest = RunManifest::load(dir.path()).unwrap();
        assert_eq!(manifest.source, "mock");
        assert_eq!(manifest.entry("BTCUSDT").unwrap().rows, 31);
        assert_eq!(report.manifest_path, Some(dir.path().join("manifest.json")));
    }

    #[test]
    fn storage_errors_are_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        // A plain file where the `close` directory should go.
        fs::write(dir.path().join("close"), b"").unwrap();

        let source = MockSource::new(42, Interval::Day1);
        let report = Pipeline::new(
            &source,
            FieldStore::new(dir.path()),
            range(),
            Interval::Day1,
            &[Field::Open, Field::Close],
        )
        .with_request_delay(Duration::ZERO)
        .run(&Universe::explicit(["BTCUSDT", "ETHUSDT"]), &NoProgress);

        assert!(!report.is_success());
        assert_eq!(report.storage_errors.len(), 2);
        assert!(report.storage_errors.iter().all(|e| e.field == Field::Close));
        assert_eq!(report.files_written, 2);
        assert!(report.succeeded.is_empty());
        assert!(dir.path().join("open").join("ETHUSDT.parquet").is_file());

        let manifest = RunManifest::load(dir.path()).unwrap();
        assert!(manifest.entry("BTCUSDT").is_none());
        assert!(manifest.symbols.is_empty());
        let failed: Vec<&str> = manifest.failures.iter().map(|f| f.symbol.as_str()).collect();
        assert_eq!(failed, ["BTCUSDT", "ETHUSDT"]);
        assert!(manifest
            .failures
            .iter()
            .all(|f| f.error.starts_with("write failed:") && f.attempts == 1));
    }

    /// Mock data, except that the listed symbols always fail.
    struct FailingSource {
        mock: MockSource,
        failing: &'static [&'static str],
    }

    impl OhlcvSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        fn fetch(&self, symbol: &str, range: &TimeRange) -> Result<Vec<Candle>, FetchError> {
            if self.failing.contains(&symbol) {
                return Err(FetchError::Network("connection refused".into()));
            }
            self.mock.fetch(symbol, range)
        }

        fn exchange_symbols(&self) -> Result<Vec<SymbolInfo>, FetchError> {
            self.mock.exchange_symbols()
        }
    }

    fn pipeline<'a>(source: &'a dyn OhlcvSource, root: &Path) -> Pipeline<'a> {
        Pipeline::new(source, FieldStore::new(root), range(), Interval::Day1, &Field::ALL)
            .with_retry(RetryPolicy::none())
            .with_request_delay(Duration::ZERO)
    }

    #[test]
    fn failed_fetch_is_served_from_stored_files() {
        let dir = TempDir::new().unwrap();
        let universe = Universe::explicit(["BTCUSDT", "ETHUSDT"]);
        let mock = MockSource::new(42, Interval::Day1);
        assert!(pipeline(&mock, dir.path()).run(&universe, &NoProgress).is_success());
        let stored = RunManifest::load(dir.path()).unwrap();
        let stored_hash = &stored.entry("ETHUSDT").unwrap().data_hash;

        let source = FailingSource {
            mock: MockSource::new(42, Interval::Day1),
            failing: &["ETHUSDT"],
        };
        let report = pipeline(&source, dir.path())
            .with_store_fallback(true)
            .run(&universe, &NoProgress);

        assert!(report.is_success());
        assert_eq!(report.succeeded, vec!["BTCUSDT"]);
        assert!(report.failures.is_empty());
        assert_eq!(report.from_store.len(), 1);
        assert_eq!(report.from_store[0].symbol, "ETHUSDT");
        assert!(matches!(report.from_store[0].error, FetchError::Network(_)));
        assert_eq!(report.files_written, 5);
        assert!(report.discrepancies.is_empty());

        let manifest = RunManifest::load(dir.path()).unwrap();
        assert!(manifest.failures.is_empty());
        assert!(!manifest.entry("BTCUSDT").unwrap().from_store);
        let eth = manifest.entry("ETHUSDT").unwrap();
        assert!(eth.from_store);
        assert_eq!(eth.rows, 31);
        assert_eq!(&eth.data_hash, stored_hash);
    }

    #[test]
    fn fallback_needs_the_option_and_stored_files() {
        let source = FailingSource {
            mock: MockSource::new(42, Interval::Day1),
            failing: &["ETHUSDT"],
        };
        let universe = Universe::explicit(["ETHUSDT"]);

        // Files on disk, fallback off.
        let dir = TempDir::new().unwrap();
        let mock = MockSource::new(42, Interval::Day1);
        pipeline(&mock, dir.path()).run(&universe, &NoProgress);
        let report = pipeline(&source, dir.path()).run(&universe, &NoProgress);
        assert!(!report.is_success());
        assert!(report.from_store.is_empty());
        assert_eq!(report.failures.len(), 1);

        // Fallback on, nothing stored.
        let empty = TempDir::new().unwrap();
        let report = pipeline(&source, empty.path())
            .with_store_fallback(true)
            .run(&universe, &NoProgress);
        assert!(report.from_store.is_empty());
        assert_eq!(report.failures.len(), 1);
        let manifest = RunManifest::load(empty.path()).unwrap();
        assert!(manifest.symbols.is_empty());
        assert_eq!(manifest.failures[0].error, "network error: connection refused");
    }

    #[test]
    fn from_config_uses_configured_store_and_fields() {
        let dir = TempDir::new().unwrap();
        let mut config = CollectorConfig::default();
        config.storage.root = dir.path().join("ohlcv");
        config.storage.fields = vec![Field::Volume];
        config.range.end = NaiveDate::from_ymd_opt(2024, 1, 5);
        config.fetch.request_delay_ms = 0;
        config.fetch.fallback_to_store = true;

        let source = config.build_source().unwrap();
        let universe = config.resolve_universe(source.as_ref()).unwrap();
        let report = Pipeline::from_config(&config, source.as_ref()).run(&universe, &NoProgress);

        assert_eq!(report.files_written, 2);
        assert!(config.storage.root.join("volume").join("ETHUSDT.parquet").is_file());
        assert!(!config.storage.root.join("open").exists());

        let pipeline = Pipeline::from_config(&config, source.as_ref());
        assert!(pipeline.store_fallback);
        assert_eq!(pipeline.fields, vec![Field::Volume]);
    }
}
