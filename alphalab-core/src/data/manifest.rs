//! Run manifest: `{root}/manifest.json`, written after every collection run.
//!
//! Records where the data came from and a BLAKE3 content hash per symbol so a
//! later run (or a notebook) can tell whether stored data changed.

use super::download::FetchedSymbol;
use super::store::StorageError;
use crate::domain::{Field, Interval, Symbol, TimeRange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Per-symbol entry for a symbol whose files are on disk after the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolEntry {
    pub symbol: Symbol,
    pub rows: usize,
    pub first_timestamp: Option<DateTime<Utc>>,
    pub last_timestamp: Option<DateTime<Utc>>,
    pub data_hash: String,
    /// Fetch failed; the entry describes previously stored files.
    #[serde(default)]
    pub from_store: bool,
}

/// A symbol that could not be fetched or written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub symbol: Symbol,
    pub attempts: u32,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub interval: Interval,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    pub fields: Vec<Field>,
    pub symbols: Vec<SymbolEntry>,
    pub failures: Vec<FailureEntry>,
}

impl RunManifest {
    /// Empty manifest for a run; symbols and failures are recorded as the run goes.
    pub fn new(source: &str, interval: Interval, range: &TimeRange, fields: &[Field]) -> Self {
        Self {
            created_at: Utc::now(),
            source: source.to_string(),
            interval,
            range_start: range.start,
            range_end: range.end,
            fields: fields.to_vec(),
            symbols: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Record a symbol whose field files are on disk.
    pub fn record_stored(&mut self, stored: &FetchedSymbol, from_store: bool) {
        self.symbols.push(symbol_entry(stored, from_store));
    }

    pub fn record_failure(&mut self, symbol: &str, attempts: u32, error: impl ToString) {
        self.failures.push(FailureEntry {
            symbol: symbol.to_string(),
            attempts,
            error: error.to_string(),
        });
    }

    pub fn path(root: &Path) -> PathBuf {
        root.join(MANIFEST_FILE)
    }

    /// Write `{root}/manifest.json`, replacing any previous manifest.
    pub fn write(&self, root: &Path) -> Result<PathBuf, StorageError> {
        let path = Self::path(root);
        let json = serde_json::to_string_pretty(self).map_err(|e| StorageError::Encode {
            path: path.clone(),
            message: format!("manifest serialization: {e}"),
        })?;

        fs::create_dir_all(root).map_err(|e| StorageError::io(root, e))?;
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| StorageError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StorageError::io(&path, e)
        })?;
        Ok(path)
    }

    /// Load the last manifest under `root`.
    pub fn load(root: &Path) -> Result<Self, StorageError> {
        let path = Self::path(root);
        let content = fs::read_to_string(&path).map_err(|e| StorageError::io(&path, e))?;
        serde_json::from_str(&content).map_err(|e| StorageError::Schema {
            path,
            message: format!("manifest is not valid JSON: {e}"),
        })
    }

    pub fn entry(&self, symbol: &str) -> Option<&SymbolEntry> {
        self.symbols.iter().find(|e| e.symbol == symbol)
    }
}

fn symbol_entry(fetched: &FetchedSymbol, from_store: bool) -> SymbolEntry {
    let reference = fetched.series.values().next();
    SymbolEntry {
        symbol: fetched.symbol.clone(),
        rows: fetched.rows(),
        first_timestamp: reference.and_then(|s| s.first_timestamp()),
        last_timestamp: reference.and_then(|s| s.last_timestamp()),
        data_hash: content_hash(fetched),
        from_store,
    }
}

/// BLAKE3 over every field's `(timestamp_ms, value_bits)` pairs in field order.
pub fn content_hash(fetched: &FetchedSymbol) -> String {
    let mut hasher = blake3::Hasher::new();
    for (field, series) in &fetched.series {
        hasher.update(field.as_str().as_bytes());
        for point in &series.points {
            hasher.update(&point.timestamp.timestamp_millis().to_le_bytes());
            hasher.update(&point.value.to_bits().to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mock::MockSource;
    use crate::data::provider::FetchError;
    use crate::domain::FieldSeries;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn range() -> TimeRange {
        TimeRange::from_dates(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
        )
    }

    fn fetched(symbol: &str, seed: u64) -> FetchedSymbol {
        let candles = MockSource::new(seed, Interval::Day1).generate(symbol, &range());
        let series: BTreeMap<Field, FieldSeries> = [Field::Open, Field::Close]
            .into_iter()
            .map(|f| (f, FieldSeries::project(&candles, f)))
            .collect();
        FetchedSymbol {
            symbol: symbol.to_string(),
            attempts: 1,
            series,
        }
    }

    fn manifest(fields: &[Field]) -> RunManifest {
        let mut m = RunManifest::new("mock", Interval::Day1, &range(), fields);
        m.record_stored(&fetched("BTCUSDT", 1), false);
        m.record_stored(&fetched("ETHUSDT", 1), true);
        m.record_failure("DOTUSDT", 4, FetchError::Network("timed out".into()));
        m
    }

    #[test]
    fn entries_describe_recorded_data() {
        let m = manifest(&[Field::Open, Field::Close]);
        let btc = m.entry("BTCUSDT").unwrap();
        assert_eq!(btc.rows, 7);
        assert_eq!(btc.first_timestamp, Some(range().start));
        assert_eq!(btc.data_hash.len(), 64);
        assert!(!btc.from_store);
        assert!(m.entry("ETHUSDT").unwrap().from_store);
        assert!(m.entry("DOTUSDT").is_none());
        assert_eq!(m.failures[0].symbol, "DOTUSDT");
        assert_eq!(m.failures[0].error, "network error: timed out");
    }

    #[test]
    fn entries_without_store_flag_still_load() {
        let json = r#"{"symbol":"BTCUSDT","rows":3,"first_timestamp":null,
            "last_timestamp":null,"data_hash":"00"}"#;
        let entry: SymbolEntry = serde_json::from_str(json).unwrap();
        assert!(!entry.from_store);
    }

    #[test]
    fn hash_tracks_content() {
        assert_eq!(content_hash(&fetched("BTCUSDT", 1)), content_hash(&fetched("BTCUSDT", 1)));
        assert_ne!(content_hash(&fetched("BTCUSDT", 1)), content_hash(&fetched("BTCUSDT", 2)));
    }

    #[test]
    fn write_then_load() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("ohlcv");
        let m = manifest(&[Field::Open]);

        let path = m.write(&root).unwrap();
        assert_eq!(path, root.join("manifest.json"));
        assert!(!root.join("manifest.json.tmp").exists());
        assert_eq!(RunManifest::load(&root).unwrap(), m);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"interval\": \"1d\""));
    }

    #[test]
    fn load_missing_or_corrupt() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            RunManifest::load(dir.path()),
            Err(StorageError::NotFound { .. })
        ));
        fs::write(dir.path().join(MANIFEST_FILE), "{not json").unwrap();
        assert!(matches!(
            RunManifest::load(dir.path()),
            Err(StorageError::Schema { .. })
        ));
    }
}
