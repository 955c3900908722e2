//! Parquet field store.
//!
//! Layout: `{root}/{field}/{SYMBOL}.parquet`, one file per (field, symbol).
//! Each file is a two-column table, `timestamp` (UTC epoch milliseconds,
//! `Datetime(ms)`) and `<field>` (`Float64`), in the row order given.
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Overwrite-in-full: a rewrite replaces the file, never appends
//! - Read-back through the same path convention, schema-checked

use crate::domain::{is_valid_symbol, Candle, Field, FieldSeries, SeriesPoint, Symbol};
use chrono::DateTime;
use polars::prelude::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const TIMESTAMP_COLUMN: &str = "timestamp";

/// Errors from reading or writing stored field files.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid symbol '{0}': expected ASCII letters and digits only")]
    InvalidSymbol(String),

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parquet error at {}: {message}", .path.display())]
    Parquet { path: PathBuf, message: String },

    #[error("schema error in {}: {message}", .path.display())]
    Schema { path: PathBuf, message: String },

    #[error("encoding error at {}: {message}", .path.display())]
    Encode { path: PathBuf, message: String },

    #[error("no stored data at {}", .path.display())]
    NotFound { path: PathBuf },
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            StorageError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Per-field Parquet storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct FieldStore {
    root: PathBuf,
}

impl FieldStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding every symbol's file for one field: `{root}/{field}/`
    pub fn field_dir(&self, field: Field) -> PathBuf {
        self.root.join(field.as_str())
    }

    /// Storage path for a (field, symbol) pair: `{root}/{field}/{symbol}.parquet`
    pub fn path(&self, field: Field, symbol: &str) -> PathBuf {
        self.field_dir(field).join(format!("{symbol}.parquet"))
    }

    pub fn exists(&self, symbol: &str, field: Field) -> bool {
        self.path(field, symbol).is_file()
    }

    /// Write a field series, replacing any existing file.
    ///
    /// Parent directories are created as needed. The table is written to a
    /// temporary sibling and renamed into place.
    pub fn write(
        &self,
        symbol: &str,
        field: Field,
        series: &FieldSeries,
    ) -> Result<PathBuf, StorageError> {
        if !is_valid_symbol(symbol) {
            return Err(StorageError::InvalidSymbol(symbol.to_string()));
        }

        let dir = self.field_dir(field);
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

        let path = self.path(field, symbol);
        let tmp_path = path.with_extension("parquet.tmp");
        let mut df = series_to_dataframe(field, series, &path)?;

        if let Err(e) = write_parquet(&mut df, &tmp_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StorageError::io(&path, e)
        })?;

        Ok(path)
    }

    /// Read a field series back from its storage path.
    ///
    /// Null values read back as NaN; a null timestamp is a schema error.
    pub fn read(&self, symbol: &str, field: Field) -> Result<FieldSeries, StorageError> {
        if !is_valid_symbol(symbol) {
            return Err(StorageError::InvalidSymbol(symbol.to_string()));
        }
        let path = self.path(field, symbol);
        let df = read_parquet(&path)?;
        dataframe_to_series(&df, field, &path)
    }

    /// Rejoin the five field files of a symbol into candles.
    ///
    /// All five files must exist and agree on their timestamps row by row.
    pub fn load_candles(&self, symbol: &str) -> Result<Vec<Candle>, StorageError> {
        let [open, high, low, close, volume] =
            Field::ALL.map(|field| self.read(symbol, field));
        let (open, high, low, close, volume) = (open?, high?, low?, close?, volume?);

        for (field, series) in [
            (Field::High, &high),
            (Field::Low, &low),
            (Field::Close, &close),
            (Field::Volume, &volume),
        ] {
            let aligned = series.len() == open.len()
                && series
                    .points
                    .iter()
                    .zip(&open.points)
                    .all(|(a, b)| a.timestamp == b.timestamp);
            if !aligned {
                return Err(StorageError::Schema {
                    path: self.path(field, symbol),
                    message: format!(
                        "timestamps disagree with {}",
                        self.path(Field::Open, symbol).display()
                    ),
                });
            }
        }

        Ok(open
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| Candle {
                open_time: p.timestamp,
                open: p.value,
                high: high.points[i].value,
                low: low.points[i].value,
                close: close.points[i].value,
                volume: volume.points[i].value,
            })
            .collect())
    }

    /// Symbols stored for a field, sorted. Empty if the field directory is absent.
    pub fn list_symbols(&self, field: Field) -> Result<Vec<Symbol>, StorageError> {
        let dir = self.field_dir(field);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&dir, e)),
        };

        let mut symbols = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StorageError::io(&dir, e))?.path();
            // Skip leftovers (.parquet.tmp) and anything else that isn't a field file
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if is_valid_symbol(stem) {
                    symbols.push(stem.to_string());
                }
            }
        }
        symbols.sort();
        Ok(symbols)
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

/// Convert a field series to a two-column DataFrame.
fn series_to_dataframe(
    field: Field,
    series: &FieldSeries,
    path: &Path,
) -> Result<DataFrame, StorageError> {
    let encode_err = |e: PolarsError| StorageError::Encode {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let millis: Vec<i64> = series
        .points
        .iter()
        .map(|p| p.timestamp.timestamp_millis())
        .collect();
    let values: Vec<f64> = series.points.iter().map(|p| p.value).collect();

    DataFrame::new(vec![
        Column::new(TIMESTAMP_COLUMN.into(), millis)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .map_err(encode_err)?,
        Column::new(field.as_str().into(), values),
    ])
    .map_err(encode_err)
}

/// Write a DataFrame to a Parquet file.
fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), StorageError> {
    let file = fs::File::create(path).map_err(|e| StorageError::io(path, e))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| StorageError::Parquet {
            path: path.to_path_buf(),
            message: format!("write: {e}"),
        })?;
    Ok(())
}

/// Read a Parquet file into a DataFrame.
fn read_parquet(path: &Path) -> Result<DataFrame, StorageError> {
    let file = fs::File::open(path).map_err(|e| StorageError::io(path, e))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| StorageError::Parquet {
            path: path.to_path_buf(),
            message: format!("read: {e}"),
        })
}

/// Convert a two-column DataFrame back into a field series.
fn dataframe_to_series(
    df: &DataFrame,
    field: Field,
    path: &Path,
) -> Result<FieldSeries, StorageError> {
    let schema_err = |message: String| StorageError::Schema {
        path: path.to_path_buf(),
        message,
    };

    let ts_col = df
        .column(TIMESTAMP_COLUMN)
        .map_err(|_| schema_err(format!("missing column '{TIMESTAMP_COLUMN}'")))?;
    if !matches!(ts_col.dtype(), DataType::Datetime(_, _)) {
        return Err(schema_err(format!(
            "column '{TIMESTAMP_COLUMN}' has type {}, expected datetime",
            ts_col.dtype()
        )));
    }
    let value_col = df
        .column(field.as_str())
        .map_err(|_| schema_err(format!("missing column '{field}'")))?;

    // Normalise to milliseconds regardless of the unit the file was written with.
    let ts_ms = ts_col
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
        .and_then(|c| c.cast(&DataType::Int64))
        .map_err(|e| schema_err(format!("timestamp cast: {e}")))?;
    let ts_ca = ts_ms
        .i64()
        .map_err(|e| schema_err(format!("timestamp column type: {e}")))?;
    let value_ca = value_col
        .f64()
        .map_err(|e| schema_err(format!("column '{field}' type: {e}")))?;

    let mut points = Vec::with_capacity(df.height());
    for (i, (ts, value)) in ts_ca.into_iter().zip(value_ca).enumerate() {
        let ms = ts.ok_or_else(|| schema_err(format!("null timestamp at row {i}")))?;
        let timestamp = DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| schema_err(format!("timestamp out of range at row {i}: {ms}")))?;
        points.push(SeriesPoint {
            timestamp,
            value: value.unwrap_or(f64::NAN),
        });
    }

    Ok(FieldSeries::new(points))
}
