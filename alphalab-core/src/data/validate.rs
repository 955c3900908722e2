//! Post-write verification of the field store.
//!
//! Checks every expected (symbol, field) file and reports what is wrong with
//! it. Findings are plain data; nothing here repairs or rewrites files.

use super::store::{FieldStore, StorageError};
use super::universe::Universe;
use crate::domain::{Field, FieldSeries, Symbol};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// What kind of problem a discrepancy describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    MissingFile,
    Unreadable,
    Empty,
    NonMonotonicTimestamp,
    NonFiniteValue,
    NonPositivePrice,
    NegativeVolume,
    RowCountMismatch,
}

impl DiscrepancyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DiscrepancyKind::MissingFile => "missing file",
            DiscrepancyKind::Unreadable => "unreadable",
            DiscrepancyKind::Empty => "empty",
            DiscrepancyKind::NonMonotonicTimestamp => "non-monotonic timestamp",
            DiscrepancyKind::NonFiniteValue => "non-finite value",
            DiscrepancyKind::NonPositivePrice => "non-positive price",
            DiscrepancyKind::NegativeVolume => "negative volume",
            DiscrepancyKind::RowCountMismatch => "row count mismatch",
        }
    }
}

impl fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding for a (symbol, field) file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discrepancy {
    pub symbol: Symbol,
    pub field: Field,
    pub kind: DiscrepancyKind,
    pub detail: String,
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}: {}", self.field, self.symbol, self.kind, self.detail)
    }
}

/// Checks stored files against the expected universe and field set.
pub struct Validator<'a> {
    store: &'a FieldStore,
}

impl<'a> Validator<'a> {
    pub fn new(store: &'a FieldStore) -> Self {
        Self { store }
    }

    /// Verify every (symbol, field) pair. Returns an empty list when all files are sound.
    pub fn verify(&self, symbols: &[Symbol], fields: &[Field]) -> Vec<Discrepancy> {
        let mut found = Vec::new();
        for symbol in symbols {
            found.extend(self.verify_symbol(symbol, fields));
        }
        if found.is_empty() {
            debug!(symbols = symbols.len(), fields = fields.len(), "verification clean");
        } else {
            warn!(count = found.len(), "verification found discrepancies");
        }
        found
    }

    pub fn verify_universe(&self, universe: &Universe, fields: &[Field]) -> Vec<Discrepancy> {
        self.verify(universe.symbols(), fields)
    }

    fn verify_symbol(&self, symbol: &str, fields: &[Field]) -> Vec<Discrepancy> {
        let mut found = Vec::new();
        let mut row_counts = Vec::new();

        for &field in fields {
            let report = |kind, detail: String| Discrepancy {
                symbol: symbol.to_string(),
                field,
                kind,
                detail,
            };

            let series = match self.store.read(symbol, field) {
                Ok(series) => series,
                Err(StorageError::NotFound { path }) => {
                    found.push(report(
                        DiscrepancyKind::MissingFile,
                        format!("{} does not exist", path.display()),
                    ));
                    continue;
                }
                Err(e) => {
                    found.push(report(DiscrepancyKind::Unreadable, e.to_string()));
                    continue;
                }
            };

            row_counts.push((field, series.len()));
            if series.is_empty() {
                found.push(report(DiscrepancyKind::Empty, "file has no rows".into()));
                continue;
            }

            found.extend(
                check_series(field, &series)
                    .into_iter()
                    .map(|(kind, detail)| report(kind, detail)),
            );
        }

        if let Some(detail) = row_count_mismatch(&row_counts) {
            if let Some(&first) = fields.first() {
                found.push(Discrepancy {
                    symbol: symbol.to_string(),
                    field: first,
                    kind: DiscrepancyKind::RowCountMismatch,
                    detail,
                });
            }
        }
        found
    }
}

/// Content checks on a non-empty series. At most one finding per kind.
fn check_series(field: Field, series: &FieldSeries) -> Vec<(DiscrepancyKind, String)> {
    let mut found = Vec::new();
    let points = &series.points;

    let mut out_of_order = 0usize;
    let mut first_out_of_order = None;
    for (i, w) in points.windows(2).enumerate() {
        if w[1].timestamp <= w[0].timestamp {
            out_of_order += 1;
            first_out_of_order.get_or_insert(i + 1);
        }
    }
    if let Some(row) = first_out_of_order {
        found.push((
            DiscrepancyKind::NonMonotonicTimestamp,
            format!(
                "row {row} ({}) does not follow row {} ({}); {out_of_order} offending row(s)",
                points[row].timestamp,
                row - 1,
                points[row - 1].timestamp
            ),
        ));
    }

    if let Some((row, count)) = first_and_count(series, |v| !v.is_finite()) {
        found.push((
            DiscrepancyKind::NonFiniteValue,
            format!("{count} missing or non-finite value(s), first at row {row}"),
        ));
    }

    if field.is_price() {
        if let Some((row, count)) = first_and_count(series, |v| v.is_finite() && v <= 0.0) {
            found.push((
                DiscrepancyKind::NonPositivePrice,
                format!("{count} price(s) <= 0, first at row {row}"),
            ));
        }
    } else if let Some((row, count)) = first_and_count(series, |v| v.is_finite() && v < 0.0) {
        found.push((
            DiscrepancyKind::NegativeVolume,
            format!("{count} negative volume(s), first at row {row}"),
        ));
    }

    found
}

/// First matching row index and number of matching rows.
fn first_and_count(series: &FieldSeries, pred: impl Fn(f64) -> bool) -> Option<(usize, usize)> {
    let mut hits = series
        .points
        .iter()
        .enumerate()
        .filter(|(_, p)| pred(p.value))
        .map(|(i, _)| i);
    let first = hits.next()?;
    Some((first, 1 + hits.count()))
}

fn row_count_mismatch(row_counts: &[(Field, usize)]) -> Option<String> {
    let (_, expected) = *row_counts.first()?;
    if row_counts.iter().all(|&(_, n)| n == expected) {
        return None;
    }
    let listed: Vec<String> = row_counts
        .iter()
        .map(|(field, n)| format!("{field}={n}"))
        .collect();
    Some(format!("fields disagree on row count: {}", listed.join(", ")))
}
