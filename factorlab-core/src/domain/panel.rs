//! Panel: a (timestamp × instrument) grid of possibly-undefined values.
//!
//! Every factor operator consumes and produces panels. A panel is stored
//! column-major: one series per instrument, aligned to a shared, strictly
//! increasing timestamp axis. Undefined entries are `None`; operators never
//! coerce them to zero.

use super::bar::{Bar, Timestamp, OHLCV_FIELDS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// A factor value: `Some(v)` when defined, `None` when missing or undefined.
pub type Value = Option<f64>;

/// Wrap a computed number, mapping NaN and ±∞ to undefined.
#[inline]
pub fn defined(x: f64) -> Value {
    if x.is_finite() {
        Some(x)
    } else {
        None
    }
}

/// Errors from panel construction or domain checks.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PanelError {
    #[error("timestamps must be strictly increasing (violation at index {0})")]
    NonIncreasingTimestamps(usize),

    #[error("column count {columns} does not match instrument count {instruments}")]
    ColumnCount { columns: usize, instruments: usize },

    #[error("column for {instrument} has {len} rows, expected {expected}")]
    ColumnLength {
        instrument: String,
        len: usize,
        expected: usize,
    },

    #[error("duplicate instrument {0}")]
    DuplicateInstrument(String),

    #[error("index domains differ: {0}")]
    DomainMismatch(String),

    #[error("row has {got} values, expected {expected}")]
    RowWidth { got: usize, expected: usize },

    #[error("unknown field {0}")]
    UnknownField(String),
}

/// Time-indexed, instrument-indexed grid of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Panel {
    timestamps: Vec<Timestamp>,
    instruments: Vec<String>,
    columns: Vec<Vec<Value>>,
}

impl Panel {
    /// Build a panel, validating shape and timestamp ordering.
    pub fn new(
        timestamps: Vec<Timestamp>,
        instruments: Vec<String>,
        columns: Vec<Vec<Value>>,
    ) -> Result<Self, PanelError> {
        if let Some(i) = timestamps.windows(2).position(|w| w[1] <= w[0]) {
            return Err(PanelError::NonIncreasingTimestamps(i + 1));
        }
        if columns.len() != instruments.len() {
            return Err(PanelError::ColumnCount {
                columns: columns.len(),
                instruments: instruments.len(),
            });
        }
        for (i, name) in instruments.iter().enumerate() {
            if instruments[..i].contains(name) {
                return Err(PanelError::DuplicateInstrument(name.clone()));
            }
        }
        for (name, col) in instruments.iter().zip(&columns) {
            if col.len() != timestamps.len() {
                return Err(PanelError::ColumnLength {
                    instrument: name.clone(),
                    len: col.len(),
                    expected: timestamps.len(),
                });
            }
        }
        Ok(Self {
            timestamps,
            instruments,
            columns,
        })
    }

    /// Build from raw floats; NaN and ±∞ become undefined.
    pub fn from_f64(
        timestamps: Vec<Timestamp>,
        instruments: Vec<String>,
        columns: Vec<Vec<f64>>,
    ) -> Result<Self, PanelError> {
        let columns = columns
            .into_iter()
            .map(|c| c.into_iter().map(defined).collect())
            .collect();
        Self::new(timestamps, instruments, columns)
    }

    /// Single-instrument panel.
    pub fn from_series(
        instrument: impl Into<String>,
        timestamps: Vec<Timestamp>,
        values: Vec<Value>,
    ) -> Result<Self, PanelError> {
        Self::new(timestamps, vec![instrument.into()], vec![values])
    }

    /// Panel with every entry set to `value`.
    pub fn filled(timestamps: Vec<Timestamp>, instruments: Vec<String>, value: Value) -> Self {
        let columns = vec![vec![value; timestamps.len()]; instruments.len()];
        Self {
            timestamps,
            instruments,
            columns,
        }
    }

    /// Panel with no rows yet, for incremental appends.
    pub fn empty(instruments: Vec<String>) -> Self {
        let columns = vec![Vec::new(); instruments.len()];
        Self {
            timestamps: Vec::new(),
            instruments,
            columns,
        }
    }

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    /// Number of timestamps.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Number of instruments.
    pub fn width(&self) -> usize {
        self.instruments.len()
    }

    pub fn column(&self, index: usize) -> &[Value] {
        &self.columns[index]
    }

    pub fn columns(&self) -> &[Vec<Value>] {
        &self.columns
    }

    pub fn series(&self, instrument: &str) -> Option<&[Value]> {
        self.instrument_index(instrument)
            .map(|i| self.columns[i].as_slice())
    }

    pub fn instrument_index(&self, instrument: &str) -> Option<usize> {
        self.instruments.iter().position(|s| s == instrument)
    }

    pub fn get(&self, t: usize, instrument: usize) -> Value {
        self.columns
            .get(instrument)
            .and_then(|c| c.get(t))
            .copied()
            .flatten()
    }

    /// All instruments' values at timestamp index `t`.
    pub fn row(&self, t: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c[t]).collect()
    }

    /// Values at the latest timestamp, or all-undefined for an empty panel.
    pub fn last_row(&self) -> Vec<Value> {
        match self.len() {
            0 => vec![None; self.width()],
            n => self.row(n - 1),
        }
    }

    pub fn same_domain(&self, other: &Panel) -> bool {
        self.timestamps == other.timestamps && self.instruments == other.instruments
    }

    /// Fail with a structural error unless both panels share one index domain.
    pub fn check_domain(&self, other: &Panel) -> Result<(), PanelError> {
        if self.instruments != other.instruments {
            return Err(PanelError::DomainMismatch(format!(
                "instruments {:?} vs {:?}",
                self.instruments, other.instruments
            )));
        }
        if self.timestamps != other.timestamps {
            return Err(PanelError::DomainMismatch(format!(
                "{} timestamps vs {}",
                self.len(),
                other.len()
            )));
        }
        Ok(())
    }

    /// Same domain, new values.
    pub fn with_columns(&self, columns: Vec<Vec<Value>>) -> Self {
        debug_assert_eq!(columns.len(), self.width());
        Self {
            timestamps: self.timestamps.clone(),
            instruments: self.instruments.clone(),
            columns,
        }
    }

    /// Apply a time-series transform to every instrument's column.
    pub fn map_columns<E, F>(&self, f: F) -> Result<Panel, E>
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, E>,
    {
        let columns = self
            .columns
            .iter()
            .map(|c| f(c))
            .collect::<Result<Vec<_>, E>>()?;
        Ok(self.with_columns(columns))
    }

    /// Apply a two-input time-series transform column by column.
    /// The panels must share a domain.
    pub fn zip_columns<E, F>(&self, other: &Panel, f: F) -> Result<Panel, E>
    where
        E: From<PanelError>,
        F: Fn(&[Value], &[Value]) -> Result<Vec<Value>, E>,
    {
        self.check_domain(other)?;
        let columns = self
            .columns
            .iter()
            .zip(&other.columns)
            .map(|(a, b)| f(a, b))
            .collect::<Result<Vec<_>, E>>()?;
        Ok(self.with_columns(columns))
    }

    /// Apply a cross-sectional transform to every timestamp's row.
    pub fn map_rows<E, F>(&self, f: F) -> Result<Panel, E>
    where
        F: Fn(&[Value]) -> Result<Vec<Value>, E>,
    {
        let mut columns = vec![Vec::with_capacity(self.len()); self.width()];
        for t in 0..self.len() {
            let out = f(&self.row(t))?;
            for (col, v) in columns.iter_mut().zip(out) {
                col.push(v);
            }
        }
        Ok(self.with_columns(columns))
    }

    /// Elementwise map over defined values; undefined stays undefined.
    pub fn map_values<F>(&self, f: F) -> Panel
    where
        F: Fn(f64) -> Value,
    {
        let columns = self
            .columns
            .iter()
            .map(|c| c.iter().map(|v| v.and_then(&f)).collect())
            .collect();
        self.with_columns(columns)
    }

    /// Elementwise combination of two same-domain panels. Undefined if either side is.
    pub fn combine<F>(&self, other: &Panel, f: F) -> Result<Panel, PanelError>
    where
        F: Fn(f64, f64) -> Value,
    {
        self.check_domain(other)?;
        let columns = self
            .columns
            .iter()
            .zip(&other.columns)
            .map(|(a, b)| {
                a.iter()
                    .zip(b)
                    .map(|(x, y)| match (x, y) {
                        (Some(x), Some(y)) => f(*x, *y),
                        _ => None,
                    })
                    .collect()
            })
            .collect();
        Ok(self.with_columns(columns))
    }

    /// The trailing `n` timestamps.
    pub fn tail(&self, n: usize) -> Panel {
        let start = self.len().saturating_sub(n);
        Self {
            timestamps: self.timestamps[start..].to_vec(),
            instruments: self.instruments.clone(),
            columns: self.columns.iter().map(|c| c[start..].to_vec()).collect(),
        }
    }

    /// Append one timestamp row. The timestamp must be later than every existing one.
    pub fn push_row(&mut self, timestamp: Timestamp, values: Vec<Value>) -> Result<(), PanelError> {
        if values.len() != self.width() {
            return Err(PanelError::RowWidth {
                got: values.len(),
                expected: self.width(),
            });
        }
        if let Some(last) = self.timestamps.last() {
            if timestamp <= *last {
                return Err(PanelError::NonIncreasingTimestamps(self.len()));
            }
        }
        self.timestamps.push(timestamp);
        for (col, v) in self.columns.iter_mut().zip(values) {
            col.push(v);
        }
        Ok(())
    }

    /// Drop the oldest rows so that at most `n` remain.
    pub fn truncate_front(&mut self, n: usize) {
        let excess = self.len().saturating_sub(n);
        if excess == 0 {
            return;
        }
        self.timestamps.drain(..excess);
        for col in &mut self.columns {
            col.drain(..excess);
        }
    }
}

/// Named field panels sharing one index domain (open/high/low/close/volume + extras).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelSet {
    instruments: Vec<String>,
    timestamps: Vec<Timestamp>,
    fields: BTreeMap<String, Panel>,
}

impl PanelSet {
    pub fn new(instruments: Vec<String>) -> Self {
        let fields = OHLCV_FIELDS
            .iter()
            .map(|f| (f.to_string(), Panel::empty(instruments.clone())))
            .collect();
        Self {
            instruments,
            timestamps: Vec::new(),
            fields,
        }
    }

    /// Build a history from per-tick bar maps (tick order).
    pub fn from_bars<'a, I>(instruments: Vec<String>, ticks: I) -> Result<Self, PanelError>
    where
        I: IntoIterator<Item = (Timestamp, &'a BTreeMap<String, Bar>)>,
    {
        let mut set = Self::new(instruments);
        for (ts, bars) in ticks {
            set.push_bars(ts, bars)?;
        }
        Ok(set)
    }

    pub fn instruments(&self) -> &[String] {
        &self.instruments
    }

    pub fn timestamps(&self) -> &[Timestamp] {
        &self.timestamps
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn field(&self, name: &str) -> Result<&Panel, PanelError> {
        self.fields
            .get(name)
            .ok_or_else(|| PanelError::UnknownField(name.to_string()))
    }

    /// Insert or replace a derived field. It must share the set's domain.
    pub fn insert_field(&mut self, name: impl Into<String>, panel: Panel) -> Result<(), PanelError> {
        if panel.instruments() != self.instruments.as_slice()
            || panel.timestamps() != self.timestamps.as_slice()
        {
            return Err(PanelError::DomainMismatch("field domain differs from set".into()));
        }
        self.fields.insert(name.into(), panel);
        Ok(())
    }

    /// Append one tick of bars. Missing instruments and missing extra fields
    /// become undefined; new extra fields are backfilled as undefined.
    pub fn push_bars(&mut self, timestamp: Timestamp, bars: &BTreeMap<String, Bar>) -> Result<(), PanelError> {
        for bar in bars.values() {
            for name in bar.fields.keys() {
                if !self.fields.contains_key(name) {
                    let blank = Panel::filled(self.timestamps.clone(), self.instruments.clone(), None);
                    self.fields.insert(name.clone(), blank);
                }
            }
        }
        for (name, panel) in self.fields.iter_mut() {
            let row = self
                .instruments
                .iter()
                .map(|inst| {
                    bars.get(inst)
                        .filter(|b| !b.is_void())
                        .and_then(|b| b.field(name))
                        .and_then(defined)
                })
                .collect();
            panel.push_row(timestamp, row)?;
        }
        self.timestamps.push(timestamp);
        Ok(())
    }

    /// Keep at most the trailing `n` rows.
    pub fn truncate_front(&mut self, n: usize) {
        let excess = self.len().saturating_sub(n);
        if excess == 0 {
            return;
        }
        self.timestamps.drain(..excess);
        for panel in self.fields.values_mut() {
            panel.truncate_front(n);
        }
    }

    /// The latest defined value of `field` for `instrument`.
    pub fn last_value(&self, field: &str, instrument: &str) -> Value {
        let panel = self.fields.get(field)?;
        let series = panel.series(instrument)?;
        series.iter().rev().find_map(|v| *v)
    }
}
