//! Bar: one instrument's OHLCV observation at one simulation timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Simulation timestamp. Every clock tick is one of these.
pub type Timestamp = DateTime<Utc>;

/// OHLCV bar for a single instrument at a single tick.
///
/// `fields` carries optional point-in-time fundamentals (e.g. `"book_to_price"`),
/// addressable by name alongside the OHLCV columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: Timestamp,
    pub instrument: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, f64>,
}

impl Bar {
    pub fn new(
        timestamp: Timestamp,
        instrument: impl Into<String>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            instrument: instrument.into(),
            open,
            high,
            low,
            close,
            volume,
            fields: BTreeMap::new(),
        }
    }

    /// Attach a named fundamental field.
    pub fn with_field(mut self, name: impl Into<String>, value: f64) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Look up a column by name: the OHLCV names first, then extra fields.
    pub fn field(&self, name: &str) -> Option<f64> {
        match name {
            "open" => Some(self.open),
            "high" => Some(self.high),
            "low" => Some(self.low),
            "close" => Some(self.close),
            "volume" => Some(self.volume),
            other => self.fields.get(other).copied(),
        }
    }

    /// (high + low + close) / 3.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Returns true if any OHLC field is non-finite.
    pub fn is_void(&self) -> bool {
        !(self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite())
    }

    /// Basic OHLCV sanity: high bounds everything, low is bounded by everything,
    /// prices positive, volume non-negative.
    pub fn is_sane(&self) -> bool {
        if self.is_void() || !self.volume.is_finite() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.low > 0.0
            && self.volume >= 0.0
    }
}

/// Names of the built-in bar columns, in panel order.
pub const OHLCV_FIELDS: [&str; 5] = ["open", "high", "low", "close", "volume"];

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_bar() -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            "AAA",
            100.0,
            105.0,
            98.0,
            103.0,
            50_000.0,
        )
    }

    #[test]
    fn bar_is_sane() {
        assert!(sample_bar().is_sane());
    }

    #[test]
    fn bar_with_inverted_range_is_not_sane() {
        let mut bar = sample_bar();
        bar.high = 90.0;
        assert!(!bar.is_sane());
    }

    #[test]
    fn nan_bar_is_void() {
        let mut bar = sample_bar();
        bar.close = f64::NAN;
        assert!(bar.is_void());
        assert!(!bar.is_sane());
    }

    #[test]
    fn field_lookup_covers_ohlcv_and_extras() {
        let bar = sample_bar().with_field("book_to_price", 0.7);
        assert_eq!(bar.field("close"), Some(103.0));
        assert_eq!(bar.field("volume"), Some(50_000.0));
        assert_eq!(bar.field("book_to_price"), Some(0.7));
        assert_eq!(bar.field("missing"), None);
    }

    #[test]
    fn typical_price() {
        let bar = sample_bar();
        assert!((bar.typical_price() - (105.0 + 98.0 + 103.0) / 3.0).abs() < 1e-12);
    }
}
