//! Market data provider interface.
//!
//! The engine asks a provider for the simulation clock once, then for the bars
//! visible at each tick. Point-in-time correctness is the provider's contract:
//! no bar returned for tick `t` may carry a timestamp after `t`. The engine
//! checks this and halts the run rather than trade on future data.

use crate::domain::{Bar, Timestamp};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error("data provider unavailable: {0}")]
    Unavailable(String),

    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("invalid market data: {0}")]
    InvalidData(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Clock granularity. The timeline keeps the last data timestamp in each period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Minute,
    Hourly,
    #[default]
    Daily,
    Weekly,
}

impl Frequency {
    pub fn step(self) -> Duration {
        match self {
            Frequency::Minute => Duration::minutes(1),
            Frequency::Hourly => Duration::hours(1),
            Frequency::Daily => Duration::days(1),
            Frequency::Weekly => Duration::weeks(1),
        }
    }

    /// Period index of a timestamp.
    pub fn bucket(self, ts: Timestamp) -> i64 {
        ts.timestamp().div_euclid(self.step().num_seconds())
    }

    /// Thin a sorted timestamp list to the last timestamp of each period.
    pub fn sample(self, timestamps: &[Timestamp]) -> Vec<Timestamp> {
        let mut out: Vec<Timestamp> = Vec::new();
        for &ts in timestamps {
            match out.last_mut() {
                Some(last) if self.bucket(*last) == self.bucket(ts) => *last = ts,
                _ => out.push(ts),
            }
        }
        out
    }
}

/// What a run asks the provider for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    pub instruments: Vec<String>,
    #[serde(default)]
    pub start: Option<Timestamp>,
    #[serde(default)]
    pub end: Option<Timestamp>,
    #[serde(default)]
    pub frequency: Frequency,
}

impl DataRequest {
    pub fn new(instruments: Vec<String>) -> Self {
        Self {
            instruments,
            start: None,
            end: None,
            frequency: Frequency::default(),
        }
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }
}

pub trait MarketDataProvider: Send + Sync {
    /// Strictly increasing simulation timestamps for the request.
    fn timeline(&self, request: &DataRequest) -> Result<Vec<Timestamp>, ProviderError>;

    /// Bars for `instruments` visible at `ts`. Instruments without a bar are absent.
    fn bars_at(&self, instruments: &[String], ts: Timestamp) -> Result<BTreeMap<String, Bar>, ProviderError>;

    /// Every instrument the provider can serve, sorted. Empty when unknown.
    fn universe(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Provider over bars held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    bars: BTreeMap<Timestamp, BTreeMap<String, Bar>>,
}

impl InMemoryProvider {
    /// Duplicate `(timestamp, instrument)` pairs are refused.
    pub fn from_bars<I>(bars: I) -> Result<Self, ProviderError>
    where
        I: IntoIterator<Item = Bar>,
    {
        let mut by_ts: BTreeMap<Timestamp, BTreeMap<String, Bar>> = BTreeMap::new();
        for bar in bars {
            let slot = by_ts.entry(bar.timestamp).or_default();
            if slot.contains_key(&bar.instrument) {
                return Err(ProviderError::InvalidData(format!(
                    "duplicate bar for {} at {}",
                    bar.instrument, bar.timestamp
                )));
            }
            slot.insert(bar.instrument.clone(), bar);
        }
        Ok(Self { bars: by_ts })
    }

    /// Every instrument with at least one bar, sorted.
    pub fn instruments(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .bars
            .values()
            .flat_map(|m| m.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn bar_count(&self) -> usize {
        self.bars.values().map(BTreeMap::len).sum()
    }

    /// Every bar of one instrument, in time order.
    pub fn series(&self, instrument: &str) -> Vec<&Bar> {
        self.bars.values().filter_map(|m| m.get(instrument)).collect()
    }
}

impl MarketDataProvider for InMemoryProvider {
    fn timeline(&self, request: &DataRequest) -> Result<Vec<Timestamp>, ProviderError> {
        let stamps: Vec<Timestamp> = self
            .bars
            .iter()
            .filter(|(ts, m)| {
                request.contains(**ts) && request.instruments.iter().any(|i| m.contains_key(i))
            })
            .map(|(ts, _)| *ts)
            .collect();
        Ok(request.frequency.sample(&stamps))
    }

    fn bars_at(&self, instruments: &[String], ts: Timestamp) -> Result<BTreeMap<String, Bar>, ProviderError> {
        let Some(slot) = self.bars.get(&ts) else {
            return Ok(BTreeMap::new());
        };
        Ok(instruments
            .iter()
            .filter_map(|i| slot.get(i).map(|b| (i.clone(), b.clone())))
            .collect())
    }

    fn universe(&self) -> Vec<String> {
        self.instruments()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar(day: u32, hour: u32, instrument: &str) -> Bar {
        Bar::new(
            Utc.with_ymd_and_hms(2024, 1, day, hour, 0, 0).unwrap(),
            instrument,
            10.0,
            11.0,
            9.0,
            10.5,
            100.0,
        )
    }

    #[test]
    fn timeline_respects_range_and_instruments() {
        let p = InMemoryProvider::from_bars(vec![bar(1, 0, "A"), bar(2, 0, "A"), bar(3, 0, "B")]).unwrap();
        let mut req = DataRequest::new(vec!["A".into()]);
        assert_eq!(p.timeline(&req).unwrap().len(), 2);
        req.start = Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        assert_eq!(p.timeline(&req).unwrap().len(), 1);
    }

    #[test]
    fn daily_frequency_keeps_last_intraday_stamp() {
        let p = InMemoryProvider::from_bars(vec![bar(1, 10, "A"), bar(1, 15, "A"), bar(2, 10, "A")]).unwrap();
        let mut req = DataRequest::new(vec!["A".into()]);
        let daily = p.timeline(&req).unwrap();
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0], Utc.with_ymd_and_hms(2024, 1, 1, 15, 0, 0).unwrap());
        req.frequency = Frequency::Hourly;
        assert_eq!(p.timeline(&req).unwrap().len(), 3);
    }

    #[test]
    fn bars_at_filters_instruments() {
        let p = InMemoryProvider::from_bars(vec![bar(1, 0, "A"), bar(1, 0, "B")]).unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let got = p.bars_at(&["B".to_string()], ts).unwrap();
        assert_eq!(got.keys().collect::<Vec<_>>(), vec!["B"]);
        assert!(p.bars_at(&["A".to_string()], ts + Duration::days(9)).unwrap().is_empty());
    }

    #[test]
    fn duplicate_bars_are_refused() {
        assert!(InMemoryProvider::from_bars(vec![bar(1, 0, "A"), bar(1, 0, "A")]).is_err());
    }
}
