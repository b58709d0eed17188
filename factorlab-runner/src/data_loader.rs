//! Market data for the runner: long-format CSV files and synthetic bars.
//!
//! CSV layout is one bar per row:
//! `timestamp,instrument,open,high,low,close,volume[,extra...]`.
//! Timestamps are RFC 3339 or plain `YYYY-MM-DD` dates (midnight UTC). Extra
//! columns become named bar fields; an empty cell leaves the field undefined
//! for that bar.
//!
//! Synthetic data is a seeded geometric random walk. Each instrument draws
//! from its own stream of the run's RNG hierarchy, so adding an instrument
//! does not change the others' paths.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, info};

use factorlab_core::domain::{Bar, PanelSet, Timestamp, OHLCV_FIELDS};
use factorlab_core::engine::{DataRequest, Frequency, InMemoryProvider, MarketDataProvider, ProviderError};
use factorlab_core::rng::{streams, RngHierarchy};

const REQUIRED_COLUMNS: [&str; 7] = ["timestamp", "instrument", "open", "high", "low", "close", "volume"];

/// Provider over bars read from a CSV file.
#[derive(Debug, Clone)]
pub struct CsvProvider {
    inner: InMemoryProvider,
    extra_fields: Vec<String>,
    dataset_hash: String,
}

impl CsvProvider {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ProviderError::Io(format!("{}: {e}", path.display())))?;
        let provider = Self::from_reader(file)?;
        info!(
            path = %path.display(),
            bars = provider.bar_count(),
            instruments = provider.instruments().len(),
            "loaded market data"
        );
        Ok(provider)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ProviderError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers = rdr
            .headers()
            .map_err(|e| ProviderError::InvalidData(format!("CSV header: {e}")))?
            .clone();
        let columns: Vec<String> = headers.iter().map(|h| h.to_ascii_lowercase()).collect();
        for (i, expected) in REQUIRED_COLUMNS.iter().enumerate() {
            if columns.get(i).map(String::as_str) != Some(*expected) {
                return Err(ProviderError::InvalidData(format!(
                    "column {} must be '{expected}', header is {:?}",
                    i + 1,
                    columns
                )));
            }
        }
        let extra_fields: Vec<String> = columns[REQUIRED_COLUMNS.len()..].to_vec();
        if let Some(clash) = extra_fields.iter().find(|f| OHLCV_FIELDS.contains(&f.as_str())) {
            return Err(ProviderError::InvalidData(format!("extra column '{clash}' shadows a bar field")));
        }

        let mut bars = Vec::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| ProviderError::InvalidData(format!("CSV row {}: {e}", line + 2)))?;
            bars.push(parse_row(&record, &extra_fields).map_err(|e| {
                ProviderError::InvalidData(format!("CSV row {}: {e}", line + 2))
            })?);
        }
        debug!(rows = bars.len(), extras = extra_fields.len(), "parsed CSV rows");
        Self::from_bars(bars, extra_fields)
    }

    pub fn from_bars(bars: Vec<Bar>, extra_fields: Vec<String>) -> Result<Self, ProviderError> {
        let dataset_hash = dataset_hash(&bars);
        Ok(Self {
            inner: InMemoryProvider::from_bars(bars)?,
            extra_fields,
            dataset_hash,
        })
    }

    pub fn instruments(&self) -> Vec<String> {
        self.inner.instruments()
    }

    pub fn bar_count(&self) -> usize {
        self.inner.bar_count()
    }

    /// Names of the non-OHLCV columns, in file order.
    pub fn extra_fields(&self) -> &[String] {
        &self.extra_fields
    }

    /// BLAKE3 over every bar in (timestamp, instrument) order.
    pub fn dataset_hash(&self) -> &str {
        &self.dataset_hash
    }

    pub fn series(&self, instrument: &str) -> Vec<&Bar> {
        self.inner.series(instrument)
    }
}

impl MarketDataProvider for CsvProvider {
    fn timeline(&self, request: &DataRequest) -> Result<Vec<Timestamp>, ProviderError> {
        self.inner.timeline(request)
    }

    fn bars_at(&self, instruments: &[String], ts: Timestamp) -> Result<BTreeMap<String, Bar>, ProviderError> {
        self.inner.bars_at(instruments, ts)
    }

    fn universe(&self) -> Vec<String> {
        self.inner.instruments()
    }
}

/// Every field of the requested bars as panels, one row per timeline tick.
///
/// Used for offline factor research, where the whole history is visible at once.
pub fn load_panels(provider: &dyn MarketDataProvider, request: &DataRequest) -> Result<PanelSet, ProviderError> {
    let timeline = provider.timeline(request)?;
    let mut ticks = Vec::with_capacity(timeline.len());
    for ts in timeline {
        ticks.push((ts, provider.bars_at(&request.instruments, ts)?));
    }
    PanelSet::from_bars(request.instruments.clone(), ticks.iter().map(|(ts, bars)| (*ts, bars)))
        .map_err(|e| ProviderError::InvalidData(e.to_string()))
}

fn parse_row(record: &csv::StringRecord, extra_fields: &[String]) -> Result<Bar, String> {
    let cell = |i: usize| record.get(i).unwrap_or("");
    let number = |i: usize| -> Result<f64, String> {
        cell(i)
            .parse::<f64>()
            .map_err(|_| format!("{} is not a number: '{}'", REQUIRED_COLUMNS[i], cell(i)))
    };
    let instrument = cell(1);
    if instrument.is_empty() {
        return Err("instrument is empty".into());
    }
    let mut bar = Bar::new(
        parse_timestamp(cell(0))?,
        instrument,
        number(2)?,
        number(3)?,
        number(4)?,
        number(5)?,
        number(6)?,
    );
    for (offset, name) in extra_fields.iter().enumerate() {
        let raw = cell(REQUIRED_COLUMNS.len() + offset);
        if raw.is_empty() {
            continue;
        }
        let value = raw
            .parse::<f64>()
            .map_err(|_| format!("{name} is not a number: '{raw}'"))?;
        bar = bar.with_field(name.clone(), value);
    }
    Ok(bar)
}

pub fn parse_timestamp(raw: &str) -> Result<Timestamp, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("unrecognised timestamp '{raw}'"))
}

/// Deterministic BLAKE3 hash over all bar data, independent of input order.
fn dataset_hash(bars: &[Bar]) -> String {
    let mut sorted: Vec<&Bar> = bars.iter().collect();
    sorted.sort_by(|a, b| (a.timestamp, &a.instrument).cmp(&(b.timestamp, &b.instrument)));
    let mut hasher = blake3::Hasher::new();
    for bar in sorted {
        hasher.update(bar.timestamp.to_rfc3339().as_bytes());
        hasher.update(bar.instrument.as_bytes());
        for v in [bar.open, bar.high, bar.low, bar.close, bar.volume] {
            hasher.update(&v.to_le_bytes());
        }
        for (name, v) in &bar.fields {
            hasher.update(name.as_bytes());
            hasher.update(&v.to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

/// Write bars in the long CSV layout read by [`CsvProvider`]. Extra fields
/// are the union over all bars, in name order.
pub fn write_csv<W: Write>(writer: W, bars: &[Bar]) -> Result<(), ProviderError> {
    let extras: Vec<String> = bars
        .iter()
        .flat_map(|b| b.fields.keys().cloned())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut wtr = csv::Writer::from_writer(writer);
    let io = |e: csv::Error| ProviderError::Io(e.to_string());

    let header: Vec<&str> = REQUIRED_COLUMNS.iter().copied().chain(extras.iter().map(String::as_str)).collect();
    wtr.write_record(&header).map_err(io)?;
    for bar in bars {
        let mut row = vec![
            bar.timestamp.to_rfc3339(),
            bar.instrument.clone(),
            bar.open.to_string(),
            bar.high.to_string(),
            bar.low.to_string(),
            bar.close.to_string(),
            bar.volume.to_string(),
        ];
        row.extend(extras.iter().map(|f| bar.field(f).map(|v| v.to_string()).unwrap_or_default()));
        wtr.write_record(&row).map_err(io)?;
    }
    wtr.flush().map_err(|e| ProviderError::Io(e.to_string()))
}

// ─── Synthetic data ─────────────────────────────────────────────────

/// Parameters of the synthetic random walk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticParams {
    pub initial_price: f64,
    /// Per-tick drift of log price.
    pub drift: f64,
    /// Per-tick volatility of log price.
    pub volatility: f64,
    pub frequency: Frequency,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            initial_price: 100.0,
            drift: 0.0002,
            volatility: 0.015,
            frequency: Frequency::Daily,
        }
    }
}

/// Seeded geometric random walk for `ticks` periods per instrument.
pub fn synthetic_bars(instruments: &[String], start: Timestamp, ticks: usize, seed: u64) -> Vec<Bar> {
    synthetic_bars_with(instruments, start, ticks, seed, SyntheticParams::default())
}

pub fn synthetic_bars_with(
    instruments: &[String],
    start: Timestamp,
    ticks: usize,
    seed: u64,
    params: SyntheticParams,
) -> Vec<Bar> {
    let hierarchy = RngHierarchy::new(seed);
    let step = params.frequency.step();
    let mut bars = Vec::with_capacity(instruments.len() * ticks);
    // a negative or NaN volatility gives a flat walk
    let shock = Normal::new(0.0, params.volatility.max(0.0)).ok();

    for (index, instrument) in instruments.iter().enumerate() {
        let mut rng = hierarchy.rng_for(streams::SYNTHETIC, index as u64);
        let mut price = params.initial_price;
        let mut ts = start;
        for _ in 0..ticks {
            let z = shock.map_or(0.0, |n| n.sample(&mut rng));
            let open = price;
            let close = price * (params.drift + z).exp();
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
            let volume = rng.gen_range(500_000.0..5_000_000.0_f64).round();
            bars.push(Bar::new(ts, instrument.as_str(), open, high, low, close, volume));
            price = close;
            ts += step;
        }
    }
    bars
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = "\
timestamp,instrument,open,high,low,close,volume,pe
2024-01-02,AAA,10,11,9,10.5,1000,15.2
2024-01-02,BBB,20,21,19,20.5,2000,
2024-01-03T00:00:00Z,AAA,10.5,12,10,11.5,1500,15.9
";

    fn start() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn reads_long_format_with_extras() {
        let p = CsvProvider::from_reader(SAMPLE.as_bytes()).unwrap();
        assert_eq!(p.instruments(), vec!["AAA".to_string(), "BBB".to_string()]);
        assert_eq!(p.bar_count(), 3);
        assert_eq!(p.extra_fields(), ["pe".to_string()]);

        let aaa = p.series("AAA");
        assert_eq!(aaa[1].timestamp, start() + chrono::Duration::days(1));
        assert_eq!(aaa[0].field("pe"), Some(15.2));
        assert_eq!(p.series("BBB")[0].field("pe"), None);

        let timeline = p.timeline(&DataRequest::new(vec!["BBB".into()])).unwrap();
        assert_eq!(timeline, vec![start()]);
    }

    #[test]
    fn rejects_bad_header_and_cells() {
        let bad_header = "ts,instrument,open,high,low,close,volume\n";
        assert!(matches!(
            CsvProvider::from_reader(bad_header.as_bytes()),
            Err(ProviderError::InvalidData(_))
        ));
        let bad_cell = "timestamp,instrument,open,high,low,close,volume\n2024-01-02,AAA,x,1,1,1,1\n";
        let err = CsvProvider::from_reader(bad_cell.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn hash_ignores_row_order() {
        let a = CsvProvider::from_reader(SAMPLE.as_bytes()).unwrap();
        let mut lines: Vec<&str> = SAMPLE.lines().collect();
        lines[1..].reverse();
        let b = CsvProvider::from_reader(lines.join("\n").as_bytes()).unwrap();
        assert_eq!(a.dataset_hash(), b.dataset_hash());
    }

    #[test]
    fn synthetic_walk_is_seeded_and_per_instrument() {
        let names = vec!["A".to_string(), "B".to_string()];
        let a = synthetic_bars(&names, start(), 50, 42);
        let b = synthetic_bars(&names, start(), 50, 42);
        let c = synthetic_bars(&names, start(), 50, 43);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 100);
        assert!(a.iter().all(|bar| bar.is_sane()));

        // adding an instrument leaves existing paths alone
        let only_a = synthetic_bars(&names[..1], start(), 50, 42);
        assert_eq!(&a[..50], only_a.as_slice());
    }

    #[test]
    fn csv_round_trips_through_writer() {
        let names = vec!["A".to_string()];
        let bars: Vec<Bar> = synthetic_bars(&names, start(), 5, 1)
            .into_iter()
            .map(|b| b.with_field("score", 1.5))
            .collect();
        let mut buf = Vec::new();
        write_csv(&mut buf, &bars).unwrap();
        let p = CsvProvider::from_reader(buf.as_slice()).unwrap();
        let back: Vec<Bar> = p.series("A").into_iter().cloned().collect();
        assert_eq!(back, bars);
    }

    #[test]
    fn panels_cover_the_timeline() {
        let p = CsvProvider::from_reader(SAMPLE.as_bytes()).unwrap();
        let panels = load_panels(&p, &DataRequest::new(p.instruments())).unwrap();
        let close = panels.field("close").unwrap();
        assert_eq!(close.len(), 2);
        assert_eq!(close.row(1), vec![Some(11.5), None]);
        assert_eq!(panels.field("pe").unwrap().row(0), vec![Some(15.2), None]);
    }
}
