//! JSONL run journal: append-only persistence of engine records.
//!
//! Each line is one JSON object tagged with its record kind, so a journal
//! can be streamed, grepped or replayed without loading the whole run.
//! Writes are buffered; the engine's end-of-run flush makes them durable.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use factorlab_core::domain::{Fill, OrderAuditEntry, PortfolioSnapshot};
use factorlab_core::engine::{RecordSink, SinkError};
use factorlab_core::risk::{RiskAlert, RiskMetricRecord};
use serde::{Deserialize, Serialize};

/// One journal line, as read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
    Snapshot(PortfolioSnapshot),
    Fill(Fill),
    OrderUpdate(OrderAuditEntry),
    RiskRecord(RiskMetricRecord),
    Alert(RiskAlert),
}

/// Borrowed form of [`JournalEntry`] for writing without cloning.
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JournalLine<'a> {
    Snapshot(&'a PortfolioSnapshot),
    Fill(&'a Fill),
    OrderUpdate(&'a OrderAuditEntry),
    RiskRecord(&'a RiskMetricRecord),
    Alert(&'a RiskAlert),
}

pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
    lines: usize,
}

impl JsonlSink {
    /// Open `path` for appending, creating parent directories as needed.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_error)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            lines: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines written by this sink.
    pub fn lines_written(&self) -> usize {
        self.lines
    }

    fn write(&mut self, line: JournalLine<'_>) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, &line).map_err(|e| SinkError::Serialize(e.to_string()))?;
        self.writer.write_all(b"\n").map_err(io_error)?;
        self.lines += 1;
        Ok(())
    }
}

impl RecordSink for JsonlSink {
    fn on_snapshot(&mut self, snapshot: &PortfolioSnapshot) -> Result<(), SinkError> {
        self.write(JournalLine::Snapshot(snapshot))
    }

    fn on_fill(&mut self, fill: &Fill) -> Result<(), SinkError> {
        self.write(JournalLine::Fill(fill))
    }

    fn on_order_update(&mut self, entry: &OrderAuditEntry) -> Result<(), SinkError> {
        self.write(JournalLine::OrderUpdate(entry))
    }

    fn on_risk_record(&mut self, record: &RiskMetricRecord) -> Result<(), SinkError> {
        self.write(JournalLine::RiskRecord(record))
    }

    fn on_alert(&mut self, alert: &RiskAlert) -> Result<(), SinkError> {
        self.write(JournalLine::Alert(alert))
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush().map_err(io_error)
    }
}

fn io_error(e: io::Error) -> SinkError {
    SinkError::Io(e.to_string())
}

/// Read every entry of a journal. Malformed lines are skipped.
pub fn read_journal(path: &Path) -> io::Result<Vec<JournalEntry>> {
    let reader = io::BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<JournalEntry>(&line) {
            entries.push(entry);
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use factorlab_core::domain::{OrderId, OrderSide};

    fn snapshot(tick: usize) -> PortfolioSnapshot {
        PortfolioSnapshot {
            tick,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            cash: 1_000.0,
            positions: Vec::new(),
            realized_pnl: 0.0,
            total_equity: 1_000.0,
        }
    }

    fn fill() -> Fill {
        Fill {
            order_id: OrderId(3),
            parent_id: Some(OrderId(1)),
            instrument: "AAA".into(),
            side: OrderSide::Sell,
            price: 10.0,
            quantity: 5.0,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            tick: 0,
            commission: 0.1,
            slippage: 0.02,
        }
    }

    #[test]
    fn lines_are_tagged_by_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("runs/journal.jsonl");
        let mut sink = JsonlSink::create(&path).unwrap();
        sink.on_snapshot(&snapshot(0)).unwrap();
        sink.on_fill(&fill()).unwrap();
        sink.flush().unwrap();
        assert_eq!(sink.lines_written(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(first["kind"], "snapshot");
        assert_eq!(first["tick"], 0);

        let entries = read_journal(&path).unwrap();
        assert_eq!(entries, vec![JournalEntry::Snapshot(snapshot(0)), JournalEntry::Fill(fill())]);
    }

    #[test]
    fn reopening_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("journal.jsonl");
        for tick in 0..2 {
            let mut sink = JsonlSink::create(&path).unwrap();
            sink.on_snapshot(&snapshot(tick)).unwrap();
            sink.flush().unwrap();
        }
        std::fs::write(&path, format!("{}not json\n", std::fs::read_to_string(&path).unwrap())).unwrap();
        assert_eq!(read_journal(&path).unwrap().len(), 2);
    }
}
