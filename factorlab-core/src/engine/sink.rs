//! Persistence boundary. The engine writes immutable records; it never reads them back.

use crate::domain::{Fill, OrderAuditEntry, PortfolioSnapshot};
use crate::risk::{RiskAlert, RiskMetricRecord};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(String),

    #[error("sink serialization error: {0}")]
    Serialize(String),
}

pub trait RecordSink {
    fn on_snapshot(&mut self, snapshot: &PortfolioSnapshot) -> Result<(), SinkError>;
    fn on_fill(&mut self, fill: &Fill) -> Result<(), SinkError>;
    fn on_order_update(&mut self, entry: &OrderAuditEntry) -> Result<(), SinkError>;
    fn on_risk_record(&mut self, record: &RiskMetricRecord) -> Result<(), SinkError>;
    fn on_alert(&mut self, alert: &RiskAlert) -> Result<(), SinkError>;

    /// Called once when the run ends, halted or not.
    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl RecordSink for NullSink {
    fn on_snapshot(&mut self, _: &PortfolioSnapshot) -> Result<(), SinkError> {
        Ok(())
    }
    fn on_fill(&mut self, _: &Fill) -> Result<(), SinkError> {
        Ok(())
    }
    fn on_order_update(&mut self, _: &OrderAuditEntry) -> Result<(), SinkError> {
        Ok(())
    }
    fn on_risk_record(&mut self, _: &RiskMetricRecord) -> Result<(), SinkError> {
        Ok(())
    }
    fn on_alert(&mut self, _: &RiskAlert) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Collects records in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub snapshots: Vec<PortfolioSnapshot>,
    pub fills: Vec<Fill>,
    pub order_updates: Vec<OrderAuditEntry>,
    pub risk_records: Vec<RiskMetricRecord>,
    pub alerts: Vec<RiskAlert>,
    pub flushed: bool,
}

impl RecordSink for MemorySink {
    fn on_snapshot(&mut self, snapshot: &PortfolioSnapshot) -> Result<(), SinkError> {
        self.snapshots.push(snapshot.clone());
        Ok(())
    }
    fn on_fill(&mut self, fill: &Fill) -> Result<(), SinkError> {
        self.fills.push(fill.clone());
        Ok(())
    }
    fn on_order_update(&mut self, entry: &OrderAuditEntry) -> Result<(), SinkError> {
        self.order_updates.push(entry.clone());
        Ok(())
    }
    fn on_risk_record(&mut self, record: &RiskMetricRecord) -> Result<(), SinkError> {
        self.risk_records.push(record.clone());
        Ok(())
    }
    fn on_alert(&mut self, alert: &RiskAlert) -> Result<(), SinkError> {
        self.alerts.push(alert.clone());
        Ok(())
    }
    fn flush(&mut self) -> Result<(), SinkError> {
        self.flushed = true;
        Ok(())
    }
}
