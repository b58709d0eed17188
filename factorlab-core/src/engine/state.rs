//! Run lifecycle and the result of a complete backtest.

use crate::domain::{Fill, Order, OrderAuditEntry, PortfolioSnapshot, Timestamp};
use crate::risk::{BreakerTransition, RiskAlert, RiskMetricRecord, StressResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a run stopped before the end of its clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HaltReason {
    /// A hard risk limit was breached.
    RiskLimit { metric: String, value: f64, threshold: f64 },
    /// The market data provider failed mid-run.
    Provider(String),
    Cancelled,
    /// The provider returned a bar stamped after the tick being simulated.
    LookAhead {
        instrument: String,
        bar_ts: Timestamp,
        tick_ts: Timestamp,
    },
    /// The persistence sink refused a record.
    Sink(String),
    /// An internal invariant failed mid-tick, e.g. an unpriceable fill.
    Engine(String),
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::RiskLimit { metric, value, threshold } => {
                write!(f, "risk limit {metric}: {value:.4} >= {threshold:.4}")
            }
            HaltReason::Provider(msg) => write!(f, "provider failure: {msg}"),
            HaltReason::Cancelled => write!(f, "cancelled"),
            HaltReason::LookAhead { instrument, bar_ts, tick_ts } => {
                write!(f, "look-ahead bar for {instrument}: {bar_ts} after tick {tick_ts}")
            }
            HaltReason::Sink(msg) => write!(f, "sink failure: {msg}"),
            HaltReason::Engine(msg) => write!(f, "engine failure: {msg}"),
        }
    }
}

/// `Initialized → Running → (Halted | Completed)`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    #[default]
    Initialized,
    Running,
    Halted { reason: HaltReason },
    Completed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Halted { .. } | RunState::Completed)
    }

    pub fn halt_reason(&self) -> Option<&HaltReason> {
        match self {
            RunState::Halted { reason } => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Initialized => write!(f, "INITIALIZED"),
            RunState::Running => write!(f, "RUNNING"),
            RunState::Halted { reason } => write!(f, "HALTED ({reason})"),
            RunState::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// Everything a run recorded. Halted runs keep all records up to the halt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestOutcome {
    pub state: RunState,
    pub snapshots: Vec<PortfolioSnapshot>,
    pub fills: Vec<Fill>,
    /// Final state of every order, ascending id.
    pub orders: Vec<Order>,
    pub audit: Vec<OrderAuditEntry>,
    pub risk_records: Vec<RiskMetricRecord>,
    pub alerts: Vec<RiskAlert>,
    pub breaker_transitions: Vec<BreakerTransition>,
    /// Configured scenarios against the last snapshot.
    pub stress_results: Vec<StressResult>,
}

impl BacktestOutcome {
    pub fn final_equity(&self) -> Option<f64> {
        self.snapshots.last().map(|s| s.total_equity)
    }

    pub fn is_completed(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn equity_curve(&self) -> Vec<f64> {
        self.snapshots.iter().map(|s| s.total_equity).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!RunState::Initialized.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Completed.is_terminal());
        let halted = RunState::Halted {
            reason: HaltReason::Cancelled,
        };
        assert!(halted.is_terminal());
        assert_eq!(halted.halt_reason(), Some(&HaltReason::Cancelled));
    }

    #[test]
    fn halt_reason_display() {
        let r = HaltReason::RiskLimit {
            metric: "drawdown".into(),
            value: 0.25,
            threshold: 0.2,
        };
        assert_eq!(r.to_string(), "risk limit drawdown: 0.2500 >= 0.2000");
    }

    #[test]
    fn run_state_serializes_tagged() {
        let json = serde_json::to_string(&RunState::Halted {
            reason: HaltReason::Provider("down".into()),
        })
        .unwrap();
        assert!(json.contains("\"state\":\"HALTED\""));
        assert!(json.contains("PROVIDER"));
    }
}
