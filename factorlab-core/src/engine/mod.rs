//! Backtest engine: the simulation clock and the orchestration around it.
//!
//! The engine pulls bars from a [`MarketDataProvider`], asks a [`Strategy`] for
//! intents, works algo parents into child slices, matches through the simulated
//! broker, applies fills to the portfolio, and lets the risk monitor decide
//! whether trading continues. Every record is pushed to a [`RecordSink`] and
//! kept in the [`BacktestOutcome`].

pub mod cancel;
pub mod config;
pub mod event_loop;
pub mod provider;
pub mod sink;
pub mod state;
pub mod strategy;

pub use cancel::CancellationToken;
pub use config::{EngineConfig, OpenOrderPolicy};
pub use event_loop::{run_backtest, BacktestEngine};
pub use provider::{DataRequest, Frequency, InMemoryProvider, MarketDataProvider, ProviderError};
pub use sink::{MemorySink, NullSink, RecordSink, SinkError};
pub use state::{BacktestOutcome, HaltReason, RunState};
pub use strategy::{ConstantStrategy, FactorRankStrategy, OrderIntent, Strategy, StrategyContext};

use crate::algo::AlgoError;
use crate::broker::BrokerError;
use crate::domain::PanelError;
use crate::portfolio::PortfolioError;
use crate::risk::RiskError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Portfolio(#[from] PortfolioError),

    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error(transparent)]
    Algo(#[from] AlgoError),

    #[error(transparent)]
    Panel(#[from] PanelError),
}
