//! Backtest runner: wires configuration, data, engine and metrics together.
//!
//! Entry points:
//! - `run_single()`: one configuration against one provider, records to a sink.
//! - `write_report()`: persist a finished run's summary and equity curve.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use factorlab_core::engine::{
    run_backtest, BacktestOutcome, CancellationToken, EngineError, MarketDataProvider, RecordSink, RunState,
};

use crate::config::{ConfigError, RunConfig, RunId};
use crate::metrics::{drawdown_series, equity_curve, PerformanceMetrics};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("no instruments configured and the provider lists none")]
    EmptyUniverse,
}

/// Current schema version for persisted results.
pub const SCHEMA_VERSION: u32 = 1;

/// Complete result of a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: RunId,
    pub config: RunConfig,
    pub metrics: PerformanceMetrics,
    pub outcome: BacktestOutcome,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl BacktestResult {
    pub fn state(&self) -> &RunState {
        &self.outcome.state
    }

    /// Initial cash followed by one point per tick.
    pub fn equity_curve(&self) -> Vec<f64> {
        equity_curve(self.config.engine.initial_cash, &self.outcome)
    }
}

/// Run one configuration. A halted run is still `Ok`: its state says why it
/// stopped and its records cover every tick that completed.
pub fn run_single(
    config: &RunConfig,
    provider: &dyn MarketDataProvider,
    sink: &mut dyn RecordSink,
    cancel: &CancellationToken,
) -> Result<BacktestResult, RunError> {
    config.validate()?;
    let run_id = config.run_id()?;
    let request = config.data_request(provider.universe());
    if request.instruments.is_empty() {
        return Err(RunError::EmptyUniverse);
    }
    let mut strategy = config.build_strategy();
    let short_id = &run_id[..12];
    info!(
        run_id = short_id,
        strategy = strategy.name(),
        instruments = request.instruments.len(),
        "starting run"
    );

    let outcome = run_backtest(&config.engine, &request, provider, strategy.as_mut(), sink, cancel)?;
    let metrics = PerformanceMetrics::compute(&outcome, config.engine.initial_cash, config.metrics.periods_per_year);

    match &outcome.state {
        RunState::Halted { reason } => warn!(run_id = short_id, %reason, "run halted"),
        state => info!(
            run_id = short_id,
            %state,
            total_return = metrics.total_return,
            sharpe = metrics.sharpe,
            "run finished"
        ),
    }

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        run_id,
        config: config.clone(),
        metrics,
        outcome,
    })
}

/// Write `result.json` and `equity.csv` into `dir`.
pub fn write_report(dir: &Path, result: &BacktestResult) -> anyhow::Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create report directory: {}", dir.display()))?;

    let json_path = dir.join("result.json");
    let json = serde_json::to_string_pretty(result).context("Failed to serialize backtest result")?;
    fs::write(&json_path, json).with_context(|| format!("Failed to write {}", json_path.display()))?;

    let csv_path = dir.join("equity.csv");
    let curve = result.equity_curve();
    let drawdowns = drawdown_series(&curve);
    let mut wtr = csv::Writer::from_path(&csv_path).with_context(|| format!("Failed to create {}", csv_path.display()))?;
    wtr.write_record(["tick", "timestamp", "equity", "drawdown"])
        .with_context(|| format!("Failed to write {}", csv_path.display()))?;
    // curve[0] is the starting cash, before any tick
    for (snap, (eq, dd)) in result.outcome.snapshots.iter().zip(curve.iter().zip(&drawdowns).skip(1)) {
        wtr.write_record([
            snap.tick.to_string(),
            snap.timestamp.to_rfc3339(),
            eq.to_string(),
            dd.to_string(),
        ])
        .with_context(|| format!("Failed to write {}", csv_path.display()))?;
    }
    wtr.flush()
        .with_context(|| format!("Failed to flush {}", csv_path.display()))
}
