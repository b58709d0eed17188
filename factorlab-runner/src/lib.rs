//! factorlab runner: configuration, data loading, orchestration and metrics.
//!
//! This crate builds on `factorlab-core` to provide:
//! - TOML run configuration with content-hashed run ids
//! - A long-format CSV market data provider and a seeded synthetic generator
//! - Single-run orchestration with performance metrics and report files
//! - A JSONL journal sink for engine records
//! - Parallel parameter sweeps

pub mod config;
pub mod data_loader;
pub mod metrics;
pub mod runner;
pub mod sink;
pub mod sweep;

pub use config::{ConfigError, DataConfig, MetricsConfig, RunConfig, RunId, StrategyConfig};
pub use data_loader::{load_panels, synthetic_bars, synthetic_bars_with, write_csv, CsvProvider, SyntheticParams};
pub use metrics::PerformanceMetrics;
pub use runner::{run_single, write_report, BacktestResult, RunError};
pub use sink::{read_journal, JournalEntry, JsonlSink};
pub use sweep::{ranked_by_sharpe, run_sweep, ParamGrid, ParamPoint, SweepEntry};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn results_are_send_sync() {
        assert_send::<BacktestResult>();
        assert_sync::<BacktestResult>();
        assert_send::<PerformanceMetrics>();
        assert_sync::<PerformanceMetrics>();
        assert_send::<SweepEntry>();
    }

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<RunConfig>();
        assert_sync::<RunConfig>();
        assert_send::<ParamGrid>();
        assert_sync::<ParamGrid>();
    }

    #[test]
    fn providers_and_sinks_are_send() {
        assert_send::<CsvProvider>();
        assert_sync::<CsvProvider>();
        assert_send::<JsonlSink>();
    }
}
