//! Parameter sweeps over a factor-rank configuration.
//!
//! Every grid point is an independent engine run with its own strategy,
//! broker and RNG streams, so points run in parallel on rayon and still
//! reproduce their single-threaded results. Results come back in grid order.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use factorlab_core::engine::{CancellationToken, MarketDataProvider, NullSink};

use crate::config::{ConfigError, RunConfig, StrategyConfig};
use crate::runner::{run_single, BacktestResult, RunError};

/// Values to try for each swept parameter. An empty list keeps the base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamGrid {
    #[serde(default)]
    pub top_k: Vec<usize>,
    #[serde(default)]
    pub rebalance_every: Vec<usize>,
    /// Breaker drawdown thresholds; `None` disables the drawdown trigger.
    #[serde(default)]
    pub breaker_drawdown: Vec<Option<f64>>,
}

/// One combination from the grid. `None` means "base value".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamPoint {
    pub top_k: Option<usize>,
    pub rebalance_every: Option<usize>,
    pub breaker_drawdown: Option<Option<f64>>,
}

impl ParamGrid {
    /// Number of combinations.
    pub fn size(&self) -> usize {
        self.top_k.len().max(1) * self.rebalance_every.len().max(1) * self.breaker_drawdown.len().max(1)
    }

    /// Every combination, outermost parameter first.
    pub fn points(&self) -> Vec<ParamPoint> {
        fn axis<T: Copy>(values: &[T]) -> Vec<Option<T>> {
            if values.is_empty() {
                vec![None]
            } else {
                values.iter().copied().map(Some).collect()
            }
        }
        let mut points = Vec::with_capacity(self.size());
        for top_k in axis(&self.top_k) {
            for rebalance_every in axis(&self.rebalance_every) {
                for breaker_drawdown in axis(&self.breaker_drawdown) {
                    points.push(ParamPoint {
                        top_k,
                        rebalance_every,
                        breaker_drawdown,
                    });
                }
            }
        }
        points
    }

    /// The base configuration with each point applied, validated.
    pub fn configs(&self, base: &RunConfig) -> Result<Vec<(ParamPoint, RunConfig)>, ConfigError> {
        self.points()
            .into_iter()
            .map(|p| p.apply(base).map(|c| (p, c)))
            .collect()
    }
}

impl ParamPoint {
    pub fn apply(&self, base: &RunConfig) -> Result<RunConfig, ConfigError> {
        let mut config = base.clone();
        let StrategyConfig::FactorRank(strategy) = &mut config.strategy else {
            return Err(ConfigError::Invalid("sweeps need a FACTOR_RANK strategy".into()));
        };
        if let Some(k) = self.top_k {
            strategy.top_k = k;
        }
        if let Some(n) = self.rebalance_every {
            strategy.rebalance_every = n;
        }
        if let Some(dd) = self.breaker_drawdown {
            config.engine.risk.breaker.max_drawdown = dd;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Outcome of one grid point.
#[derive(Debug, Clone)]
pub struct SweepEntry {
    pub point: ParamPoint,
    pub result: Result<BacktestResult, RunError>,
}

/// Run every grid point in parallel. Configuration errors fail the whole
/// sweep up front; per-run errors are reported per entry.
pub fn run_sweep(
    base: &RunConfig,
    grid: &ParamGrid,
    provider: &dyn MarketDataProvider,
    cancel: &CancellationToken,
) -> Result<Vec<SweepEntry>, ConfigError> {
    let configs = grid.configs(base)?;
    info!(points = configs.len(), "starting sweep");
    let entries: Vec<SweepEntry> = configs
        .par_iter()
        .map(|(point, config)| SweepEntry {
            point: *point,
            result: run_single(config, provider, &mut NullSink, cancel),
        })
        .collect();
    let failed = entries.iter().filter(|e| e.result.is_err()).count();
    info!(points = entries.len(), failed, "sweep finished");
    Ok(entries)
}

/// Successful entries, best Sharpe first.
pub fn ranked_by_sharpe(entries: &[SweepEntry]) -> Vec<(&ParamPoint, &BacktestResult)> {
    let mut ok: Vec<_> = entries
        .iter()
        .filter_map(|e| e.result.as_ref().ok().map(|r| (&e.point, r)))
        .collect();
    ok.sort_by(|a, b| b.1.metrics.sharpe.total_cmp(&a.1.metrics.sharpe));
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use factorlab_core::engine::{EngineConfig, FactorRankStrategy};
    use factorlab_core::ops::{FactorExpr, UnaryOp};

    fn base() -> RunConfig {
        RunConfig::new(
            EngineConfig::new(100_000.0),
            StrategyConfig::FactorRank(FactorRankStrategy::new(
                FactorExpr::field("close").then(UnaryOp::Returns { n: 3 }),
                2,
            )),
        )
    }

    #[test]
    fn grid_enumerates_in_order() {
        let grid = ParamGrid {
            top_k: vec![1, 2],
            rebalance_every: vec![1, 5, 10],
            breaker_drawdown: vec![],
        };
        assert_eq!(grid.size(), 6);
        let points = grid.points();
        assert_eq!(points.len(), 6);
        assert_eq!((points[0].top_k, points[0].rebalance_every), (Some(1), Some(1)));
        assert_eq!((points[5].top_k, points[5].rebalance_every), (Some(2), Some(10)));
        assert!(points.iter().all(|p| p.breaker_drawdown.is_none()));
    }

    #[test]
    fn empty_grid_is_the_base() {
        let configs = ParamGrid::default().configs(&base()).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].1, base());
    }

    #[test]
    fn points_apply_to_strategy_and_breaker() {
        let point = ParamPoint {
            top_k: Some(4),
            rebalance_every: Some(7),
            breaker_drawdown: Some(Some(0.2)),
        };
        let config = point.apply(&base()).unwrap();
        let StrategyConfig::FactorRank(s) = &config.strategy else {
            panic!("expected factor rank");
        };
        assert_eq!((s.top_k, s.rebalance_every), (4, 7));
        assert_eq!(config.engine.risk.breaker.max_drawdown, Some(0.2));
    }

    #[test]
    fn invalid_point_fails_up_front() {
        let grid = ParamGrid {
            rebalance_every: vec![0],
            ..ParamGrid::default()
        };
        assert!(matches!(grid.configs(&base()), Err(ConfigError::Invalid(_))));
    }
}
