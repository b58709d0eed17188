//! Risk monitor: turns each snapshot into metrics, alerts and a directive.
//!
//! The monitor owns the breaker and the return history for one run. It reads
//! snapshots and never touches portfolio or order state; the engine acts on the
//! `RiskDirective` it returns.

use super::circuit_breaker::{BreakerState, BreakerTransition, CircuitBreaker};
use super::exposure::regress_exposures;
use super::stress::{run_stress, FactorLoadings, StressResult};
use super::var::{VarEstimate, VarMethod};
use super::{RiskConfig, RiskError};
use crate::domain::{PortfolioSnapshot, Timestamp, Value};
use crate::rng::{streams, RngHierarchy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, error, info, warn};

pub const METRIC_DRAWDOWN: &str = "drawdown";
pub const METRIC_VAR: &str = "var";
pub const METRIC_TICK_LOSS: &str = "tick_loss";
pub const METRIC_TOTAL_LOSS: &str = "total_loss";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "INFO"),
            AlertSeverity::Warning => write!(f, "WARNING"),
            AlertSeverity::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub tick: usize,
    pub timestamp: Timestamp,
    pub severity: AlertSeverity,
    pub metric: String,
    pub message: String,
}

/// A metric at or beyond its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreachFlag {
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    /// Hard breaches halt the run; soft ones trip the breaker.
    pub hard: bool,
}

/// Derived, read-only view of risk at one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetricRecord {
    pub tick: usize,
    pub timestamp: Timestamp,
    pub var: Option<f64>,
    pub cvar: Option<f64>,
    pub var_method: VarMethod,
    pub confidence: f64,
    pub factor_exposures: BTreeMap<String, f64>,
    pub drawdown: f64,
    pub tick_return: Option<f64>,
    pub breaker_state: BreakerState,
    pub breaches: Vec<BreachFlag>,
}

/// What the engine should do after this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDirective {
    Continue,
    /// Breaker engaged: no new submissions.
    SuppressOrders,
    /// A hard limit was hit.
    Halt(BreachFlag),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorOutcome {
    /// Present on evaluation ticks.
    pub record: Option<RiskMetricRecord>,
    pub alerts: Vec<RiskAlert>,
    pub transition: Option<BreakerTransition>,
    pub directive: RiskDirective,
}

pub struct RiskMonitor {
    config: RiskConfig,
    breaker: CircuitBreaker,
    initial_equity: f64,
    peak_equity: f64,
    prev_equity: f64,
    returns: Vec<f64>,
    factor_history: BTreeMap<String, Vec<Value>>,
    last_var: Option<VarEstimate>,
    warned: BTreeSet<String>,
    ticks_seen: usize,
    rng: RngHierarchy,
}

impl RiskMonitor {
    pub fn new(config: RiskConfig, initial_equity: f64) -> Result<Self, RiskError> {
        config.validate()?;
        let factor_history = config
            .exposure_factors
            .iter()
            .map(|f| (f.clone(), Vec::new()))
            .collect();
        Ok(Self {
            breaker: CircuitBreaker::new(config.breaker.cooldown_ticks),
            config,
            initial_equity,
            peak_equity: initial_equity,
            prev_equity: initial_equity,
            returns: Vec::new(),
            factor_history,
            last_var: None,
            warned: BTreeSet::new(),
            ticks_seen: 0,
            rng: RngHierarchy::new(0),
        })
    }

    /// Seed Monte Carlo VaR from the run's master seed. Each evaluation draws
    /// from its own `monte-carlo` sub-stream indexed by tick.
    pub fn with_seed(mut self, master_seed: u64) -> Self {
        self.rng = RngHierarchy::new(master_seed);
        self
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn allows_new_orders(&self) -> bool {
        self.breaker.allows_new_orders()
    }

    /// Per-tick returns observed so far.
    pub fn returns(&self) -> &[f64] {
        &self.returns
    }

    /// Evaluate one snapshot. `factor_returns` carries this tick's return for
    /// each exposure factor, undefined where unknown.
    pub fn evaluate(
        &mut self,
        snapshot: &PortfolioSnapshot,
        factor_returns: &BTreeMap<String, Value>,
    ) -> Result<MonitorOutcome, RiskError> {
        let tick = snapshot.tick;
        let equity = snapshot.total_equity;

        let tick_return = (self.prev_equity > 0.0).then(|| equity / self.prev_equity - 1.0);
        if let Some(r) = tick_return {
            self.returns.push(r);
            for (name, series) in self.factor_history.iter_mut() {
                series.push(factor_returns.get(name).copied().flatten());
            }
        }
        self.prev_equity = equity;
        self.peak_equity = self.peak_equity.max(equity);
        let drawdown = if self.peak_equity > 0.0 {
            (1.0 - equity / self.peak_equity).max(0.0)
        } else {
            0.0
        };

        let is_evaluation = self.ticks_seen % self.config.evaluation_interval == 0;
        self.ticks_seen += 1;
        let mut exposures = BTreeMap::new();
        if is_evaluation {
            let seed = self.rng.sub_seed(streams::MONTE_CARLO, tick as u64);
            self.last_var = self.config.var.estimate(&self.returns, seed)?;
            exposures = self.exposures();
        }

        // soft limits trip the breaker
        let mut breaches = Vec::new();
        let thresholds = &self.config.breaker;
        let soft = [
            (METRIC_DRAWDOWN, Some(drawdown), thresholds.max_drawdown),
            (METRIC_TICK_LOSS, tick_return.map(|r| -r), thresholds.max_tick_loss),
            (METRIC_VAR, self.last_var.map(|v| v.var), thresholds.max_var),
        ];
        let hard = [
            (METRIC_DRAWDOWN, Some(drawdown), self.config.halt.max_drawdown),
            (
                METRIC_TOTAL_LOSS,
                (self.initial_equity > 0.0).then(|| 1.0 - equity / self.initial_equity),
                self.config.halt.max_loss,
            ),
        ];
        let mut alerts = Vec::new();
        for (is_hard, limits) in [(false, &soft[..]), (true, &hard[..])] {
            for &(metric, value, threshold) in limits {
                let (Some(value), Some(threshold)) = (value, threshold) else {
                    continue;
                };
                let key = format!("{metric}/{}", if is_hard { "halt" } else { "breaker" });
                if value >= threshold {
                    breaches.push(BreachFlag {
                        metric: metric.to_string(),
                        value,
                        threshold,
                        hard: is_hard,
                    });
                } else if value >= self.config.warning_fraction * threshold {
                    if self.warned.insert(key) {
                        alerts.push(self.alert(
                            snapshot,
                            AlertSeverity::Warning,
                            metric,
                            format!("{metric} {value:.4} approaching limit {threshold:.4}"),
                        ));
                    }
                } else {
                    self.warned.remove(&key);
                }
            }
        }

        let trigger = breaches.iter().find(|b| !b.hard).map(|b| b.metric.clone());
        let transition = self.breaker.evaluate(tick, trigger.as_deref());
        if let Some(t) = &transition {
            match t.to {
                BreakerState::Triggered { .. } => {
                    let flag = breaches.iter().find(|b| !b.hard);
                    let message = match flag {
                        Some(b) => format!(
                            "circuit breaker triggered: {} {:.4} >= {:.4}",
                            b.metric, b.value, b.threshold
                        ),
                        None => "circuit breaker triggered".to_string(),
                    };
                    let metric = flag.map_or("breaker", |b| b.metric.as_str()).to_string();
                    alerts.push(self.alert(snapshot, AlertSeverity::Critical, &metric, message));
                }
                BreakerState::Closed => {
                    alerts.push(self.alert(
                        snapshot,
                        AlertSeverity::Info,
                        "breaker",
                        "circuit breaker closed, trading resumes".to_string(),
                    ));
                }
                BreakerState::Cooldown { .. } => {}
            }
        }

        let halt = breaches.iter().find(|b| b.hard).cloned();
        if let Some(b) = &halt {
            alerts.push(self.alert(
                snapshot,
                AlertSeverity::Critical,
                &b.metric,
                format!("halt limit hit: {} {:.4} >= {:.4}", b.metric, b.value, b.threshold),
            ));
        }

        let record = is_evaluation.then(|| RiskMetricRecord {
            tick,
            timestamp: snapshot.timestamp,
            var: self.last_var.map(|v| v.var),
            cvar: self.last_var.map(|v| v.cvar),
            var_method: self.config.var.method,
            confidence: self.config.var.confidence,
            factor_exposures: exposures,
            drawdown,
            tick_return,
            breaker_state: self.breaker.state(),
            breaches: breaches.clone(),
        });

        let directive = match halt {
            Some(flag) => RiskDirective::Halt(flag),
            None if !self.breaker.allows_new_orders() => RiskDirective::SuppressOrders,
            None => RiskDirective::Continue,
        };
        debug!(tick, drawdown, breaker = %self.breaker.state(), "risk evaluated");

        Ok(MonitorOutcome {
            record,
            alerts,
            transition,
            directive,
        })
    }

    /// Configured stress scenarios against a snapshot.
    pub fn stress(&self, snapshot: &PortfolioSnapshot, loadings: Option<&FactorLoadings>) -> Vec<StressResult> {
        self.config
            .stress_scenarios
            .iter()
            .map(|s| run_stress(snapshot, s, loadings))
            .collect()
    }

    /// Betas over the VaR lookback, on rows where every factor is defined.
    fn exposures(&self) -> BTreeMap<String, f64> {
        if self.factor_history.is_empty() {
            return BTreeMap::new();
        }
        let start = self.returns.len().saturating_sub(self.config.var.lookback);
        let rows: Vec<usize> = (start..self.returns.len())
            .filter(|&t| self.factor_history.values().all(|s| s[t].is_some()))
            .collect();
        if rows.len() < self.config.var.min_observations {
            return BTreeMap::new();
        }
        let y: Vec<f64> = rows.iter().map(|&t| self.returns[t]).collect();
        let factors: BTreeMap<String, Vec<f64>> = self
            .factor_history
            .iter()
            .map(|(name, s)| (name.clone(), rows.iter().filter_map(|&t| s[t]).collect()))
            .collect();
        match regress_exposures(&y, &factors) {
            Ok(report) => report.betas,
            Err(e) => {
                debug!(error = %e, "factor exposure unavailable");
                BTreeMap::new()
            }
        }
    }

    fn alert(
        &self,
        snapshot: &PortfolioSnapshot,
        severity: AlertSeverity,
        metric: &str,
        message: String,
    ) -> RiskAlert {
        match severity {
            AlertSeverity::Info => info!(tick = snapshot.tick, metric, "{message}"),
            AlertSeverity::Warning => warn!(tick = snapshot.tick, metric, "{message}"),
            AlertSeverity::Critical => error!(tick = snapshot.tick, metric, "{message}"),
        }
        RiskAlert {
            tick: snapshot.tick,
            timestamp: snapshot.timestamp,
            severity,
            metric: metric.to_string(),
            message,
        }
    }
}
