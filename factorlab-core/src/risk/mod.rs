//! Risk engine: VaR/CVaR, factor exposure, stress tests, the circuit breaker,
//! and the monitor that ties them together each tick.

pub mod circuit_breaker;
pub mod exposure;
pub mod monitor;
pub mod stress;
pub mod var;

pub use circuit_breaker::{BreakerState, BreakerTransition, CircuitBreaker};
pub use exposure::{holdings_exposure, regress_exposures, ExposureReport};
pub use monitor::{
    AlertSeverity, BreachFlag, MonitorOutcome, RiskAlert, RiskDirective, RiskMetricRecord,
    RiskMonitor,
};
pub use stress::{run_stress, FactorLoadings, StressResult, StressScenario};
pub use var::{historical_var, monte_carlo_var, parametric_var, VarConfig, VarEstimate, VarMethod};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RiskError {
    #[error("need at least {needed} observations, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("confidence must be in (0, 1), got {0}")]
    InvalidConfidence(f64),

    #[error("design matrix is singular")]
    Singular,

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("invalid risk parameter: {0}")]
    InvalidParameter(String),

    #[error("numeric error: {0}")]
    Numeric(String),
}

/// Limits that trip the circuit breaker. Fractions, e.g. `0.1` for 10%.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerThresholds {
    /// Drawdown from peak equity.
    #[serde(default)]
    pub max_drawdown: Option<f64>,
    /// VaR as a fraction of equity.
    #[serde(default)]
    pub max_var: Option<f64>,
    /// Loss over a single tick.
    #[serde(default)]
    pub max_tick_loss: Option<f64>,
    #[serde(default = "default_cooldown_ticks")]
    pub cooldown_ticks: usize,
}

fn default_cooldown_ticks() -> usize {
    5
}

impl Default for BreakerThresholds {
    fn default() -> Self {
        Self {
            max_drawdown: None,
            max_var: None,
            max_tick_loss: None,
            cooldown_ticks: default_cooldown_ticks(),
        }
    }
}

/// Limits that halt the run outright.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HaltThresholds {
    #[serde(default)]
    pub max_drawdown: Option<f64>,
    /// Loss from starting equity.
    #[serde(default)]
    pub max_loss: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub var: VarConfig,
    #[serde(default)]
    pub breaker: BreakerThresholds,
    #[serde(default)]
    pub halt: HaltThresholds,
    /// A full metric record is produced every this many ticks.
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval: usize,
    /// Warn once a metric reaches this share of its threshold.
    #[serde(default = "default_warning_fraction")]
    pub warning_fraction: f64,
    /// Factor return series to regress on. `"market"` is the equal-weighted
    /// universe; any other name is an instrument.
    #[serde(default = "default_exposure_factors")]
    pub exposure_factors: Vec<String>,
    #[serde(default = "StressScenario::builtins")]
    pub stress_scenarios: Vec<StressScenario>,
}

fn default_evaluation_interval() -> usize {
    1
}

fn default_warning_fraction() -> f64 {
    0.8
}

fn default_exposure_factors() -> Vec<String> {
    vec![MARKET_FACTOR.to_string()]
}

/// Name of the equal-weighted universe return factor.
pub const MARKET_FACTOR: &str = "market";

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            var: VarConfig::default(),
            breaker: BreakerThresholds::default(),
            halt: HaltThresholds::default(),
            evaluation_interval: default_evaluation_interval(),
            warning_fraction: default_warning_fraction(),
            exposure_factors: default_exposure_factors(),
            stress_scenarios: StressScenario::builtins(),
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), RiskError> {
        self.var.validate()?;
        if self.evaluation_interval == 0 {
            return Err(RiskError::InvalidParameter("evaluation_interval must be positive".into()));
        }
        if !(self.warning_fraction > 0.0 && self.warning_fraction <= 1.0) {
            return Err(RiskError::InvalidParameter(format!(
                "warning_fraction must be in (0, 1], got {}",
                self.warning_fraction
            )));
        }
        let limits = [
            ("breaker.max_drawdown", self.breaker.max_drawdown),
            ("breaker.max_var", self.breaker.max_var),
            ("breaker.max_tick_loss", self.breaker.max_tick_loss),
            ("halt.max_drawdown", self.halt.max_drawdown),
            ("halt.max_loss", self.halt.max_loss),
        ];
        for (name, limit) in limits {
            if let Some(v) = limit {
                if !(v.is_finite() && v > 0.0) {
                    return Err(RiskError::InvalidParameter(format!("{name} must be positive, got {v}")));
                }
            }
        }
        Ok(())
    }
}
