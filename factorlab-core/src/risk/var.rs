//! Value-at-Risk and Conditional VaR over a window of per-tick returns.
//!
//! All estimates are positive loss fractions: a VaR of 0.02 at 95% means a 5%
//! chance of losing more than 2% of equity over one tick.

use super::RiskError;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Distribution;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};
use statrs::statistics::Statistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarMethod {
    #[default]
    Historical,
    /// Variance-covariance under a normal fit.
    Parametric,
    /// Normal fit, then seeded simulation.
    MonteCarlo,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VarEstimate {
    pub method: VarMethod,
    pub confidence: f64,
    pub var: f64,
    pub cvar: f64,
    pub observations: usize,
}

fn check_confidence(confidence: f64) -> Result<(), RiskError> {
    if confidence > 0.0 && confidence < 1.0 {
        Ok(())
    } else {
        Err(RiskError::InvalidConfidence(confidence))
    }
}

fn check_len(returns: &[f64], needed: usize) -> Result<(), RiskError> {
    if returns.len() < needed {
        return Err(RiskError::InsufficientData {
            needed,
            got: returns.len(),
        });
    }
    Ok(())
}

fn std_normal() -> Result<Normal, RiskError> {
    Normal::new(0.0, 1.0).map_err(|e| RiskError::Numeric(e.to_string()))
}

/// Empirical lower quantile: the smallest return with at least `1 - c` of the
/// sample at or below it. CVaR is the mean of that tail.
pub fn historical_var(returns: &[f64], confidence: f64) -> Result<VarEstimate, RiskError> {
    check_confidence(confidence)?;
    check_len(returns, 1)?;
    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);
    let tail = (((1.0 - confidence) * sorted.len() as f64 - 1e-9).ceil() as usize).clamp(1, sorted.len());
    let q = sorted[tail - 1];
    let tail_mean = sorted[..tail].iter().mean();
    Ok(VarEstimate {
        method: VarMethod::Historical,
        confidence,
        var: -q,
        cvar: -tail_mean,
        observations: returns.len(),
    })
}

/// `VaR = -(μ + zσ)`, `CVaR = -(μ - σφ(z)/(1-c))` with `z = Φ⁻¹(1-c)`.
pub fn parametric_var(returns: &[f64], confidence: f64) -> Result<VarEstimate, RiskError> {
    check_confidence(confidence)?;
    check_len(returns, 2)?;
    let mu = returns.iter().mean();
    let sigma = returns.iter().std_dev();
    let n = std_normal()?;
    let z = n.inverse_cdf(1.0 - confidence);
    Ok(VarEstimate {
        method: VarMethod::Parametric,
        confidence,
        var: -(mu + z * sigma),
        cvar: -(mu - sigma * n.pdf(z) / (1.0 - confidence)),
        observations: returns.len(),
    })
}

/// Fit a normal, draw `paths` one-tick returns from a seeded generator, and take
/// the historical estimate of the draws.
pub fn monte_carlo_var(
    returns: &[f64],
    confidence: f64,
    paths: usize,
    seed: u64,
) -> Result<VarEstimate, RiskError> {
    check_confidence(confidence)?;
    check_len(returns, 2)?;
    if paths == 0 {
        return Err(RiskError::InvalidParameter("monte carlo paths must be positive".into()));
    }
    let mu = returns.iter().mean();
    let sigma = returns.iter().std_dev();
    let dist = rand_distr::Normal::new(mu, sigma).map_err(|e| RiskError::Numeric(e.to_string()))?;
    let mut rng = StdRng::seed_from_u64(seed);
    let draws: Vec<f64> = (0..paths).map(|_| dist.sample(&mut rng)).collect();
    let sim = historical_var(&draws, confidence)?;
    Ok(VarEstimate {
        method: VarMethod::MonteCarlo,
        observations: returns.len(),
        ..sim
    })
}

/// VaR settings plus the estimator dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarConfig {
    #[serde(default)]
    pub method: VarMethod,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Most recent returns considered.
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    /// Below this many returns VaR is undefined.
    #[serde(default = "default_min_observations")]
    pub min_observations: usize,
    #[serde(default = "default_paths")]
    pub paths: usize,
}

fn default_confidence() -> f64 {
    0.95
}

fn default_lookback() -> usize {
    60
}

fn default_min_observations() -> usize {
    20
}

fn default_paths() -> usize {
    10_000
}

impl Default for VarConfig {
    fn default() -> Self {
        Self {
            method: VarMethod::default(),
            confidence: default_confidence(),
            lookback: default_lookback(),
            min_observations: default_min_observations(),
            paths: default_paths(),
        }
    }
}

impl VarConfig {
    pub fn validate(&self) -> Result<(), RiskError> {
        check_confidence(self.confidence)?;
        if self.lookback < 2 {
            return Err(RiskError::InvalidParameter(format!(
                "VaR lookback must be at least 2, got {}",
                self.lookback
            )));
        }
        if self.min_observations < 2 {
            return Err(RiskError::InvalidParameter(format!(
                "VaR min_observations must be at least 2, got {}",
                self.min_observations
            )));
        }
        if self.paths == 0 {
            return Err(RiskError::InvalidParameter("monte carlo paths must be positive".into()));
        }
        Ok(())
    }

    /// Estimate over the trailing `lookback` returns. `None` with too little history.
    /// `seed` drives the Monte Carlo draws and is ignored by the other methods.
    pub fn estimate(&self, returns: &[f64], seed: u64) -> Result<Option<VarEstimate>, RiskError> {
        let window = &returns[returns.len().saturating_sub(self.lookback)..];
        if window.len() < self.min_observations {
            return Ok(None);
        }
        let est = match self.method {
            VarMethod::Historical => historical_var(window, self.confidence)?,
            VarMethod::Parametric => parametric_var(window, self.confidence)?,
            VarMethod::MonteCarlo => monte_carlo_var(window, self.confidence, self.paths, seed)?,
        };
        Ok(Some(est))
    }
}
