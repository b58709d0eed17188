//! Factor scoring against forward returns.

use super::Preprocessor;
use crate::domain::{defined, Panel, Value};
use crate::ops::cross_section::rank;
use crate::ops::{FactorContext, FactorExpr, OperatorError};
use serde::{Deserialize, Serialize};

/// `close[t + h] / close[t] - 1`, aligned at `t`. Reads the future, so it is for offline evaluation only.
pub fn forward_returns(close: &Panel, horizon: usize) -> Result<Panel, OperatorError> {
    if horizon == 0 {
        return Err(OperatorError::NonPositiveWindow {
            op: "forward_returns",
            window: horizon,
        });
    }
    close.map_columns(|c| {
        Ok((0..c.len())
            .map(|t| match (c[t], c.get(t + horizon).copied().flatten()) {
                (Some(now), Some(later)) if now != 0.0 => defined(later / now - 1.0),
                _ => None,
            })
            .collect())
    })
}

/// Correlation flavour for IC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IcMethod {
    Pearson,
    /// Pearson on cross-sectional ranks.
    Spearman,
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let ma = a.iter().sum::<f64>() / n;
    let mb = b.iter().sum::<f64>() / n;
    let mut sab = 0.0;
    let mut saa = 0.0;
    let mut sbb = 0.0;
    for (x, y) in a.iter().zip(b) {
        sab += (x - ma) * (y - mb);
        saa += (x - ma) * (x - ma);
        sbb += (y - mb) * (y - mb);
    }
    sab / (saa * sbb).sqrt()
}

/// Per-timestamp cross-sectional IC between a factor and forward returns.
/// Undefined where fewer than three instruments have both values.
pub fn information_coefficient(
    factor: &Panel,
    forward: &Panel,
    method: IcMethod,
) -> Result<Vec<Value>, OperatorError> {
    factor.check_domain(forward)?;
    Ok((0..factor.len())
        .map(|t| {
            let (f_row, r_row) = (factor.row(t), forward.row(t));
            let pairs: Vec<(f64, f64)> = f_row
                .iter()
                .zip(&r_row)
                .filter_map(|(f, r)| Some(((*f)?, (*r)?)))
                .collect();
            if pairs.len() < 3 {
                return None;
            }
            let (mut fs, mut rs): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
            if method == IcMethod::Spearman {
                fs = rank(&fs.iter().map(|x| Some(*x)).collect::<Vec<_>>())
                    .into_iter()
                    .flatten()
                    .collect();
                rs = rank(&rs.iter().map(|x| Some(*x)).collect::<Vec<_>>())
                    .into_iter()
                    .flatten()
                    .collect();
            }
            defined(pearson(&fs, &rs))
        })
        .collect())
}

/// Summary statistics of an IC series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcSummary {
    pub mean: f64,
    pub std: f64,
    /// mean / std.
    pub ir: f64,
    /// mean / (std / √n).
    pub t_stat: f64,
    /// Fraction of periods with IC > 0.
    pub positive_ratio: f64,
    pub observations: usize,
}

impl IcSummary {
    pub fn from_series(ic: &[Value]) -> Self {
        let xs: Vec<f64> = ic.iter().flatten().copied().collect();
        let n = xs.len();
        if n == 0 {
            return Self {
                mean: 0.0,
                std: 0.0,
                ir: 0.0,
                t_stat: 0.0,
                positive_ratio: 0.0,
                observations: 0,
            };
        }
        let mean = xs.iter().sum::<f64>() / n as f64;
        let std = if n > 1 {
            (xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
        } else {
            0.0
        };
        let (ir, t_stat) = if std > 1e-15 {
            (mean / std, mean / (std / (n as f64).sqrt()))
        } else {
            (0.0, 0.0)
        };
        Self {
            mean,
            std,
            ir,
            t_stat,
            positive_ratio: xs.iter().filter(|&&x| x > 0.0).count() as f64 / n as f64,
            observations: n,
        }
    }
}

/// Mean IC at one forward horizon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecayPoint {
    pub horizon: usize,
    pub mean_ic: f64,
    pub observations: usize,
}

/// IC as a function of forward horizon.
pub fn ic_decay(
    factor: &Panel,
    close: &Panel,
    horizons: &[usize],
    method: IcMethod,
) -> Result<Vec<DecayPoint>, OperatorError> {
    horizons
        .iter()
        .map(|&h| {
            let fwd = forward_returns(close, h)?;
            let summary = IcSummary::from_series(&information_coefficient(factor, &fwd, method)?);
            Ok(DecayPoint {
                horizon: h,
                mean_ic: summary.mean,
                observations: summary.observations,
            })
        })
        .collect()
}

/// Mean forward return per factor bucket (bucket 0 = lowest factor values).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileReturns {
    pub bucket_means: Vec<Value>,
    /// Top bucket minus bottom bucket.
    pub long_short: Value,
}

pub fn quantile_returns(
    factor: &Panel,
    forward: &Panel,
    buckets: usize,
) -> Result<QuantileReturns, OperatorError> {
    if buckets < 2 {
        return Err(OperatorError::InvalidParameter {
            op: "quantile_returns",
            reason: format!("need at least 2 buckets, got {buckets}"),
        });
    }
    factor.check_domain(forward)?;
    let mut sums = vec![0.0; buckets];
    let mut counts = vec![0usize; buckets];
    for t in 0..factor.len() {
        let (f_row, r_row) = (factor.row(t), forward.row(t));
        let mut pairs: Vec<(f64, f64)> = f_row
            .iter()
            .zip(&r_row)
            .filter_map(|(f, r)| Some(((*f)?, (*r)?)))
            .collect();
        if pairs.len() < buckets {
            continue;
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let n = pairs.len();
        let mut period_sums = vec![0.0; buckets];
        let mut period_counts = vec![0usize; buckets];
        for (i, (_, r)) in pairs.iter().enumerate() {
            let b = i * buckets / n;
            period_sums[b] += r;
            period_counts[b] += 1;
        }
        for b in 0..buckets {
            if period_counts[b] > 0 {
                sums[b] += period_sums[b] / period_counts[b] as f64;
                counts[b] += 1;
            }
        }
    }
    let bucket_means: Vec<Value> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &c)| if c == 0 { None } else { defined(s / c as f64) })
        .collect();
    let long_short = match (bucket_means[buckets - 1], bucket_means[0]) {
        (Some(top), Some(bottom)) => defined(top - bottom),
        _ => None,
    };
    Ok(QuantileReturns {
        bucket_means,
        long_short,
    })
}

/// Everything the tester knows about one factor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorReport {
    pub ic: IcSummary,
    pub rank_ic: IcSummary,
    pub decay: Vec<DecayPoint>,
    pub quantiles: QuantileReturns,
}

/// Evaluates a factor expression, preprocesses it and scores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorTester {
    pub horizon: usize,
    pub decay_horizons: Vec<usize>,
    pub buckets: usize,
    pub preprocessor: Preprocessor,
}

impl Default for FactorTester {
    fn default() -> Self {
        Self {
            horizon: 1,
            decay_horizons: vec![1, 5, 10, 20],
            buckets: 5,
            preprocessor: Preprocessor::default(),
        }
    }
}

impl FactorTester {
    pub fn run(&self, expr: &FactorExpr, ctx: &FactorContext<'_>) -> Result<FactorReport, OperatorError> {
        let raw = expr.evaluate(ctx)?;
        let factor = self.preprocessor.apply(&raw, ctx.groups)?;
        let close = ctx.fields.field("close")?;
        let fwd = forward_returns(close, self.horizon)?;
        Ok(FactorReport {
            ic: IcSummary::from_series(&information_coefficient(&factor, &fwd, IcMethod::Pearson)?),
            rank_ic: IcSummary::from_series(&information_coefficient(
                &factor,
                &fwd,
                IcMethod::Spearman,
            )?),
            decay: ic_decay(&factor, close, &self.decay_horizons, IcMethod::Spearman)?,
            quantiles: quantile_returns(&factor, &fwd, self.buckets)?,
        })
    }
}
