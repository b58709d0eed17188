//! Factor exposures: how much of the portfolio's return a fixed factor set explains.

use super::RiskError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const PIVOT_EPSILON: f64 = 1e-12;

/// OLS fit of portfolio returns on factor returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureReport {
    pub alpha: f64,
    pub betas: BTreeMap<String, f64>,
    pub r_squared: f64,
    pub observations: usize,
}

/// Regress `portfolio` on the named factor series (intercept included).
///
/// Every factor series must be as long as `portfolio`. Needs more observations
/// than coefficients.
pub fn regress_exposures(
    portfolio: &[f64],
    factors: &BTreeMap<String, Vec<f64>>,
) -> Result<ExposureReport, RiskError> {
    let n = portfolio.len();
    let k = factors.len() + 1;
    for (name, series) in factors {
        if series.len() != n {
            return Err(RiskError::DimensionMismatch(format!(
                "factor {name} has {} observations, portfolio has {n}",
                series.len()
            )));
        }
    }
    if n <= k {
        return Err(RiskError::InsufficientData { needed: k + 1, got: n });
    }

    // design rows: [1, f1, f2, ...]
    let columns: Vec<&Vec<f64>> = factors.values().collect();
    let row = |t: usize| -> Vec<f64> {
        std::iter::once(1.0).chain(columns.iter().map(|c| c[t])).collect()
    };

    // normal equations: (XᵀX) β = Xᵀy
    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for (t, y) in portfolio.iter().enumerate() {
        let x = row(t);
        for i in 0..k {
            xty[i] += x[i] * y;
            for j in 0..k {
                xtx[i][j] += x[i] * x[j];
            }
        }
    }
    let beta = solve(xtx, xty)?;

    let mean_y = portfolio.iter().sum::<f64>() / n as f64;
    let (mut ss_res, mut ss_tot) = (0.0, 0.0);
    for (t, y) in portfolio.iter().enumerate() {
        let fitted: f64 = row(t).iter().zip(&beta).map(|(x, b)| x * b).sum();
        ss_res += (y - fitted).powi(2);
        ss_tot += (y - mean_y).powi(2);
    }
    let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

    Ok(ExposureReport {
        alpha: beta[0],
        betas: factors.keys().cloned().zip(beta[1..].iter().copied()).collect(),
        r_squared,
        observations: n,
    })
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, RiskError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < PIVOT_EPSILON {
            return Err(RiskError::Singular);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for c in col..n {
                a[row][c] -= factor * a[col][c];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|c| a[row][c] * x[c]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

/// Position-weighted exposure: `Σ weight_i × loading_{i,f}` per factor.
/// Instruments without loadings contribute nothing.
pub fn holdings_exposure(
    weights: &BTreeMap<String, f64>,
    loadings: &BTreeMap<String, BTreeMap<String, f64>>,
) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for (instrument, w) in weights {
        if let Some(per_factor) = loadings.get(instrument) {
            for (factor, loading) in per_factor {
                *out.entry(factor.clone()).or_insert(0.0) += w * loading;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_known_betas() {
        let market: Vec<f64> = (0..30).map(|i| ((i * 7 % 13) as f64 - 6.0) / 100.0).collect();
        let size: Vec<f64> = (0..30).map(|i| ((i * 5 % 11) as f64 - 5.0) / 200.0).collect();
        let portfolio: Vec<f64> = market
            .iter()
            .zip(&size)
            .map(|(m, s)| 0.001 + 1.2 * m - 0.5 * s)
            .collect();
        let mut factors = BTreeMap::new();
        factors.insert("market".to_string(), market);
        factors.insert("size".to_string(), size);

        let report = regress_exposures(&portfolio, &factors).unwrap();
        assert!((report.alpha - 0.001).abs() < 1e-9);
        assert!((report.betas["market"] - 1.2).abs() < 1e-9);
        assert!((report.betas["size"] + 0.5).abs() < 1e-9);
        assert!((report.r_squared - 1.0).abs() < 1e-9);
    }

    #[test]
    fn collinear_factors_are_singular() {
        let f: Vec<f64> = (0..10).map(|i| i as f64 / 100.0).collect();
        let mut factors = BTreeMap::new();
        factors.insert("a".to_string(), f.clone());
        factors.insert("b".to_string(), f.iter().map(|x| 2.0 * x).collect());
        let y = f.clone();
        assert_eq!(regress_exposures(&y, &factors), Err(RiskError::Singular));
    }

    #[test]
    fn too_few_observations() {
        let mut factors = BTreeMap::new();
        factors.insert("m".to_string(), vec![0.1, 0.2]);
        assert!(matches!(
            regress_exposures(&[0.1, 0.2], &factors),
            Err(RiskError::InsufficientData { .. })
        ));
    }

    #[test]
    fn holdings_weighted_loadings() {
        let mut weights = BTreeMap::new();
        weights.insert("A".to_string(), 0.6);
        weights.insert("B".to_string(), 0.4);
        weights.insert("C".to_string(), 1.0);
        let mut loadings = BTreeMap::new();
        loadings.insert("A".to_string(), BTreeMap::from([("beta".to_string(), 1.0)]));
        loadings.insert("B".to_string(), BTreeMap::from([("beta".to_string(), 2.0)]));
        let exp = holdings_exposure(&weights, &loadings);
        assert!((exp["beta"] - 1.4).abs() < 1e-12);
    }
}
