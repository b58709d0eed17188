//! L2 cross-sectional operators: one row (all instruments at one timestamp) in,
//! one row out. Undefined entries are skipped in the statistics and stay undefined.

use super::{average_rank, mean, sample_variance, OperatorError};
use crate::domain::{defined, Value};
use std::collections::BTreeMap;

fn defined_values(row: &[Value]) -> Vec<f64> {
    row.iter().flatten().copied().collect()
}

/// Linear-interpolated quantile of an ascending slice. NaN when empty.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

pub(crate) fn sorted(mut xs: Vec<f64>) -> Vec<f64> {
    xs.sort_by(f64::total_cmp);
    xs
}

/// Percentile rank across instruments, ties averaged, in (0, 1].
pub fn rank(row: &[Value]) -> Vec<Value> {
    let xs = defined_values(row);
    let n = xs.len() as f64;
    row.iter()
        .map(|v| v.and_then(|x| defined(average_rank(&xs, x) / n)))
        .collect()
}

/// `(rank - 1) / (n - 1)`: 0 for the smallest, 1 for the largest.
/// Undefined when fewer than two instruments are defined.
pub fn percentile(row: &[Value]) -> Vec<Value> {
    let xs = defined_values(row);
    let n = xs.len() as f64;
    row.iter()
        .map(|v| v.and_then(|x| defined((average_rank(&xs, x) - 1.0) / (n - 1.0))))
        .collect()
}

/// Rescale so that Σ|x| equals `a`.
pub fn scale(row: &[Value], a: f64) -> Result<Vec<Value>, OperatorError> {
    if !(a.is_finite() && a > 0.0) {
        return Err(OperatorError::InvalidParameter {
            op: "scale",
            reason: format!("target must be positive, got {a}"),
        });
    }
    let gross: f64 = row.iter().flatten().map(|x| x.abs()).sum();
    Ok(row
        .iter()
        .map(|v| v.and_then(|x| defined(x * a / gross)))
        .collect())
}

/// `(x - mean) / sample std` across instruments.
pub fn zscore(row: &[Value]) -> Vec<Value> {
    let xs = defined_values(row);
    let m = mean(xs.iter().copied());
    let sd = sample_variance(&xs).sqrt();
    row.iter()
        .map(|v| {
            v.and_then(|x| {
                if sd == 0.0 {
                    None
                } else {
                    defined((x - m) / sd)
                }
            })
        })
        .collect()
}

/// Clip to the `[lower, upper]` quantile band of the row. Nothing is dropped.
pub fn winsorize(row: &[Value], lower: f64, upper: f64) -> Result<Vec<Value>, OperatorError> {
    if !(0.0..=1.0).contains(&lower) || !(0.0..=1.0).contains(&upper) || lower >= upper {
        return Err(OperatorError::InvalidParameter {
            op: "winsorize",
            reason: format!("need 0 <= lower < upper <= 1, got [{lower}, {upper}]"),
        });
    }
    let xs = sorted(defined_values(row));
    let lo = quantile_sorted(&xs, lower);
    let hi = quantile_sorted(&xs, upper);
    Ok(row.iter().map(|v| v.map(|x| x.clamp(lo, hi))).collect())
}

/// Demean within each group. Ungrouped or undefined entries are undefined.
pub fn industry_neutralize(row: &[Value], groups: &[Option<&str>]) -> Result<Vec<Value>, OperatorError> {
    if row.len() != groups.len() {
        return Err(OperatorError::LengthMismatch {
            op: "industry_neutralize",
            left: row.len(),
            right: groups.len(),
        });
    }
    let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for (v, g) in row.iter().zip(groups) {
        if let (Some(x), Some(g)) = (v, g) {
            let e = sums.entry(*g).or_insert((0.0, 0));
            e.0 += x;
            e.1 += 1;
        }
    }
    Ok(row
        .iter()
        .zip(groups)
        .map(|(v, g)| {
            let x = (*v)?;
            let (s, n) = sums.get((*g)?)?;
            defined(x - s / *n as f64)
        })
        .collect())
}
