//! L1 time-series operators.
//!
//! All statistics use only the trailing window ending at `t`. `returns` reads
//! `x[t - n]` and `x[t]`, nothing later.

use super::{
    average_rank, check_lengths, check_window, mean, rolling, rolling2, sample_variance,
    OperatorError,
};
use crate::domain::{defined, Value};

/// Percentile rank (ties averaged) of the newest value within its window, in (0, 1].
pub fn ts_rank(x: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("ts_rank", window)?;
    Ok(rolling(x, window, |w| {
        let newest = w[w.len() - 1];
        average_rank(w, newest) / w.len() as f64
    }))
}

pub fn ts_min(x: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("ts_min", window)?;
    Ok(rolling(x, window, |w| w.iter().copied().fold(f64::INFINITY, f64::min)))
}

pub fn ts_max(x: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("ts_max", window)?;
    Ok(rolling(x, window, |w| {
        w.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }))
}

/// 1-based position of the window minimum (oldest = 1, first occurrence on ties).
pub fn ts_argmin(x: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("ts_argmin", window)?;
    Ok(rolling(x, window, |w| arg_extreme(w, |a, b| a < b)))
}

/// 1-based position of the window maximum (oldest = 1, first occurrence on ties).
pub fn ts_argmax(x: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("ts_argmax", window)?;
    Ok(rolling(x, window, |w| arg_extreme(w, |a, b| a > b)))
}

fn arg_extreme(w: &[f64], better: impl Fn(f64, f64) -> bool) -> f64 {
    let mut best = 0;
    for (i, &v) in w.iter().enumerate().skip(1) {
        if better(v, w[best]) {
            best = i;
        }
    }
    (best + 1) as f64
}

/// Linearly decaying weighted average; the newest value has weight `d`.
pub fn decay_linear(x: &[Value], d: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("decay_linear", d)?;
    let norm = (d * (d + 1)) as f64 / 2.0;
    Ok(rolling(x, d, |w| {
        w.iter()
            .enumerate()
            .map(|(i, v)| (i + 1) as f64 * v)
            .sum::<f64>()
            / norm
    }))
}

fn sample_covariance(a: &[f64], b: &[f64]) -> f64 {
    if a.len() < 2 {
        return f64::NAN;
    }
    let ma = mean(a.iter().copied());
    let mb = mean(b.iter().copied());
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - ma) * (y - mb))
        .sum::<f64>()
        / (a.len() - 1) as f64
}

/// Rolling Pearson correlation. Undefined when either side has zero variance.
pub fn correlation(x: &[Value], y: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("correlation", window)?;
    check_lengths("correlation", x, y)?;
    Ok(rolling2(x, y, window, |a, b| {
        let sa = sample_variance(a).sqrt();
        let sb = sample_variance(b).sqrt();
        if sa == 0.0 || sb == 0.0 {
            return f64::NAN;
        }
        sample_covariance(a, b) / (sa * sb)
    }))
}

/// Rolling sample covariance.
pub fn covariance(x: &[Value], y: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("covariance", window)?;
    check_lengths("covariance", x, y)?;
    Ok(rolling2(x, y, window, sample_covariance))
}

/// Simple return over `n` periods: `x[t] / x[t-n] - 1`.
pub fn returns(x: &[Value], n: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("returns", n)?;
    Ok((0..x.len())
        .map(|t| {
            if t < n {
                return None;
            }
            match (x[t], x[t - n]) {
                (Some(now), Some(then)) if then != 0.0 => defined(now / then - 1.0),
                _ => None,
            }
        })
        .collect())
}

/// Number of non-zero values of `cond` over the window.
pub fn count(cond: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("count", window)?;
    Ok(rolling(cond, window, |w| {
        w.iter().filter(|&&c| c != 0.0).count() as f64
    }))
}

/// Sum of `x` over the window where `cond` is non-zero.
pub fn sumif(x: &[Value], cond: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("sumif", window)?;
    check_lengths("sumif", x, cond)?;
    Ok(rolling2(x, cond, window, |xs, cs| {
        xs.iter()
            .zip(cs)
            .filter(|(_, c)| **c != 0.0)
            .map(|(x, _)| x)
            .sum()
    }))
}

/// Ticks since `cond` was last non-zero (0 on the tick it holds).
/// Undefined before the first occurrence and wherever `cond` is undefined.
pub fn barslast(cond: &[Value]) -> Vec<Value> {
    let mut last: Option<usize> = None;
    cond.iter()
        .enumerate()
        .map(|(t, c)| {
            let c = (*c)?;
            if c != 0.0 {
                last = Some(t);
            }
            last.map(|l| (t - l) as f64)
        })
        .collect()
}

/// 1 when `a` crosses above `b` at `t` (`a[t-1] <= b[t-1]` and `a[t] > b[t]`), else 0.
pub fn cross(a: &[Value], b: &[Value]) -> Result<Vec<Value>, OperatorError> {
    check_lengths("cross", a, b)?;
    Ok((0..a.len())
        .map(|t| {
            if t == 0 {
                return None;
            }
            match (a[t - 1], b[t - 1], a[t], b[t]) {
                (Some(a0), Some(b0), Some(a1), Some(b1)) => {
                    Some(if a0 <= b0 && a1 > b1 { 1.0 } else { 0.0 })
                }
                _ => None,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;

    #[test]
    fn ts_rank_of_newest() {
        let out = ts_rank(&vals(&[1.0, 3.0, 2.0, 5.0]), 3).unwrap();
        // window [1,3,2]: 2 ranks 2nd of 3
        assert_approx(out[2], 2.0 / 3.0, DEFAULT_EPSILON);
        // window [3,2,5]: 5 ranks 3rd of 3
        assert_approx(out[3], 1.0, DEFAULT_EPSILON);
    }

    #[test]
    fn arg_extrema_are_one_based_from_oldest() {
        let x = vals(&[5.0, 1.0, 3.0, 9.0]);
        let amax = ts_argmax(&x, 3).unwrap();
        let amin = ts_argmin(&x, 3).unwrap();
        assert_eq!(amax[2], Some(1.0));
        assert_eq!(amin[2], Some(2.0));
        assert_eq!(amax[3], Some(3.0));
        assert_eq!(amin[3], Some(1.0));
    }

    #[test]
    fn ts_min_max() {
        let x = vals(&[5.0, 1.0, 3.0, 9.0]);
        assert_eq!(ts_min(&x, 2).unwrap()[3], Some(3.0));
        assert_eq!(ts_max(&x, 2).unwrap()[3], Some(9.0));
    }

    #[test]
    fn decay_linear_weights() {
        let out = decay_linear(&vals(&[0.0, 0.0, 6.0]), 3).unwrap();
        assert_approx(out[2], 3.0, DEFAULT_EPSILON);
    }

    #[test]
    fn correlation_perfect_and_degenerate() {
        let x = vals(&[1.0, 2.0, 3.0, 4.0]);
        let y = vals(&[2.0, 4.0, 6.0, 8.0]);
        let z = vals(&[4.0, 3.0, 2.0, 1.0]);
        let flat = vals(&[1.0, 1.0, 1.0, 1.0]);
        assert_approx(correlation(&x, &y, 4).unwrap()[3], 1.0, 1e-12);
        assert_approx(correlation(&x, &z, 4).unwrap()[3], -1.0, 1e-12);
        assert_eq!(correlation(&x, &flat, 4).unwrap()[3], None);
    }

    #[test]
    fn covariance_matches_sample_formula() {
        let x = vals(&[1.0, 2.0, 3.0]);
        let y = vals(&[1.0, 4.0, 7.0]);
        assert_approx(covariance(&x, &y, 3).unwrap()[2], 3.0, DEFAULT_EPSILON);
    }

    #[test]
    fn mismatched_lengths_are_structural() {
        assert!(matches!(
            covariance(&vals(&[1.0]), &vals(&[1.0, 2.0]), 1),
            Err(OperatorError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn returns_use_only_past() {
        let out = returns(&vals(&[100.0, 110.0, 99.0]), 1).unwrap();
        assert_eq!(out[0], None);
        assert_approx(out[1], 0.1, 1e-12);
        assert_approx(out[2], -0.1, 1e-12);
    }

    #[test]
    fn returns_from_zero_are_undefined() {
        let out = returns(&vals(&[0.0, 1.0]), 1).unwrap();
        assert_eq!(out[1], None);
    }

    #[test]
    fn count_and_sumif() {
        let cond = vals(&[1.0, 0.0, 1.0, 1.0]);
        let x = vals(&[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(count(&cond, 3).unwrap()[3], Some(2.0));
        assert_eq!(sumif(&x, &cond, 3).unwrap()[3], Some(70.0));
    }

    #[test]
    fn barslast_counts_since_event() {
        let cond = vals(&[0.0, 1.0, 0.0, 0.0, 1.0, f64::NAN]);
        assert_eq!(
            barslast(&cond),
            vec![None, Some(0.0), Some(1.0), Some(2.0), Some(0.0), None]
        );
    }

    #[test]
    fn cross_detects_upward_crossing_only() {
        let a = vals(&[1.0, 3.0, 2.0, 0.0]);
        let b = vals(&[2.0, 2.0, 2.0, 2.0]);
        assert_eq!(
            cross(&a, &b).unwrap(),
            vec![None, Some(1.0), Some(0.0), Some(0.0)]
        );
    }
}
