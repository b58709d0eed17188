//! L0 primitives: lags, rolling aggregates, moving averages, rolling regression.
//!
//! Conventions:
//! - `stddev` is the sample standard deviation (n-1 denominator).
//! - `ema(n)` uses alpha = 2/(n+1), seeded by the SMA of the first `n` values.
//! - `sma(n, m)` is the weighted recursion `y = (m·x + (n-m)·y') / n`, seeded the same way.
//!   `sma(n, 1)` is Wilder smoothing.
//! - `wma(n)` weights the window 1..n, newest heaviest.
//! - `slope(n)` / `forecast(n)` are the OLS slope and fitted value at the newest
//!   point of a regression on bar index within the window.

use super::{check_window, mean, recursive, rolling, sample_variance, OperatorError};
use crate::domain::{defined, Value};

/// `x[t - n]`.
pub fn delay(x: &[Value], n: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("delay", n)?;
    Ok((0..x.len())
        .map(|t| if t >= n { x[t - n] } else { None })
        .collect())
}

/// `x[t] - x[t - n]`.
pub fn diff(x: &[Value], n: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("diff", n)?;
    Ok((0..x.len())
        .map(|t| match (t >= n).then(|| (x[t], x[t - n])) {
            Some((Some(a), Some(b))) => defined(a - b),
            _ => None,
        })
        .collect())
}

/// Rolling sum.
pub fn sum(x: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("sum", window)?;
    Ok(rolling(x, window, |w| w.iter().sum()))
}

/// Rolling sample standard deviation.
pub fn stddev(x: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("std", window)?;
    Ok(rolling(x, window, |w| sample_variance(w).sqrt()))
}

/// Highest value over the window.
pub fn hhv(x: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("hhv", window)?;
    Ok(rolling(x, window, |w| {
        w.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }))
}

/// Lowest value over the window.
pub fn llv(x: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("llv", window)?;
    Ok(rolling(x, window, |w| w.iter().copied().fold(f64::INFINITY, f64::min)))
}

/// Simple moving average.
pub fn ma(x: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("ma", window)?;
    Ok(rolling(x, window, |w| mean(w.iter().copied())))
}

/// Exponential moving average.
pub fn ema(x: &[Value], n: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("ema", n)?;
    let alpha = 2.0 / (n as f64 + 1.0);
    Ok(recursive(x, n, |prev, v| prev + alpha * (v - prev)))
}

/// Weighted recursive average `(m·x + (n-m)·prev) / n`.
pub fn sma(x: &[Value], n: usize, m: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("sma", n)?;
    if m == 0 || m > n {
        return Err(OperatorError::InvalidParameter {
            op: "sma",
            reason: format!("weight m must be in 1..={n}, got {m}"),
        });
    }
    let (n_f, m_f) = (n as f64, m as f64);
    Ok(recursive(x, n, |prev, v| (m_f * v + (n_f - m_f) * prev) / n_f))
}

/// Linearly weighted moving average.
pub fn wma(x: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("wma", window)?;
    let norm = (window * (window + 1)) as f64 / 2.0;
    Ok(rolling(x, window, |w| {
        w.iter()
            .enumerate()
            .map(|(i, v)| (i + 1) as f64 * v)
            .sum::<f64>()
            / norm
    }))
}

/// OLS (slope, intercept) of `ys` on 0..n.
fn regress(ys: &[f64]) -> (f64, f64) {
    let n = ys.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(ys.iter().copied());
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;
    (slope, y_mean - slope * x_mean)
}

/// Rolling linear-regression slope per bar.
pub fn slope(x: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("slope", window)?;
    Ok(rolling(x, window, |w| regress(w).0))
}

/// Rolling linear-regression fitted value at the newest bar.
pub fn forecast(x: &[Value], window: usize) -> Result<Vec<Value>, OperatorError> {
    check_window("forecast", window)?;
    Ok(rolling(x, window, |w| {
        let (b, a) = regress(w);
        a + b * (w.len() - 1) as f64
    }))
}

/// -1, 0 or +1.
pub fn sign(x: &[Value]) -> Vec<Value> {
    x.iter()
        .map(|v| {
            v.map(|v| {
                if v > 0.0 {
                    1.0
                } else if v < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            })
        })
        .collect()
}

pub fn abs(x: &[Value]) -> Vec<Value> {
    x.iter().map(|v| v.map(f64::abs)).collect()
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;

    #[test]
    fn delay_shifts_and_pads() {
        let out = delay(&vals(&[1.0, 2.0, 3.0]), 1).unwrap();
        assert_eq!(out, vec![None, Some(1.0), Some(2.0)]);
        assert!(delay(&vals(&[1.0]), 0).is_err());
    }

    #[test]
    fn diff_propagates_undefined() {
        let out = diff(&vals(&[1.0, f64::NAN, 4.0, 7.0]), 1).unwrap();
        assert_eq!(out, vec![None, None, None, Some(3.0)]);
    }

    #[test]
    fn stddev_is_sample() {
        let out = stddev(&vals(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 8).unwrap();
        // population std is 2.0; sample std = sqrt(32/7)
        assert_approx(out[7], (32.0f64 / 7.0).sqrt(), DEFAULT_EPSILON);
    }

    #[test]
    fn stddev_of_one_is_undefined() {
        let out = stddev(&vals(&[1.0, 2.0]), 1).unwrap();
        assert_eq!(out, vec![None, None]);
    }

    #[test]
    fn extrema() {
        let x = vals(&[3.0, 1.0, 4.0, 1.0, 5.0]);
        assert_eq!(hhv(&x, 3).unwrap(), vec![None, None, Some(4.0), Some(4.0), Some(5.0)]);
        assert_eq!(llv(&x, 3).unwrap(), vec![None, None, Some(1.0), Some(1.0), Some(1.0)]);
    }

    #[test]
    fn ma_known_values() {
        let out = ma(&vals(&[1.0, 2.0, 3.0, 4.0, 5.0]), 3).unwrap();
        assert_eq!(undefined_prefix(&out), 2);
        assert_approx(out[2], 2.0, DEFAULT_EPSILON);
        assert_approx(out[4], 4.0, DEFAULT_EPSILON);
    }

    #[test]
    fn ema_seed_and_recursion() {
        let out = ema(&vals(&[1.0, 2.0, 3.0, 4.0]), 3).unwrap();
        assert_eq!(undefined_prefix(&out), 2);
        assert_approx(out[2], 2.0, DEFAULT_EPSILON);
        // alpha = 0.5: 2 + 0.5 * (4 - 2) = 3
        assert_approx(out[3], 3.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sma_weighted_recursion() {
        // n=3, m=1: y = (x + 2 y') / 3
        let out = sma(&vals(&[3.0, 3.0, 3.0, 6.0]), 3, 1).unwrap();
        assert_approx(out[2], 3.0, DEFAULT_EPSILON);
        assert_approx(out[3], 4.0, DEFAULT_EPSILON);
        assert!(sma(&vals(&[1.0]), 3, 0).is_err());
        assert!(sma(&vals(&[1.0]), 3, 4).is_err());
    }

    #[test]
    fn wma_weights_newest_heaviest() {
        let out = wma(&vals(&[1.0, 2.0, 3.0]), 3).unwrap();
        // (1*1 + 2*2 + 3*3) / 6
        assert_approx(out[2], 14.0 / 6.0, DEFAULT_EPSILON);
    }

    #[test]
    fn slope_and_forecast_on_line() {
        let x = vals(&[1.0, 3.0, 5.0, 7.0]);
        let s = slope(&x, 3).unwrap();
        let f = forecast(&x, 3).unwrap();
        assert_approx(s[3], 2.0, DEFAULT_EPSILON);
        assert_approx(f[3], 7.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sign_and_abs() {
        let x = vals(&[-2.0, 0.0, 3.0, f64::NAN]);
        assert_eq!(sign(&x), vec![Some(-1.0), Some(0.0), Some(1.0), None]);
        assert_eq!(abs(&x), vec![Some(2.0), Some(0.0), Some(3.0), None]);
    }

    #[test]
    fn undefined_propagates_through_window() {
        let out = sum(&vals(&[1.0, 1.0, f64::NAN, 1.0, 1.0, 1.0]), 2).unwrap();
        assert_eq!(out, vec![None, Some(2.0), None, None, Some(2.0), Some(2.0)]);
    }
}
