//! L3 composite technical indicators, built from L0/L1 primitives.
//!
//! Windowing conventions:
//! - RSI: Wilder smoothing (`sma(·, n, 1)`) of gains and losses; first value at index `n`.
//!   avg_loss == 0 → 100; avg_gain == 0 → 0; both zero → 50.
//! - MACD: DIF = EMA(fast) - EMA(slow), DEA = EMA(DIF, signal), histogram = 2·(DIF - DEA).
//! - BOLL: mid = MA(n), bands = mid ± k·STD(n) (sample std).
//! - ATR: Wilder smoothing of the true range; the first bar's TR is high - low.
//! - KDJ: RSV = (C - LLV(L, n)) / (HHV(H, n) - LLV(L, n)) · 100 (50 on a flat range),
//!   K = SMA(RSV, m1, 1), D = SMA(K, m2, 1), J = 3K - 2D.

use super::primitives::{diff, ema, hhv, llv, ma, sma, stddev};
use super::{check_lengths, OperatorError};
use crate::domain::{defined, Value};
use serde::{Deserialize, Serialize};

fn zip_with(a: &[Value], b: &[Value], f: impl Fn(f64, f64) -> f64) -> Vec<Value> {
    a.iter()
        .zip(b)
        .map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => defined(f(*x, *y)),
            _ => None,
        })
        .collect()
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

/// Relative Strength Index.
pub fn rsi(close: &[Value], period: usize) -> Result<Vec<Value>, OperatorError> {
    let change = diff(close, 1)?;
    let gains: Vec<Value> = change.iter().map(|c| c.map(|c| c.max(0.0))).collect();
    let losses: Vec<Value> = change.iter().map(|c| c.map(|c| (-c).max(0.0))).collect();
    let avg_gain = sma(&gains, period, 1)?;
    let avg_loss = sma(&losses, period, 1)?;
    Ok(zip_with(&avg_gain, &avg_loss, rsi_from_averages))
}

/// MACD lines.
#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub dif: Vec<Value>,
    pub dea: Vec<Value>,
    pub histogram: Vec<Value>,
}

pub fn macd(close: &[Value], fast: usize, slow: usize, signal: usize) -> Result<Macd, OperatorError> {
    if fast >= slow {
        return Err(OperatorError::InvalidParameter {
            op: "macd",
            reason: format!("fast ({fast}) must be shorter than slow ({slow})"),
        });
    }
    let dif = zip_with(&ema(close, fast)?, &ema(close, slow)?, |f, s| f - s);
    let dea = ema(&dif, signal)?;
    let histogram = zip_with(&dif, &dea, |d, e| 2.0 * (d - e));
    Ok(Macd {
        dif,
        dea,
        histogram,
    })
}

/// Bollinger bands.
#[derive(Debug, Clone, PartialEq)]
pub struct Bollinger {
    pub mid: Vec<Value>,
    pub upper: Vec<Value>,
    pub lower: Vec<Value>,
}

pub fn boll(close: &[Value], period: usize, k: f64) -> Result<Bollinger, OperatorError> {
    if !(k.is_finite() && k > 0.0) {
        return Err(OperatorError::InvalidParameter {
            op: "boll",
            reason: format!("band width must be positive, got {k}"),
        });
    }
    let mid = ma(close, period)?;
    let sd = stddev(close, period)?;
    let upper = zip_with(&mid, &sd, |m, s| m + k * s);
    let lower = zip_with(&mid, &sd, |m, s| m - k * s);
    Ok(Bollinger { mid, upper, lower })
}

/// True range: max(H - L, |H - C_prev|, |L - C_prev|); the first bar uses H - L.
pub fn true_range(high: &[Value], low: &[Value], close: &[Value]) -> Result<Vec<Value>, OperatorError> {
    check_lengths("true_range", high, low)?;
    check_lengths("true_range", high, close)?;
    Ok((0..high.len())
        .map(|t| {
            let (h, l) = (high[t]?, low[t]?);
            if t == 0 {
                return defined(h - l);
            }
            let pc = close[t - 1]?;
            defined((h - l).max((h - pc).abs()).max((l - pc).abs()))
        })
        .collect())
}

/// Average True Range with Wilder smoothing.
pub fn atr(high: &[Value], low: &[Value], close: &[Value], period: usize) -> Result<Vec<Value>, OperatorError> {
    let tr = true_range(high, low, close)?;
    sma(&tr, period, 1)
}

/// KDJ stochastic lines.
#[derive(Debug, Clone, PartialEq)]
pub struct Kdj {
    pub k: Vec<Value>,
    pub d: Vec<Value>,
    pub j: Vec<Value>,
}

pub fn kdj(
    high: &[Value],
    low: &[Value],
    close: &[Value],
    n: usize,
    m1: usize,
    m2: usize,
) -> Result<Kdj, OperatorError> {
    check_lengths("kdj", high, low)?;
    check_lengths("kdj", high, close)?;
    let hh = hhv(high, n)?;
    let ll = llv(low, n)?;
    let rsv: Vec<Value> = (0..close.len())
        .map(|t| {
            let (c, h, l) = (close[t]?, hh[t]?, ll[t]?);
            let range = h - l;
            if range == 0.0 {
                Some(50.0)
            } else {
                defined((c - l) / range * 100.0)
            }
        })
        .collect();
    let k = sma(&rsv, m1, 1)?;
    let d = sma(&k, m2, 1)?;
    let j = zip_with(&k, &d, |k, d| 3.0 * k - 2.0 * d);
    Ok(Kdj { k, d, j })
}

/// Which MACD line to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MacdLine {
    Dif,
    Dea,
    Histogram,
}

/// Which Bollinger band to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BollBand {
    Mid,
    Upper,
    Lower,
}

/// Which KDJ line to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KdjLine {
    K,
    D,
    J,
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;

    #[test]
    fn rsi_all_gains_is_100() {
        let close = vals(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let out = rsi(&close, 3).unwrap();
        assert_eq!(undefined_prefix(&out), 3);
        assert_approx(out[3], 100.0, DEFAULT_EPSILON);
        assert_approx(out[4], 100.0, DEFAULT_EPSILON);
    }

    #[test]
    fn rsi_flat_is_50() {
        let out = rsi(&vals(&[5.0; 6]), 3).unwrap();
        assert_approx(out[5], 50.0, DEFAULT_EPSILON);
    }

    #[test]
    fn rsi_wilder_smoothing() {
        // changes: +2, -1, +1, -2
        let close = vals(&[10.0, 12.0, 11.0, 12.0, 10.0]);
        let out = rsi(&close, 3).unwrap();
        // seed (idx 3): gain avg = 3/3 = 1, loss avg = 1/3
        let rs = 1.0 / (1.0 / 3.0);
        assert_approx(out[3], 100.0 - 100.0 / (1.0 + rs), 1e-9);
        // idx 4: gain = (0 + 2*1)/3, loss = (2 + 2/3)/3
        let g = 2.0 / 3.0;
        let l = (2.0 + 2.0 / 3.0) / 3.0;
        assert_approx(out[4], 100.0 - 100.0 / (1.0 + g / l), 1e-9);
    }

    #[test]
    fn macd_requires_fast_below_slow() {
        assert!(macd(&vals(&[1.0; 40]), 26, 12, 9).is_err());
    }

    #[test]
    fn macd_of_constant_is_zero() {
        let m = macd(&vals(&[7.0; 60]), 12, 26, 9).unwrap();
        assert_approx(m.dif[59], 0.0, 1e-12);
        assert_approx(m.dea[59], 0.0, 1e-12);
        assert_approx(m.histogram[59], 0.0, 1e-12);
        // DEA needs 26 + 9 - 1 valid closes
        assert_eq!(undefined_prefix(&m.dea), 33);
    }

    #[test]
    fn boll_bands_are_symmetric() {
        let b = boll(&vals(&[1.0, 2.0, 3.0]), 3, 2.0).unwrap();
        assert_approx(b.mid[2], 2.0, DEFAULT_EPSILON);
        assert_approx(b.upper[2], 4.0, DEFAULT_EPSILON);
        assert_approx(b.lower[2], 0.0, DEFAULT_EPSILON);
    }

    #[test]
    fn true_range_with_gap() {
        let high = vals(&[105.0, 108.0, 107.0]);
        let low = vals(&[95.0, 100.0, 98.0]);
        let close = vals(&[102.0, 106.0, 99.0]);
        let tr = true_range(&high, &low, &close).unwrap();
        assert_eq!(tr, vec![Some(10.0), Some(8.0), Some(9.0)]);
    }

    #[test]
    fn atr_seeds_with_mean_true_range() {
        let high = vals(&[105.0, 108.0, 107.0, 110.0]);
        let low = vals(&[95.0, 100.0, 98.0, 104.0]);
        let close = vals(&[102.0, 106.0, 99.0, 108.0]);
        let out = atr(&high, &low, &close, 3).unwrap();
        assert_approx(out[2], 9.0, DEFAULT_EPSILON);
        // TR[3] = max(6, 11, 5) = 11 → (11 + 2*9)/3
        assert_approx(out[3], 29.0 / 3.0, DEFAULT_EPSILON);
    }

    #[test]
    fn kdj_flat_range_is_neutral() {
        let px = vals(&[10.0; 8]);
        let k = kdj(&px, &px, &px, 3, 3, 3).unwrap();
        assert_approx(k.k[7], 50.0, DEFAULT_EPSILON);
        assert_approx(k.d[7], 50.0, DEFAULT_EPSILON);
        assert_approx(k.j[7], 50.0, DEFAULT_EPSILON);
    }

    #[test]
    fn kdj_close_at_high_pushes_k_up() {
        let high = vals(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0]);
        let low = vals(&[9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0]);
        let close = high.clone();
        let out = kdj(&high, &low, &close, 3, 3, 3).unwrap();
        let last = out.k[6].unwrap();
        assert!(last > 80.0, "K should approach 100 in a steady uptrend, got {last}");
    }
}
