//! Factor operator library.
//!
//! Pure transforms over [`Value`] series and [`Panel`]s, organised in layers:
//!
//! 1. `primitives` (L0): delay/diff, rolling sum/std/extrema, moving averages, regression
//! 2. `time_series` (L1): rolling ranks and arg-extrema, correlation, conditional counts
//! 3. `cross_section` (L2): rank, scale, zscore, percentile, winsorize, neutralize
//! 4. `technical` (L3): RSI, MACD, Bollinger, ATR, KDJ composed from L0/L1
//! 5. `expr`: a closed, serializable expression tree that composes the above
//!
//! Missing data never raises: undefined inputs produce undefined outputs. The
//! only errors are structural (non-positive windows, mismatched domains).
//! Every windowed operator needs `window` consecutive defined observations
//! ending at `t` before it defines `t`, and reads nothing after `t`.

pub mod cross_section;
pub mod expr;
pub mod primitives;
pub mod technical;
pub mod time_series;

pub use expr::{BinaryOp, FactorContext, FactorExpr, TechnicalIndicator, UnaryOp};

use crate::domain::{defined, PanelError, Value};
use thiserror::Error;

/// Structural misuse of an operator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OperatorError {
    #[error("{op}: window must be positive, got {window}")]
    NonPositiveWindow { op: &'static str, window: usize },

    #[error("{op}: invalid parameter: {reason}")]
    InvalidParameter { op: &'static str, reason: String },

    #[error("{op}: series lengths differ ({left} vs {right})")]
    LengthMismatch {
        op: &'static str,
        left: usize,
        right: usize,
    },

    #[error(transparent)]
    Panel(#[from] PanelError),

    #[error("industry_neutralize requires an industry map")]
    MissingGroups,
}

pub(crate) fn check_window(op: &'static str, window: usize) -> Result<(), OperatorError> {
    if window == 0 {
        return Err(OperatorError::NonPositiveWindow { op, window });
    }
    Ok(())
}

pub(crate) fn check_lengths(op: &'static str, a: &[Value], b: &[Value]) -> Result<(), OperatorError> {
    if a.len() != b.len() {
        return Err(OperatorError::LengthMismatch {
            op,
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(())
}

/// Evaluate `f` over every trailing window of `w` consecutive defined values.
pub(crate) fn rolling<F>(x: &[Value], w: usize, f: F) -> Vec<Value>
where
    F: Fn(&[f64]) -> f64,
{
    let mut out = vec![None; x.len()];
    let mut buf = Vec::with_capacity(w);
    let mut run = 0usize;
    for t in 0..x.len() {
        run = if x[t].is_some() { run + 1 } else { 0 };
        if run >= w {
            buf.clear();
            buf.extend(x[t + 1 - w..=t].iter().flatten());
            out[t] = defined(f(&buf));
        }
    }
    out
}

/// Two-series variant of [`rolling`]: both inputs must be defined across the window.
pub(crate) fn rolling2<F>(x: &[Value], y: &[Value], w: usize, f: F) -> Vec<Value>
where
    F: Fn(&[f64], &[f64]) -> f64,
{
    let n = x.len().min(y.len());
    let mut out = vec![None; n];
    let mut bx = Vec::with_capacity(w);
    let mut by = Vec::with_capacity(w);
    let mut run = 0usize;
    for t in 0..n {
        run = if x[t].is_some() && y[t].is_some() {
            run + 1
        } else {
            0
        };
        if run >= w {
            bx.clear();
            by.clear();
            bx.extend(x[t + 1 - w..=t].iter().flatten());
            by.extend(y[t + 1 - w..=t].iter().flatten());
            out[t] = defined(f(&bx, &by));
        }
    }
    out
}

/// Recursive smoother `y[t] = step(y[t-1], x[t])`, seeded by the mean of the
/// first `n` consecutive defined values. An undefined input resets the seed.
pub(crate) fn recursive<F>(x: &[Value], n: usize, step: F) -> Vec<Value>
where
    F: Fn(f64, f64) -> f64,
{
    let mut out = vec![None; x.len()];
    let mut prev: Option<f64> = None;
    let mut run = 0usize;
    for t in 0..x.len() {
        let Some(v) = x[t] else {
            prev = None;
            run = 0;
            continue;
        };
        run += 1;
        prev = match prev {
            Some(p) => defined(step(p, v)),
            None if run >= n => defined(mean(x[t + 1 - n..=t].iter().flatten().copied())),
            None => None,
        };
        out[t] = prev;
    }
    out
}

pub(crate) fn mean<I: IntoIterator<Item = f64>>(xs: I) -> f64 {
    let (sum, count) = xs
        .into_iter()
        .fold((0.0, 0usize), |(s, c), x| (s + x, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Sample variance (n-1). NaN for fewer than two observations.
pub(crate) fn sample_variance(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return f64::NAN;
    }
    let m = mean(xs.iter().copied());
    xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (xs.len() - 1) as f64
}

/// Average rank (1-based, ties averaged) of `x` among `xs`.
pub(crate) fn average_rank(xs: &[f64], x: f64) -> f64 {
    let below = xs.iter().filter(|&&v| v < x).count() as f64;
    let equal = xs.iter().filter(|&&v| v == x).count() as f64;
    below + (equal + 1.0) / 2.0
}
