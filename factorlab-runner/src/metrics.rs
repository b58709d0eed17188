//! Performance metrics: pure functions over a run's equity curve and fills.
//!
//! Every metric is a pure function: equity curve and/or fill list in, scalar out.
//! Nothing here touches the engine, the data pipeline or the file system.

use factorlab_core::domain::Fill;
use factorlab_core::engine::BacktestOutcome;
use serde::{Deserialize, Serialize};

/// Trading periods per year for daily bars.
pub const DEFAULT_PERIODS_PER_YEAR: f64 = 252.0;

/// Fewest period returns for which tail statistics are reported.
pub const MIN_TAIL_OBSERVATIONS: usize = 20;

/// Aggregate performance metrics for a single run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub cagr: f64,
    /// Annualised standard deviation of period returns.
    pub volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub calmar: f64,
    /// Negative fraction, e.g. -0.15 for a 15% drawdown.
    pub max_drawdown: f64,
    /// Longest stretch of ticks spent below a prior peak.
    pub max_drawdown_duration: usize,
    /// Mean of the worst 5% of period returns (negative for losses).
    pub cvar_95: Option<f64>,
    pub skewness: Option<f64>,
    pub fill_count: usize,
    pub total_commission: f64,
    pub total_slippage: f64,
    /// Annual traded notional over initial cash.
    pub turnover: f64,
    pub tick_count: usize,
}

impl PerformanceMetrics {
    /// Compute all metrics for a finished run. The curve starts at the
    /// initial cash so that the first tick's P&L counts as a return.
    pub fn compute(outcome: &BacktestOutcome, initial_cash: f64, periods_per_year: f64) -> Self {
        let curve = equity_curve(initial_cash, outcome);
        Self::from_curve(&curve, &outcome.fills, initial_cash, periods_per_year)
    }

    pub fn from_curve(curve: &[f64], fills: &[Fill], initial_cash: f64, periods_per_year: f64) -> Self {
        let returns = period_returns(curve);
        let periods = returns.len();
        Self {
            total_return: total_return(curve),
            cagr: cagr(curve, periods_per_year),
            volatility: volatility(&returns, periods_per_year),
            sharpe: sharpe_ratio(&returns, periods_per_year),
            sortino: sortino_ratio(&returns, periods_per_year),
            calmar: calmar_ratio(curve, periods_per_year),
            max_drawdown: max_drawdown(curve),
            max_drawdown_duration: max_drawdown_duration(curve),
            cvar_95: cvar(&returns, 0.95),
            skewness: skewness(&returns),
            fill_count: fills.len(),
            total_commission: fills.iter().map(|f| f.commission).sum(),
            total_slippage: fills.iter().map(|f| f.slippage).sum(),
            turnover: turnover(fills, initial_cash, periods, periods_per_year),
            tick_count: periods,
        }
    }
}

/// Initial cash followed by each snapshot's total equity.
pub fn equity_curve(initial_cash: f64, outcome: &BacktestOutcome) -> Vec<f64> {
    std::iter::once(initial_cash)
        .chain(outcome.snapshots.iter().map(|s| s.total_equity))
        .collect()
}

// ─── Individual metric functions ────────────────────────────────────

/// Total return as a fraction: (final - initial) / initial.
pub fn total_return(curve: &[f64]) -> f64 {
    match (curve.first(), curve.last()) {
        (Some(&first), Some(&last)) if curve.len() >= 2 && first > 0.0 => (last - first) / first,
        _ => 0.0,
    }
}

/// Compound annual growth rate. 0.0 for fewer than two points or a wiped-out account.
pub fn cagr(curve: &[f64], periods_per_year: f64) -> f64 {
    let (Some(&first), Some(&last)) = (curve.first(), curve.last()) else {
        return 0.0;
    };
    if curve.len() < 2 || first <= 0.0 || last <= 0.0 || periods_per_year <= 0.0 {
        return 0.0;
    }
    let years = (curve.len() - 1) as f64 / periods_per_year;
    (last / first).powf(1.0 / years) - 1.0
}

pub fn volatility(returns: &[f64], periods_per_year: f64) -> f64 {
    std_dev(returns) * periods_per_year.sqrt()
}

/// Annualised Sharpe ratio with a zero risk-free rate. 0.0 when variance vanishes.
pub fn sharpe_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let std = std_dev(returns);
    if std < 1e-15 {
        return 0.0;
    }
    mean_f64(returns) / std * periods_per_year.sqrt()
}

/// Annualised Sortino ratio (downside deviation over all periods).
pub fn sortino_ratio(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let downside: f64 = returns.iter().filter(|&&r| r < 0.0).map(|r| r * r).sum();
    if downside == 0.0 {
        return 0.0;
    }
    let downside_std = (downside / returns.len() as f64).sqrt();
    if downside_std < 1e-15 {
        return 0.0;
    }
    mean_f64(returns) / downside_std * periods_per_year.sqrt()
}

/// CAGR / |max drawdown|. 0.0 without a drawdown or with non-positive growth.
pub fn calmar_ratio(curve: &[f64], periods_per_year: f64) -> f64 {
    let c = cagr(curve, periods_per_year);
    let dd = max_drawdown(curve);
    if dd >= 0.0 || c <= 0.0 {
        return 0.0;
    }
    c / dd.abs()
}

/// Drawdown from the running peak at every point (0.0 at a new high).
pub fn drawdown_series(curve: &[f64]) -> Vec<f64> {
    let mut peak = f64::NEG_INFINITY;
    curve
        .iter()
        .map(|&eq| {
            peak = peak.max(eq);
            if peak > 0.0 {
                (eq - peak) / peak
            } else {
                0.0
            }
        })
        .collect()
}

/// Deepest drawdown as a negative fraction.
pub fn max_drawdown(curve: &[f64]) -> f64 {
    drawdown_series(curve).into_iter().fold(0.0, f64::min)
}

/// Longest run of consecutive points below the running peak.
pub fn max_drawdown_duration(curve: &[f64]) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for dd in drawdown_series(curve) {
        if dd < 0.0 {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Historical CVaR: mean of the worst `1 - confidence` share of returns.
pub fn cvar(returns: &[f64], confidence: f64) -> Option<f64> {
    if returns.len() < MIN_TAIL_OBSERVATIONS {
        return None;
    }
    let mut sorted = returns.to_vec();
    sorted.sort_by(f64::total_cmp);
    let tail = sorted.len() as f64 * (1.0 - confidence);
    let cutoff = ((tail - 1e-9).ceil() as usize).max(1);
    Some(mean_f64(&sorted[..cutoff]))
}

/// Third standardised moment (population form).
pub fn skewness(returns: &[f64]) -> Option<f64> {
    if returns.len() < MIN_TAIL_OBSERVATIONS {
        return None;
    }
    let mean = mean_f64(returns);
    let std = std_dev(returns);
    if std < 1e-15 {
        return Some(0.0);
    }
    let n = returns.len() as f64;
    Some(returns.iter().map(|r| ((r - mean) / std).powi(3)).sum::<f64>() / n)
}

/// Annual traded notional over initial cash.
pub fn turnover(fills: &[Fill], initial_cash: f64, periods: usize, periods_per_year: f64) -> f64 {
    if fills.is_empty() || initial_cash <= 0.0 || periods == 0 || periods_per_year <= 0.0 {
        return 0.0;
    }
    let notional: f64 = fills.iter().map(Fill::notional).sum();
    let years = periods as f64 / periods_per_year;
    notional / initial_cash / years
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Simple returns between consecutive points; 0.0 after a non-positive point.
pub fn period_returns(curve: &[f64]) -> Vec<f64> {
    curve
        .windows(2)
        .map(|w| if w[0] > 0.0 { (w[1] - w[0]) / w[0] } else { 0.0 })
        .collect()
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use factorlab_core::domain::{OrderId, OrderSide};

    fn fill(price: f64, quantity: f64, commission: f64) -> Fill {
        Fill {
            order_id: OrderId(1),
            parent_id: None,
            instrument: "AAA".into(),
            side: OrderSide::Buy,
            price,
            quantity,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            tick: 0,
            commission,
            slippage: 0.5,
        }
    }

    // ── Returns ──

    #[test]
    fn total_return_basic() {
        assert!((total_return(&[100_000.0, 95_000.0, 110_000.0]) - 0.1).abs() < 1e-12);
        assert_eq!(total_return(&[100_000.0]), 0.0);
        assert_eq!(total_return(&[]), 0.0);
    }

    #[test]
    fn cagr_one_year() {
        let mut eq = vec![100_000.0];
        for i in 1..=252 {
            eq.push(eq[i - 1] * 1.1_f64.powf(1.0 / 252.0));
        }
        assert!((cagr(&eq, 252.0) - 0.1).abs() < 1e-9);
        assert_eq!(cagr(&[100.0, 0.0], 252.0), 0.0);
    }

    #[test]
    fn sharpe_zero_for_flat_curve() {
        let r = period_returns(&[100.0; 50]);
        assert_eq!(sharpe_ratio(&r, 252.0), 0.0);
        assert_eq!(volatility(&r, 252.0), 0.0);
    }

    #[test]
    fn sortino_needs_downside() {
        let up: Vec<f64> = (0..10).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
        assert_eq!(sortino_ratio(&period_returns(&up), 252.0), 0.0);
        let mixed = [100.0, 102.0, 101.0, 104.0, 103.0, 106.0];
        assert!(sortino_ratio(&period_returns(&mixed), 252.0) > 0.0);
    }

    // ── Drawdown ──

    #[test]
    fn drawdown_depth_and_duration() {
        let eq = [100.0, 120.0, 90.0, 100.0, 130.0, 125.0];
        let dd = drawdown_series(&eq);
        assert_eq!(dd[0], 0.0);
        assert!((dd[2] + 0.25).abs() < 1e-12);
        assert!((max_drawdown(&eq) + 0.25).abs() < 1e-12);
        assert_eq!(max_drawdown_duration(&eq), 2);
        assert_eq!(max_drawdown_duration(&[1.0, 2.0, 3.0]), 0);
    }

    #[test]
    fn calmar_uses_drawdown_magnitude() {
        let eq = [100.0, 120.0, 90.0, 130.0];
        let expected = cagr(&eq, 3.0) / 0.25;
        assert!((calmar_ratio(&eq, 3.0) - expected).abs() < 1e-12);
    }

    // ── Tails ──

    #[test]
    fn tail_metrics_need_observations() {
        assert_eq!(cvar(&[0.01; 5], 0.95), None);
        assert_eq!(skewness(&[0.01; 5]), None);

        let mut r = vec![0.01; 39];
        r.push(-0.2);
        // worst 5% of 40 is two observations
        assert!((cvar(&r, 0.95).unwrap() - (-0.095)).abs() < 1e-12);
        assert!(skewness(&r).unwrap() < 0.0);
    }

    // ── Fills ──

    #[test]
    fn fill_totals_and_turnover() {
        let fills = vec![fill(100.0, 10.0, 1.0), fill(50.0, 20.0, 2.0)];
        let curve = vec![10_000.0; 253];
        let m = PerformanceMetrics::from_curve(&curve, &fills, 10_000.0, 252.0);
        assert_eq!(m.fill_count, 2);
        assert!((m.total_commission - 3.0).abs() < 1e-12);
        assert!((m.total_slippage - 1.0).abs() < 1e-12);
        // 2000 notional over one year of 10k
        assert!((m.turnover - 0.2).abs() < 1e-12);
        assert_eq!(m.tick_count, 252);
    }

    // ── Laws ──

    proptest::proptest! {
        #[test]
        fn drawdowns_stay_in_range(curve in proptest::collection::vec(1.0..1e6_f64, 1..200)) {
            let dd = drawdown_series(&curve);
            proptest::prop_assert_eq!(dd.len(), curve.len());
            proptest::prop_assert!(dd.iter().all(|&d| (-1.0..=0.0).contains(&d)));
            proptest::prop_assert_eq!(dd[0], 0.0);
            let worst = max_drawdown(&curve);
            proptest::prop_assert!(dd.iter().all(|&d| d >= worst));
            proptest::prop_assert!(max_drawdown_duration(&curve) < curve.len());
        }

        #[test]
        fn returns_compound_to_total(curve in proptest::collection::vec(1.0..1e6_f64, 2..100)) {
            let compounded = period_returns(&curve).iter().fold(1.0, |acc, r| acc * (1.0 + r));
            let total = total_return(&curve);
            proptest::prop_assert!((compounded - 1.0 - total).abs() <= 1e-6 * (1.0 + total.abs()));
        }
    }
}
