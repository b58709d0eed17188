//! Stress testing: hypothetical P&L of shocking the current book.
//!
//! Scenarios are applied to a snapshot, never to the live portfolio, so running
//! them has no effect on the simulation.

use crate::domain::PortfolioSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-instrument factor loadings, e.g. `{"AAA": {"market": 1.1}}`.
pub type FactorLoadings = BTreeMap<String, BTreeMap<String, f64>>;

/// A set of price shocks, as fractional returns (`-0.2` is a 20% fall).
///
/// Shock resolution per instrument: an explicit instrument shock wins, then the
/// loading-weighted sum of factor shocks when loadings are known, then the
/// default shock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressScenario {
    pub name: String,
    #[serde(default)]
    pub instrument_shocks: BTreeMap<String, f64>,
    #[serde(default)]
    pub factor_shocks: BTreeMap<String, f64>,
    #[serde(default)]
    pub default_shock: f64,
}

impl StressScenario {
    pub fn uniform(name: impl Into<String>, shock: f64) -> Self {
        Self {
            name: name.into(),
            instrument_shocks: BTreeMap::new(),
            factor_shocks: BTreeMap::new(),
            default_shock: shock,
        }
    }

    pub fn market_crash() -> Self {
        Self::uniform("market_crash", -0.20)
    }

    pub fn flash_crash() -> Self {
        Self::uniform("flash_crash", -0.10)
    }

    pub fn rally() -> Self {
        Self::uniform("rally", 0.10)
    }

    /// Built-in scenario by name.
    pub fn named(name: &str) -> Option<Self> {
        match name {
            "market_crash" => Some(Self::market_crash()),
            "flash_crash" => Some(Self::flash_crash()),
            "rally" => Some(Self::rally()),
            _ => None,
        }
    }

    pub fn builtins() -> Vec<Self> {
        vec![Self::market_crash(), Self::flash_crash(), Self::rally()]
    }

    pub fn shock_for(&self, instrument: &str, loadings: Option<&FactorLoadings>) -> f64 {
        if let Some(&s) = self.instrument_shocks.get(instrument) {
            return s;
        }
        if !self.factor_shocks.is_empty() {
            if let Some(per_factor) = loadings.and_then(|l| l.get(instrument)) {
                return self
                    .factor_shocks
                    .iter()
                    .map(|(f, shock)| per_factor.get(f).copied().unwrap_or(0.0) * shock)
                    .sum();
            }
        }
        self.default_shock
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressResult {
    pub scenario: String,
    pub pnl: f64,
    /// P&L over snapshot equity; zero when equity is not positive.
    pub pnl_fraction: f64,
    pub per_instrument: BTreeMap<String, f64>,
}

pub fn run_stress(
    snapshot: &PortfolioSnapshot,
    scenario: &StressScenario,
    loadings: Option<&FactorLoadings>,
) -> StressResult {
    let per_instrument: BTreeMap<String, f64> = snapshot
        .positions
        .iter()
        .map(|p| {
            let shock = scenario.shock_for(&p.instrument, loadings);
            (p.instrument.clone(), p.market_value * shock)
        })
        .collect();
    let pnl: f64 = per_instrument.values().sum();
    StressResult {
        scenario: scenario.name.clone(),
        pnl,
        pnl_fraction: if snapshot.total_equity > 0.0 {
            pnl / snapshot.total_equity
        } else {
            0.0
        },
        per_instrument,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PositionMark;
    use chrono::{TimeZone, Utc};

    fn snapshot() -> PortfolioSnapshot {
        let mark = |instrument: &str, quantity: f64, price: f64| PositionMark {
            instrument: instrument.into(),
            quantity,
            average_cost: price,
            mark_price: price,
            market_value: quantity * price,
            unrealized_pnl: 0.0,
        };
        PortfolioSnapshot {
            tick: 3,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap(),
            cash: 5_000.0,
            positions: vec![mark("AAA", 100.0, 30.0), mark("BBB", -50.0, 40.0)],
            realized_pnl: 0.0,
            total_equity: 6_000.0,
        }
    }

    #[test]
    fn uniform_crash_hits_longs_helps_shorts() {
        let r = run_stress(&snapshot(), &StressScenario::market_crash(), None);
        assert!((r.per_instrument["AAA"] + 600.0).abs() < 1e-9);
        assert!((r.per_instrument["BBB"] - 400.0).abs() < 1e-9);
        assert!((r.pnl + 200.0).abs() < 1e-9);
        assert!((r.pnl_fraction + 200.0 / 6_000.0).abs() < 1e-12);
    }

    #[test]
    fn instrument_shock_overrides_default() {
        let mut s = StressScenario::uniform("custom", -0.05);
        s.instrument_shocks.insert("BBB".into(), 0.5);
        let r = run_stress(&snapshot(), &s, None);
        assert!((r.per_instrument["BBB"] + 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn factor_shocks_use_loadings() {
        let mut s = StressScenario::uniform("factor", 0.0);
        s.factor_shocks.insert("market".into(), -0.1);
        let mut loadings = FactorLoadings::new();
        loadings.insert("AAA".into(), BTreeMap::from([("market".to_string(), 2.0)]));
        let r = run_stress(&snapshot(), &s, Some(&loadings));
        assert!((r.per_instrument["AAA"] + 600.0).abs() < 1e-9);
        assert_eq!(r.per_instrument["BBB"], 0.0);
    }

    #[test]
    fn stress_does_not_touch_snapshot() {
        let snap = snapshot();
        let before = snap.clone();
        run_stress(&snap, &StressScenario::rally(), None);
        assert_eq!(snap, before);
        assert!(StressScenario::named("flash_crash").is_some());
        assert!(StressScenario::named("nope").is_none());
    }
}
