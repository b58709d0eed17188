//! Strategy interface and the built-in strategies.
//!
//! A strategy sees history strictly before the current tick plus the account
//! state after the previous tick. It returns order intents; the engine owns
//! turning them into orders.

use crate::algo::AlgoSpec;
use crate::domain::{OrderSide, OrderType, PanelSet, Timestamp, TimeInForce};
use crate::ops::{FactorContext, FactorExpr};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Intents below this size are dropped.
const MIN_INTENT_QTY: f64 = 1e-9;

/// What the strategy may look at on one tick.
#[derive(Debug, Clone, Copy)]
pub struct StrategyContext<'a> {
    pub tick: usize,
    pub timestamp: Timestamp,
    /// Bars strictly before `timestamp`.
    pub history: &'a PanelSet,
    /// Signed position quantity per instrument.
    pub positions: &'a BTreeMap<String, f64>,
    /// Signed unfilled quantity of active orders per instrument, algo parents included.
    pub pending: &'a BTreeMap<String, f64>,
    pub cash: f64,
    pub equity: f64,
    /// True while the circuit breaker blocks new orders.
    pub breaker_engaged: bool,
}

impl StrategyContext<'_> {
    pub fn position(&self, instrument: &str) -> f64 {
        self.positions.get(instrument).copied().unwrap_or(0.0)
    }

    /// Position plus what is already working in the market.
    pub fn committed(&self, instrument: &str) -> f64 {
        self.position(instrument) + self.pending.get(instrument).copied().unwrap_or(0.0)
    }
}

/// A request to trade, before it becomes an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub order_type: OrderType,
    /// Falls back to the broker's default when absent.
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
}

impl OrderIntent {
    pub fn market(instrument: impl Into<String>, side: OrderSide, quantity: f64) -> Self {
        Self {
            instrument: instrument.into(),
            side,
            quantity,
            order_type: OrderType::Market,
            time_in_force: None,
        }
    }

    pub fn limit(instrument: impl Into<String>, side: OrderSide, quantity: f64, limit_price: f64) -> Self {
        Self {
            order_type: OrderType::Limit { limit_price },
            ..Self::market(instrument, side, quantity)
        }
    }

    pub fn algo(instrument: impl Into<String>, side: OrderSide, quantity: f64, spec: AlgoSpec) -> Self {
        Self {
            order_type: OrderType::Algo { spec },
            ..Self::market(instrument, side, quantity)
        }
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = Some(tif);
        self
    }

    /// Intent that moves `current` to `target`, if any.
    fn rebalance(instrument: &str, current: f64, target: f64, algo: Option<&AlgoSpec>) -> Option<Self> {
        let delta = target - current;
        if delta.abs() < MIN_INTENT_QTY {
            return None;
        }
        let side = if delta > 0.0 { OrderSide::Buy } else { OrderSide::Sell };
        Some(match algo {
            Some(spec) => Self::algo(instrument, side, delta.abs(), spec.clone()),
            None => Self::market(instrument, side, delta.abs()),
        })
    }
}

/// Trait for strategies. Called once per tick, in tick order.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn on_tick(&mut self, ctx: &StrategyContext<'_>) -> Vec<OrderIntent>;
}

/// Emits the same intents on every tick.
#[derive(Debug, Clone)]
pub struct ConstantStrategy {
    intents: Vec<OrderIntent>,
}

impl ConstantStrategy {
    pub fn new(intents: Vec<OrderIntent>) -> Self {
        Self { intents }
    }
}

impl Strategy for ConstantStrategy {
    fn name(&self) -> &str {
        "constant"
    }

    fn on_tick(&mut self, _ctx: &StrategyContext<'_>) -> Vec<OrderIntent> {
        self.intents.clone()
    }
}

/// Cross-sectional factor strategy.
///
/// Ranks instruments by the latest value of `expr` evaluated over history, holds
/// the top `top_k` long and the bottom `bottom_k` short, equal-weighted to
/// `gross_exposure` of equity. Instruments dropped from the selection are closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorRankStrategy {
    pub expr: FactorExpr,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub bottom_k: usize,
    #[serde(default = "default_gross_exposure")]
    pub gross_exposure: f64,
    #[serde(default = "default_rebalance_every")]
    pub rebalance_every: usize,
    /// Work rebalance trades through an execution algorithm instead of market orders.
    #[serde(default)]
    pub algo: Option<AlgoSpec>,
    /// instrument → industry, for neutralizing operators.
    #[serde(default)]
    pub groups: Option<BTreeMap<String, String>>,
    /// History rows required before the first rebalance.
    #[serde(default = "default_min_history")]
    pub min_history: usize,
}

fn default_top_k() -> usize {
    5
}

fn default_gross_exposure() -> f64 {
    1.0
}

fn default_rebalance_every() -> usize {
    1
}

fn default_min_history() -> usize {
    1
}

impl FactorRankStrategy {
    pub fn new(expr: FactorExpr, top_k: usize) -> Self {
        Self {
            expr,
            top_k,
            bottom_k: 0,
            gross_exposure: default_gross_exposure(),
            rebalance_every: default_rebalance_every(),
            algo: None,
            groups: None,
            min_history: default_min_history(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.top_k + self.bottom_k == 0 {
            return Err("top_k + bottom_k must be positive".into());
        }
        if self.rebalance_every == 0 {
            return Err("rebalance_every must be positive".into());
        }
        if !(self.gross_exposure.is_finite() && self.gross_exposure > 0.0) {
            return Err(format!("gross_exposure must be positive, got {}", self.gross_exposure));
        }
        if let Some(spec) = &self.algo {
            spec.validate().map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    /// Latest defined factor value per instrument, best first. Ties go to the
    /// lexically smaller name.
    fn ranked(&self, history: &PanelSet) -> Option<Vec<(String, f64)>> {
        let mut ctx = FactorContext::new(history);
        if let Some(groups) = &self.groups {
            ctx = ctx.with_groups(groups);
        }
        let panel = match self.expr.evaluate(&ctx) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "factor evaluation failed, skipping rebalance");
                return None;
            }
        };
        if panel.is_empty() {
            return None;
        }
        let mut scored: Vec<(String, f64)> = panel
            .instruments()
            .iter()
            .zip(panel.last_row())
            .filter_map(|(name, v)| v.map(|x| (name.clone(), x)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Some(scored)
    }

    /// Signed target quantity per selected instrument.
    fn targets(&self, ctx: &StrategyContext<'_>, ranked: &[(String, f64)]) -> BTreeMap<String, f64> {
        let longs = ranked.iter().take(self.top_k);
        let shorts = ranked
            .iter()
            .skip(self.top_k)
            .rev()
            .take(self.bottom_k);
        let selected: Vec<(&str, f64)> = longs
            .map(|(n, _)| (n.as_str(), 1.0))
            .chain(shorts.map(|(n, _)| (n.as_str(), -1.0)))
            .collect();
        if selected.is_empty() {
            return BTreeMap::new();
        }
        let per_name = self.gross_exposure * ctx.equity / selected.len() as f64;
        selected
            .into_iter()
            .filter_map(|(name, sign)| {
                let price = ctx.history.last_value("close", name).filter(|p| *p > 0.0)?;
                Some((name.to_string(), sign * (per_name / price).floor()))
            })
            .collect()
    }
}

impl Strategy for FactorRankStrategy {
    fn name(&self) -> &str {
        "factor_rank"
    }

    fn on_tick(&mut self, ctx: &StrategyContext<'_>) -> Vec<OrderIntent> {
        if ctx.tick % self.rebalance_every.max(1) != 0
            || ctx.history.len() < self.min_history
            || ctx.equity <= 0.0
        {
            return Vec::new();
        }
        let Some(ranked) = self.ranked(ctx.history) else {
            return Vec::new();
        };
        let targets = self.targets(ctx, &ranked);

        let intents: Vec<OrderIntent> = ctx
            .history
            .instruments()
            .iter()
            .filter_map(|name| {
                let target = targets.get(name).copied().unwrap_or(0.0);
                OrderIntent::rebalance(name, ctx.committed(name), target, self.algo.as_ref())
            })
            .collect();
        debug!(tick = ctx.tick, selected = targets.len(), intents = intents.len(), "rebalance");
        intents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bar;
    use crate::ops::UnaryOp;
    use chrono::{Duration, TimeZone, Utc};

    fn history(closes: &[(&str, &[f64])]) -> PanelSet {
        let instruments: Vec<String> = closes.iter().map(|(n, _)| n.to_string()).collect();
        let mut set = PanelSet::new(instruments);
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let len = closes[0].1.len();
        for t in 0..len {
            let ts = start + Duration::days(t as i64);
            let bars: BTreeMap<String, Bar> = closes
                .iter()
                .map(|(n, xs)| (n.to_string(), Bar::new(ts, *n, xs[t], xs[t], xs[t], xs[t], 1_000.0)))
                .collect();
            set.push_bars(ts, &bars).unwrap();
        }
        set
    }

    fn ctx<'a>(
        history: &'a PanelSet,
        positions: &'a BTreeMap<String, f64>,
        pending: &'a BTreeMap<String, f64>,
    ) -> StrategyContext<'a> {
        StrategyContext {
            tick: history.len(),
            timestamp: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            history,
            positions,
            pending,
            cash: 10_000.0,
            equity: 10_000.0,
            breaker_engaged: false,
        }
    }

    #[test]
    fn constant_strategy_repeats() {
        let mut s = ConstantStrategy::new(vec![OrderIntent::market("A", OrderSide::Buy, 100.0)]);
        let h = history(&[("A", &[10.0])]);
        let empty = BTreeMap::new();
        let c = ctx(&h, &empty, &empty);
        assert_eq!(s.on_tick(&c).len(), 1);
        assert_eq!(s.on_tick(&c), s.on_tick(&c));
    }

    #[test]
    fn momentum_buys_top_name() {
        let h = history(&[("A", &[10.0, 11.0, 12.0]), ("B", &[10.0, 9.0, 8.0]), ("C", &[10.0, 10.0, 10.0])]);
        let mut s = FactorRankStrategy::new(FactorExpr::field("close").then(UnaryOp::Returns { n: 2 }), 1);
        let empty = BTreeMap::new();
        let intents = s.on_tick(&ctx(&h, &empty, &empty));
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].instrument, "A");
        assert_eq!(intents[0].side, OrderSide::Buy);
        // 10_000 / 12 = 833.33 → 833 shares
        assert_eq!(intents[0].quantity, 833.0);
    }

    #[test]
    fn long_short_and_closing() {
        let h = history(&[("A", &[10.0, 12.0]), ("B", &[10.0, 8.0]), ("C", &[10.0, 10.0])]);
        let mut s = FactorRankStrategy::new(FactorExpr::field("close").then(UnaryOp::Returns { n: 1 }), 1);
        s.bottom_k = 1;
        let positions = BTreeMap::from([("C".to_string(), 50.0)]);
        let empty = BTreeMap::new();
        let intents = s.on_tick(&ctx(&h, &positions, &empty));
        let by_name: BTreeMap<&str, &OrderIntent> = intents.iter().map(|i| (i.instrument.as_str(), i)).collect();
        assert_eq!(by_name["A"].side, OrderSide::Buy);
        assert_eq!(by_name["A"].quantity, (5_000.0f64 / 12.0).floor());
        assert_eq!(by_name["B"].side, OrderSide::Sell);
        assert_eq!(by_name["B"].quantity, 625.0);
        assert_eq!(by_name["C"].side, OrderSide::Sell);
        assert_eq!(by_name["C"].quantity, 50.0);
    }

    #[test]
    fn pending_orders_count_toward_target() {
        let h = history(&[("A", &[10.0, 12.0]), ("B", &[10.0, 8.0])]);
        let mut s = FactorRankStrategy::new(FactorExpr::field("close"), 1);
        let empty = BTreeMap::new();
        let pending = BTreeMap::from([("A".to_string(), 833.0)]);
        assert!(s.on_tick(&ctx(&h, &empty, &pending)).is_empty());
    }

    #[test]
    fn ties_break_by_name() {
        let h = history(&[("B", &[10.0]), ("A", &[10.0])]);
        let mut s = FactorRankStrategy::new(FactorExpr::constant(1.0), 1);
        let empty = BTreeMap::new();
        let intents = s.on_tick(&ctx(&h, &empty, &empty));
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].instrument, "A");
    }

    #[test]
    fn waits_for_history_and_rebalance_tick() {
        let h = history(&[("A", &[10.0, 11.0])]);
        let mut s = FactorRankStrategy::new(FactorExpr::field("close"), 1);
        s.min_history = 5;
        let empty = BTreeMap::new();
        assert!(s.on_tick(&ctx(&h, &empty, &empty)).is_empty());
        s.min_history = 1;
        s.rebalance_every = 3;
        // tick 2 is not a multiple of 3
        assert!(s.on_tick(&ctx(&h, &empty, &empty)).is_empty());
    }

    #[test]
    fn unknown_field_yields_no_intents() {
        let h = history(&[("A", &[10.0])]);
        let mut s = FactorRankStrategy::new(FactorExpr::field("book_to_price"), 1);
        let empty = BTreeMap::new();
        assert!(s.on_tick(&ctx(&h, &empty, &empty)).is_empty());
    }

    #[test]
    fn algo_intents_carry_spec() {
        let h = history(&[("A", &[10.0])]);
        let mut s = FactorRankStrategy::new(FactorExpr::field("close"), 1);
        s.algo = Some(AlgoSpec::Twap { horizon: 4 });
        let empty = BTreeMap::new();
        let intents = s.on_tick(&ctx(&h, &empty, &empty));
        assert!(matches!(intents[0].order_type, OrderType::Algo { .. }));
    }

    #[test]
    fn validate_rejects_empty_selection() {
        let mut s = FactorRankStrategy::new(FactorExpr::field("close"), 0);
        assert!(s.validate().is_err());
        s.top_k = 2;
        s.rebalance_every = 0;
        assert!(s.validate().is_err());
    }
}
