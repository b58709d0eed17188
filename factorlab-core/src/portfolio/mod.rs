//! Portfolio: cash, positions and realised P&L, driven only by fills.
//!
//! State changes come from `apply_fill` and nothing else, so replaying the fill
//! log from the starting cash reproduces the portfolio exactly. Unrealised P&L is
//! never stored: snapshots recompute it from marks. The accounting identity
//! `total_equity == cash + Σ market_value` holds for every snapshot.

use crate::domain::{Fill, PortfolioSnapshot, Position, PositionMark, Timestamp};
use std::collections::BTreeMap;
use thiserror::Error;

const FLAT_EPSILON: f64 = 1e-9;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PortfolioError {
    #[error("fill for order {order_id} has invalid price {price}")]
    InvalidPrice { order_id: String, price: f64 },

    #[error("fill for order {order_id} has invalid quantity {quantity}")]
    InvalidQuantity { order_id: String, quantity: f64 },

    #[error("fill for order {order_id} has invalid commission {commission}")]
    InvalidCommission { order_id: String, commission: f64 },

    #[error("initial cash must be finite, got {0}")]
    InvalidCash(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    initial_cash: f64,
    cash: f64,
    positions: BTreeMap<String, Position>,
    realized_pnl: f64,
    total_commission: f64,
    total_slippage: f64,
    traded_notional: f64,
    fill_count: usize,
    last_marks: BTreeMap<String, f64>,
}

impl Portfolio {
    pub fn new(initial_cash: f64) -> Result<Self, PortfolioError> {
        if !initial_cash.is_finite() {
            return Err(PortfolioError::InvalidCash(initial_cash));
        }
        Ok(Self {
            initial_cash,
            cash: initial_cash,
            positions: BTreeMap::new(),
            realized_pnl: 0.0,
            total_commission: 0.0,
            total_slippage: 0.0,
            traded_notional: 0.0,
            fill_count: 0,
            last_marks: BTreeMap::new(),
        })
    }

    /// Rebuild a portfolio from its fill log.
    pub fn replay<'a, I>(initial_cash: f64, fills: I) -> Result<Self, PortfolioError>
    where
        I: IntoIterator<Item = &'a Fill>,
    {
        let mut portfolio = Self::new(initial_cash)?;
        for fill in fills {
            portfolio.apply_fill(fill)?;
        }
        Ok(portfolio)
    }

    // ── Accessors ──────────────────────────────────────────────────────

    pub fn initial_cash(&self) -> f64 {
        self.initial_cash
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn total_commission(&self) -> f64 {
        self.total_commission
    }

    pub fn total_slippage(&self) -> f64 {
        self.total_slippage
    }

    pub fn traded_notional(&self) -> f64 {
        self.traded_notional
    }

    pub fn fill_count(&self) -> usize {
        self.fill_count
    }

    /// Open (non-flat) position for an instrument.
    pub fn position(&self, instrument: &str) -> Option<&Position> {
        self.positions.get(instrument)
    }

    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Signed quantity, zero when flat.
    pub fn quantity(&self, instrument: &str) -> f64 {
        self.positions.get(instrument).map_or(0.0, |p| p.quantity)
    }

    // ── Mutation ───────────────────────────────────────────────────────

    /// Checks a fill must pass before it can be booked.
    pub fn validate_fill(fill: &Fill) -> Result<(), PortfolioError> {
        if !(fill.price.is_finite() && fill.price > 0.0) {
            return Err(PortfolioError::InvalidPrice {
                order_id: fill.order_id.to_string(),
                price: fill.price,
            });
        }
        if !(fill.quantity.is_finite() && fill.quantity > 0.0) {
            return Err(PortfolioError::InvalidQuantity {
                order_id: fill.order_id.to_string(),
                quantity: fill.quantity,
            });
        }
        if !(fill.commission.is_finite() && fill.commission >= 0.0) {
            return Err(PortfolioError::InvalidCommission {
                order_id: fill.order_id.to_string(),
                commission: fill.commission,
            });
        }
        Ok(())
    }

    /// Apply one fill. Validates before touching any state.
    pub fn apply_fill(&mut self, fill: &Fill) -> Result<(), PortfolioError> {
        Self::validate_fill(fill)?;

        let delta = fill.signed_quantity();
        let position = self
            .positions
            .entry(fill.instrument.clone())
            .or_insert_with(|| Position::flat(fill.instrument.clone()));
        let held = position.quantity;

        if held == 0.0 || held.signum() == delta.signum() {
            // opening or adding
            let new_qty = held + delta;
            position.average_cost =
                (held.abs() * position.average_cost + delta.abs() * fill.price) / new_qty.abs();
            position.quantity = new_qty;
        } else {
            // reducing, closing or flipping
            let closed = delta.abs().min(held.abs());
            self.realized_pnl += closed * (fill.price - position.average_cost) * held.signum();
            let new_qty = held + delta;
            if new_qty.abs() < FLAT_EPSILON {
                position.quantity = 0.0;
                position.average_cost = 0.0;
            } else if new_qty.signum() != held.signum() {
                position.quantity = new_qty;
                position.average_cost = fill.price;
            } else {
                position.quantity = new_qty;
            }
        }

        if position.is_flat() {
            self.positions.remove(&fill.instrument);
        }
        self.cash += fill.cash_delta();
        self.total_commission += fill.commission;
        self.total_slippage += fill.slippage;
        self.traded_notional += fill.notional();
        self.fill_count += 1;
        self.last_marks.insert(fill.instrument.clone(), fill.price);
        Ok(())
    }

    /// Update mark prices. Non-finite or non-positive marks are ignored.
    pub fn mark(&mut self, prices: &BTreeMap<String, f64>) {
        for (instrument, &price) in prices {
            if price.is_finite() && price > 0.0 {
                self.last_marks.insert(instrument.clone(), price);
            }
        }
    }

    /// Mark for an instrument: last known mark, else average cost.
    pub fn mark_price(&self, instrument: &str) -> Option<f64> {
        self.last_marks
            .get(instrument)
            .copied()
            .or_else(|| self.positions.get(instrument).map(|p| p.average_cost))
    }

    /// Equity at the current marks.
    pub fn equity(&self) -> f64 {
        self.cash + self.marks().iter().map(|m| m.market_value).sum::<f64>()
    }

    /// Mark to `prices`, then capture an immutable snapshot.
    pub fn snapshot(
        &mut self,
        tick: usize,
        timestamp: Timestamp,
        prices: &BTreeMap<String, f64>,
    ) -> PortfolioSnapshot {
        self.mark(prices);
        let positions = self.marks();
        let total_equity = self.cash + positions.iter().map(|p| p.market_value).sum::<f64>();
        PortfolioSnapshot {
            tick,
            timestamp,
            cash: self.cash,
            positions,
            realized_pnl: self.realized_pnl,
            total_equity,
        }
    }

    fn marks(&self) -> Vec<PositionMark> {
        self.positions
            .values()
            .map(|p| {
                let mark_price = self.mark_price(&p.instrument).unwrap_or(p.average_cost);
                PositionMark {
                    instrument: p.instrument.clone(),
                    quantity: p.quantity,
                    average_cost: p.average_cost,
                    mark_price,
                    market_value: p.market_value(mark_price),
                    unrealized_pnl: p.unrealized_pnl(mark_price),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderId, OrderSide};
    use chrono::{TimeZone, Utc};

    fn fill(side: OrderSide, qty: f64, price: f64, commission: f64) -> Fill {
        Fill {
            order_id: OrderId(1),
            parent_id: None,
            instrument: "AAA".into(),
            side,
            price,
            quantity: qty,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            tick: 0,
            commission,
            slippage: 0.0,
        }
    }

    #[test]
    fn buys_average_into_cost() {
        let mut p = Portfolio::new(10_000.0).unwrap();
        p.apply_fill(&fill(OrderSide::Buy, 100.0, 10.0, 0.0)).unwrap();
        p.apply_fill(&fill(OrderSide::Buy, 100.0, 12.0, 0.0)).unwrap();
        let pos = p.position("AAA").unwrap();
        assert_eq!(pos.quantity, 200.0);
        assert!((pos.average_cost - 11.0).abs() < 1e-12);
        assert!((p.cash() - 7_800.0).abs() < 1e-9);
    }

    #[test]
    fn partial_close_realises_pnl_keeps_cost() {
        let mut p = Portfolio::new(10_000.0).unwrap();
        p.apply_fill(&fill(OrderSide::Buy, 100.0, 10.0, 0.0)).unwrap();
        p.apply_fill(&fill(OrderSide::Sell, 40.0, 15.0, 1.0)).unwrap();
        let pos = p.position("AAA").unwrap();
        assert_eq!(pos.quantity, 60.0);
        assert_eq!(pos.average_cost, 10.0);
        assert!((p.realized_pnl() - 200.0).abs() < 1e-12);
        // 10_000 - 1_000 + 600 - 1
        assert!((p.cash() - 9_599.0).abs() < 1e-9);
    }

    #[test]
    fn flip_through_zero_opens_at_fill_price() {
        let mut p = Portfolio::new(0.0).unwrap();
        p.apply_fill(&fill(OrderSide::Buy, 10.0, 10.0, 0.0)).unwrap();
        p.apply_fill(&fill(OrderSide::Sell, 25.0, 8.0, 0.0)).unwrap();
        let pos = p.position("AAA").unwrap();
        assert_eq!(pos.quantity, -15.0);
        assert_eq!(pos.average_cost, 8.0);
        assert!((p.realized_pnl() + 20.0).abs() < 1e-12);
    }

    #[test]
    fn closing_removes_position() {
        let mut p = Portfolio::new(0.0).unwrap();
        p.apply_fill(&fill(OrderSide::Sell, 10.0, 10.0, 0.0)).unwrap();
        p.apply_fill(&fill(OrderSide::Buy, 10.0, 9.0, 0.0)).unwrap();
        assert!(p.position("AAA").is_none());
        assert!((p.realized_pnl() - 10.0).abs() < 1e-12);
    }

    #[test]
    fn invalid_fill_leaves_state_untouched() {
        let mut p = Portfolio::new(1_000.0).unwrap();
        let before = p.clone();
        assert!(p.apply_fill(&fill(OrderSide::Buy, 10.0, f64::NAN, 0.0)).is_err());
        assert!(p.apply_fill(&fill(OrderSide::Buy, 0.0, 10.0, 0.0)).is_err());
        assert!(p.apply_fill(&fill(OrderSide::Buy, 1.0, 10.0, -1.0)).is_err());
        assert_eq!(p, before);
    }

    #[test]
    fn replay_reproduces_state() {
        let fills = vec![
            fill(OrderSide::Buy, 100.0, 10.0, 1.0),
            fill(OrderSide::Sell, 30.0, 11.0, 1.0),
            fill(OrderSide::Sell, 100.0, 9.0, 1.0),
        ];
        let mut live = Portfolio::new(5_000.0).unwrap();
        for f in &fills {
            live.apply_fill(f).unwrap();
        }
        let replayed = Portfolio::replay(5_000.0, &fills).unwrap();
        assert_eq!(live, replayed);
    }

    #[test]
    fn snapshot_holds_equity_identity() {
        let mut p = Portfolio::new(10_000.0).unwrap();
        p.apply_fill(&fill(OrderSide::Buy, 100.0, 10.0, 0.0)).unwrap();
        let mut prices = BTreeMap::new();
        prices.insert("AAA".to_string(), 12.0);
        let snap = p.snapshot(1, Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(), &prices);
        assert_eq!(snap.identity_residual(), 0.0);
        assert!((snap.total_equity - 10_200.0).abs() < 1e-9);
        assert!((snap.unrealized_pnl() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn missing_mark_falls_back_to_last_known() {
        let mut p = Portfolio::new(10_000.0).unwrap();
        p.apply_fill(&fill(OrderSide::Buy, 10.0, 10.0, 0.0)).unwrap();
        let mut prices = BTreeMap::new();
        prices.insert("AAA".to_string(), 11.0);
        p.mark(&prices);
        let snap = p.snapshot(2, Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap(), &BTreeMap::new());
        assert_eq!(snap.positions[0].mark_price, 11.0);
    }
}
