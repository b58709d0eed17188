//! Simulated broker: validates orders and matches them against bars.
//!
//! The broker holds no orders of its own. Each tick the engine lends it the
//! order book, and the broker walks active orders in ascending id order, prices
//! fills with the cost models, records them on the book and hands them back for
//! the portfolio. Time in force is enforced here at the end of each order's last
//! eligible tick.

pub mod cost;
pub mod liquidity;
pub mod order_book;

pub use cost::{CommissionModel, FillPrice, ImpactModel, SlippageModel, SlippedPrice};
pub use liquidity::{ParticipationCap, RemainderPolicy};
pub use order_book::{OrderBook, OrderBookError};

use crate::domain::{Bar, Fill, Order, OrderId, OrderSide, OrderType, TimeInForce, Timestamp};
use crate::portfolio::Portfolio;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BrokerError {
    #[error("order {order_id} rejected: {reason}")]
    Rejected { order_id: OrderId, reason: String },

    #[error("invalid broker configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    OrderBook(#[from] OrderBookError),
}

/// Execution model parameters.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub commission: CommissionModel,
    #[serde(default)]
    pub slippage: SlippageModel,
    #[serde(default)]
    pub fill_price: FillPrice,
    /// Fraction of bar volume one order may take per tick.
    #[serde(default)]
    pub max_participation: Option<f64>,
    #[serde(default)]
    pub remainder_policy: RemainderPolicy,
    /// Applied to strategy orders that do not name one.
    #[serde(default)]
    pub default_time_in_force: TimeInForce,
}

impl BrokerConfig {
    /// No costs, no cap, fill at the open.
    pub fn frictionless() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), BrokerError> {
        self.commission.validate().map_err(BrokerError::InvalidConfig)?;
        self.slippage.validate().map_err(BrokerError::InvalidConfig)?;
        ParticipationCap::new(self.max_participation).map_err(BrokerError::InvalidConfig)?;
        Ok(())
    }
}

pub struct SimulatedBroker {
    config: BrokerConfig,
    cap: ParticipationCap,
    universe: BTreeSet<String>,
    rng: StdRng,
}

impl SimulatedBroker {
    pub fn new<I>(config: BrokerConfig, universe: I, rng: StdRng) -> Result<Self, BrokerError>
    where
        I: IntoIterator<Item = String>,
    {
        config.validate()?;
        let cap = ParticipationCap::new(config.max_participation).map_err(BrokerError::InvalidConfig)?;
        Ok(Self {
            config,
            cap,
            universe: universe.into_iter().collect(),
            rng,
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Structural checks shared by directly matched orders and algo parents.
    pub fn validate(&self, order: &Order) -> Result<(), String> {
        if !(order.quantity.is_finite() && order.quantity > 0.0) {
            return Err(format!("non-positive quantity {}", order.quantity));
        }
        if !self.universe.contains(&order.instrument) {
            return Err(format!("unknown instrument {}", order.instrument));
        }
        if let Some(limit) = order.limit_price() {
            if !(limit.is_finite() && limit > 0.0) {
                return Err(format!("invalid limit price {limit}"));
            }
        }
        Ok(())
    }

    /// Validate and accept an order. Invalid orders are stored as `Rejected`.
    pub fn submit(&self, book: &mut OrderBook, order: Order, tick: usize) -> Result<OrderId, BrokerError> {
        let verdict = if order.is_algo_parent() {
            Err("algo parents are worked by the order manager".to_string())
        } else {
            self.validate(&order)
        };
        match verdict {
            Ok(()) => Ok(book.insert(order, tick)?),
            Err(reason) => {
                warn!(order = %order.id, instrument = %order.instrument, %reason, "order rejected");
                let order_id = book.reject(order, tick, &reason);
                Err(BrokerError::Rejected { order_id, reason })
            }
        }
    }

    pub fn cancel(&self, book: &mut OrderBook, order_id: OrderId, tick: usize, reason: &str) -> Result<(), BrokerError> {
        book.cancel(order_id, tick, reason)?;
        debug!(order = %order_id, reason, "order cancelled");
        Ok(())
    }

    /// Match every active order against this tick's bars.
    ///
    /// A missing, void or zero-volume bar means no fill this tick. Orders whose
    /// time in force ends on this tick are then expired or force-filled per the
    /// remainder policy.
    pub fn match_tick(
        &mut self,
        book: &mut OrderBook,
        bars: &BTreeMap<String, Bar>,
        tick: usize,
        timestamp: Timestamp,
    ) -> Result<Vec<Fill>, BrokerError> {
        let mut fills = Vec::new();
        for id in book.matchable_ids() {
            let Some(order) = book.get_order(id).cloned() else {
                continue;
            };
            let bar = bars.get(&order.instrument).filter(|b| !b.is_void());

            if let Some(fill) = bar
                .filter(|b| b.volume > 0.0)
                .and_then(|b| self.try_fill(&order, b, tick, timestamp))
            {
                match Portfolio::validate_fill(&fill) {
                    Ok(()) => {
                        book.record_fill(id, fill.quantity, tick)?;
                        fills.push(fill);
                    }
                    Err(e) => warn!(order = %id, error = %e, "unbookable fill dropped"),
                }
            }

            let expires_now = order
                .time_in_force
                .last_eligible_tick(order.created_tick)
                .is_some_and(|last| tick >= last);
            let still_open = book.get_order(id).is_some_and(|o| o.is_active());
            if expires_now && still_open {
                if let Some(fill) = self.settle_remainder(book, id, bar, tick, timestamp)? {
                    fills.push(fill);
                }
            }
        }
        Ok(fills)
    }

    // ── Pricing ────────────────────────────────────────────────────────

    fn try_fill(&mut self, order: &Order, bar: &Bar, tick: usize, timestamp: Timestamp) -> Option<Fill> {
        let quantity = self.cap.limit_fill_qty(order.remaining_quantity(), bar.volume);
        if quantity <= 0.0 {
            return None;
        }
        match order.order_type {
            OrderType::Market => {
                let reference = self.config.fill_price.reference(bar);
                let slipped = self
                    .config
                    .slippage
                    .apply(order.side, reference, quantity, bar.volume, &mut self.rng);
                Some(self.make_fill(order, slipped.price, quantity, slipped.cost, tick, timestamp))
            }
            OrderType::Limit { limit_price } => {
                let price = match order.side {
                    OrderSide::Buy if bar.low <= limit_price => limit_price.min(bar.open),
                    OrderSide::Sell if bar.high >= limit_price => limit_price.max(bar.open),
                    _ => return None,
                };
                Some(self.make_fill(order, price, quantity, 0.0, tick, timestamp))
            }
            OrderType::Algo { .. } => None,
        }
    }

    fn settle_remainder(
        &mut self,
        book: &mut OrderBook,
        id: OrderId,
        bar: Option<&Bar>,
        tick: usize,
        timestamp: Timestamp,
    ) -> Result<Option<Fill>, BrokerError> {
        let Some(order) = book.get_order(id).cloned() else {
            return Ok(None);
        };
        let force = self.config.remainder_policy == RemainderPolicy::ForceFill
            && order.order_type == OrderType::Market;
        if let (true, Some(bar)) = (force, bar) {
            let quantity = order.remaining_quantity();
            let reference = self.config.fill_price.reference(bar);
            let slipped = self
                .config
                .slippage
                .apply(order.side, reference, quantity, bar.volume, &mut self.rng);
            let fill = self.make_fill(&order, slipped.price, quantity, slipped.cost, tick, timestamp);
            match Portfolio::validate_fill(&fill) {
                Ok(()) => {
                    book.record_fill(id, quantity, tick)?;
                    debug!(order = %id, quantity, "remainder force-filled");
                    return Ok(Some(fill));
                }
                Err(e) => warn!(order = %id, error = %e, "unbookable remainder fill dropped"),
            }
        }
        book.expire(id, tick, "time in force elapsed")?;
        debug!(order = %id, remaining = order.remaining_quantity(), "order expired");
        Ok(None)
    }

    fn make_fill(
        &self,
        order: &Order,
        price: f64,
        quantity: f64,
        slippage: f64,
        tick: usize,
        timestamp: Timestamp,
    ) -> Fill {
        let commission = self.config.commission.compute(price * quantity, quantity);
        debug!(order = %order.id, instrument = %order.instrument, side = %order.side, quantity, price, "fill");
        Fill {
            order_id: order.id,
            parent_id: order.parent_id,
            instrument: order.instrument.clone(),
            side: order.side,
            price,
            quantity,
            timestamp,
            tick,
            commission,
            slippage,
        }
    }
}
