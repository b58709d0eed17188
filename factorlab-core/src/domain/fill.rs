use super::bar::Timestamp;
use super::ids::OrderId;
use super::order::OrderSide;
use serde::{Deserialize, Serialize};

/// Immutable execution record. One per matching event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: OrderId,
    /// Algo parent of the filled child, if any.
    pub parent_id: Option<OrderId>,
    pub instrument: String,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
    pub timestamp: Timestamp,
    pub tick: usize,
    pub commission: f64,
    /// Monetary cost of slippage relative to the unslipped reference price.
    pub slippage: f64,
}

impl Fill {
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }

    /// Quantity with the side's sign applied (buys positive).
    pub fn signed_quantity(&self) -> f64 {
        self.side.sign() * self.quantity
    }

    /// Cash impact: buys spend notional + commission, sells receive notional - commission.
    pub fn cash_delta(&self) -> f64 {
        -self.side.sign() * self.notional() - self.commission
    }
}
