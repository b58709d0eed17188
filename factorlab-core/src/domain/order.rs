//! Orders, order status state machine types, and the audit trail.

use super::bar::Timestamp;
use super::ids::OrderId;
use crate::algo::AlgoSpec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1.0 for buys, -1.0 for sells.
    pub fn sign(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// What kind of order and its price parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Fill at the tick's execution price, adjusted for slippage.
    Market,
    /// Fill only if the bar's range crosses the limit, at the limit or better.
    Limit { limit_price: f64 },
    /// Parent order worked by an execution algorithm. Never matched directly.
    Algo { spec: AlgoSpec },
}

/// How long an unfilled remainder stays eligible for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    /// Good till cancelled: the remainder carries over to the next tick.
    Gtc,
    /// Expires at the end of the tick it was submitted on.
    Day,
    /// Expires after being eligible for `ticks` ticks.
    GoodForTicks { ticks: u32 },
}

impl TimeInForce {
    /// Last tick (inclusive) on which an order created at `created_tick` may fill.
    pub fn last_eligible_tick(self, created_tick: usize) -> Option<usize> {
        match self {
            TimeInForce::Gtc => None,
            TimeInForce::Day => Some(created_tick),
            TimeInForce::GoodForTicks { ticks } => {
                Some(created_tick + (ticks.max(1) as usize) - 1)
            }
        }
    }
}

impl Default for TimeInForce {
    fn default() -> Self {
        TimeInForce::Gtc
    }
}

/// Order lifecycle states.
///
/// `New → PartiallyFilled → … → Filled`, or `New | PartiallyFilled → Cancelled | Expired`.
/// `Rejected` is only reachable at submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled { reason: String },
    Rejected { reason: String },
    /// Time in force ran out with quantity still open.
    Expired,
}

impl OrderStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyFilled)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Short label for logs and audit entries.
    pub fn label(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled { .. } => "CANCELLED",
            OrderStatus::Rejected { .. } => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single order. Stored and mutated only by the order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    /// Parent algo order for child slices.
    pub parent_id: Option<OrderId>,
    pub created_at: Timestamp,
    pub created_tick: usize,
    pub filled_quantity: f64,
    pub status: OrderStatus,
}

impl Order {
    /// A fresh order in status `New`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: OrderId,
        instrument: impl Into<String>,
        side: OrderSide,
        quantity: f64,
        order_type: OrderType,
        time_in_force: TimeInForce,
        created_at: Timestamp,
        created_tick: usize,
    ) -> Self {
        Self {
            id,
            instrument: instrument.into(),
            side,
            quantity,
            order_type,
            time_in_force,
            parent_id: None,
            created_at,
            created_tick,
            filled_quantity: 0.0,
            status: OrderStatus::New,
        }
    }

    pub fn with_parent(mut self, parent: OrderId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    pub fn remaining_quantity(&self) -> f64 {
        (self.quantity - self.filled_quantity).max(0.0)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Algo parents are worked by a schedule, not matched by the broker.
    pub fn is_algo_parent(&self) -> bool {
        matches!(self.order_type, OrderType::Algo { .. })
    }

    pub fn limit_price(&self) -> Option<f64> {
        match self.order_type {
            OrderType::Limit { limit_price } => Some(limit_price),
            _ => None,
        }
    }
}

/// Audit trail entry for an order state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAuditEntry {
    pub order_id: OrderId,
    pub tick: usize,
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn order(status: OrderStatus) -> Order {
        let mut o = Order::new(
            OrderId(1),
            "AAA",
            OrderSide::Buy,
            100.0,
            OrderType::Market,
            TimeInForce::Gtc,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            0,
        );
        o.status = status;
        o
    }

    #[test]
    fn remaining_quantity() {
        let mut o = order(OrderStatus::PartiallyFilled);
        o.filled_quantity = 30.0;
        assert_eq!(o.remaining_quantity(), 70.0);
    }

    #[test]
    fn active_states() {
        assert!(order(OrderStatus::New).is_active());
        assert!(order(OrderStatus::PartiallyFilled).is_active());
        assert!(!order(OrderStatus::Filled).is_active());
        assert!(!order(OrderStatus::Expired).is_active());
        assert!(!order(OrderStatus::Cancelled { reason: "x".into() }).is_active());
        assert!(!order(OrderStatus::Rejected { reason: "x".into() }).is_active());
    }

    #[test]
    fn time_in_force_windows() {
        assert_eq!(TimeInForce::Gtc.last_eligible_tick(5), None);
        assert_eq!(TimeInForce::Day.last_eligible_tick(5), Some(5));
        assert_eq!(TimeInForce::GoodForTicks { ticks: 3 }.last_eligible_tick(5), Some(7));
        assert_eq!(TimeInForce::GoodForTicks { ticks: 0 }.last_eligible_tick(5), Some(5));
    }

    #[test]
    fn side_sign() {
        assert_eq!(OrderSide::Buy.sign(), 1.0);
        assert_eq!(OrderSide::Sell.sign(), -1.0);
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
    }

    #[test]
    fn status_serializes_tagged() {
        let json = serde_json::to_string(&OrderStatus::Cancelled {
            reason: "breaker".into(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"CANCELLED\""));
    }
}
