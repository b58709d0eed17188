//! Order book: the order manager for a run.
//!
//! The book owns every order from submission to a terminal state. It allocates
//! ids, applies status transitions, and keeps an audit entry for each one. It does
//! not price fills; that is the broker's job. Algo parents live here too, and
//! their fill progress is rolled up from their children.

use crate::domain::{Order, OrderAuditEntry, OrderId, OrderIdGen, OrderStatus};
use std::collections::BTreeMap;
use thiserror::Error;

const QTY_EPSILON: f64 = 1e-9;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OrderBookError {
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error("order {0} is not active (status: {1})")]
    OrderNotActive(OrderId, String),

    #[error("order {id} would be overfilled: {filled} + {fill} > {quantity}")]
    Overfill {
        id: OrderId,
        filled: f64,
        fill: f64,
        quantity: f64,
    },

    #[error("order {0} already exists")]
    Duplicate(OrderId),
}

/// Stores all orders keyed by id. Iteration order is ascending id.
#[derive(Debug, Clone)]
pub struct OrderBook {
    orders: BTreeMap<OrderId, Order>,
    ids: OrderIdGen,
    audit_trail: Vec<OrderAuditEntry>,
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            orders: BTreeMap::new(),
            ids: OrderIdGen::new(),
            audit_trail: Vec::new(),
        }
    }

    // ── Public API ─────────────────────────────────────────────────────

    /// Reserve the next order id.
    pub fn next_id(&mut self) -> OrderId {
        self.ids.next_id()
    }

    pub fn get_order(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// All orders in id order.
    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    /// Ids of active orders the broker may match (algo parents excluded), ascending.
    pub fn matchable_ids(&self) -> Vec<OrderId> {
        self.orders
            .values()
            .filter(|o| o.is_active() && !o.is_algo_parent())
            .map(|o| o.id)
            .collect()
    }

    /// Active child orders of an algo parent.
    pub fn active_children(&self, parent: OrderId) -> Vec<OrderId> {
        self.orders
            .values()
            .filter(|o| o.parent_id == Some(parent) && o.is_active())
            .map(|o| o.id)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.orders.values().filter(|o| o.is_active()).count()
    }

    pub fn audit_trail(&self) -> &[OrderAuditEntry] {
        &self.audit_trail
    }

    /// Accept an order in status `New`.
    pub fn insert(&mut self, order: Order, tick: usize) -> Result<OrderId, OrderBookError> {
        debug_assert!(order.status == OrderStatus::New, "inserted order must be New");
        let id = order.id;
        if self.orders.contains_key(&id) {
            return Err(OrderBookError::Duplicate(id));
        }
        self.orders.insert(id, order);
        self.record_audit(id, None, OrderStatus::New, tick, "submitted");
        Ok(id)
    }

    /// Store an order that failed validation. It never becomes active.
    pub fn reject(&mut self, mut order: Order, tick: usize, reason: &str) -> OrderId {
        let id = order.id;
        let status = OrderStatus::Rejected {
            reason: reason.to_string(),
        };
        order.status = status.clone();
        self.orders.insert(id, order);
        self.record_audit(id, None, status, tick, reason);
        id
    }

    /// Record a fill quantity on an order and roll it up to its parent.
    /// Returns the order's status after the fill.
    pub fn record_fill(
        &mut self,
        order_id: OrderId,
        fill_qty: f64,
        tick: usize,
    ) -> Result<OrderStatus, OrderBookError> {
        let order = self.active_order_mut(order_id)?;
        if order.filled_quantity + fill_qty > order.quantity + QTY_EPSILON {
            return Err(OrderBookError::Overfill {
                id: order_id,
                filled: order.filled_quantity,
                fill: fill_qty,
                quantity: order.quantity,
            });
        }
        order.filled_quantity += fill_qty;
        let parent = order.parent_id;
        let status = self.settle_fill_status(order_id, tick)?;

        if let Some(parent_id) = parent {
            if let Some(p) = self.orders.get_mut(&parent_id) {
                if p.is_active() {
                    p.filled_quantity = (p.filled_quantity + fill_qty).min(p.quantity);
                    self.settle_fill_status(parent_id, tick)?;
                }
            }
        }
        Ok(status)
    }

    pub fn cancel(&mut self, order_id: OrderId, tick: usize, reason: &str) -> Result<(), OrderBookError> {
        let status = OrderStatus::Cancelled {
            reason: reason.to_string(),
        };
        self.transition(order_id, status, tick, reason)
    }

    /// Time in force ran out with quantity open.
    pub fn expire(&mut self, order_id: OrderId, tick: usize, reason: &str) -> Result<(), OrderBookError> {
        self.transition(order_id, OrderStatus::Expired, tick, reason)
    }

    // ── Internals ──────────────────────────────────────────────────────

    fn active_order_mut(&mut self, order_id: OrderId) -> Result<&mut Order, OrderBookError> {
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(OrderBookError::OrderNotFound(order_id))?;
        if !order.is_active() {
            return Err(OrderBookError::OrderNotActive(
                order_id,
                order.status.to_string(),
            ));
        }
        Ok(order)
    }

    fn transition(
        &mut self,
        order_id: OrderId,
        to: OrderStatus,
        tick: usize,
        reason: &str,
    ) -> Result<(), OrderBookError> {
        let order = self.active_order_mut(order_id)?;
        let from = std::mem::replace(&mut order.status, to.clone());
        self.record_audit(order_id, Some(from), to, tick, reason);
        Ok(())
    }

    /// New/PartiallyFilled/Filled from the filled quantity.
    fn settle_fill_status(&mut self, order_id: OrderId, tick: usize) -> Result<OrderStatus, OrderBookError> {
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(OrderBookError::OrderNotFound(order_id))?;
        let next = if order.filled_quantity + QTY_EPSILON >= order.quantity {
            OrderStatus::Filled
        } else if order.filled_quantity > 0.0 {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::New
        };
        if next != order.status {
            let from = std::mem::replace(&mut order.status, next.clone());
            let reason = if next == OrderStatus::Filled { "filled" } else { "partial fill" };
            self.record_audit(order_id, Some(from), next.clone(), tick, reason);
        }
        Ok(next)
    }

    fn record_audit(
        &mut self,
        order_id: OrderId,
        from_status: Option<OrderStatus>,
        to_status: OrderStatus,
        tick: usize,
        reason: &str,
    ) {
        self.audit_trail.push(OrderAuditEntry {
            order_id,
            tick,
            from_status,
            to_status,
            reason: reason.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::AlgoSpec;
    use crate::domain::{OrderSide, OrderType, TimeInForce};
    use chrono::{TimeZone, Utc};

    fn market(book: &mut OrderBook, qty: f64) -> Order {
        Order::new(
            book.next_id(),
            "AAA",
            OrderSide::Buy,
            qty,
            OrderType::Market,
            TimeInForce::Gtc,
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            0,
        )
    }

    #[test]
    fn ids_are_ascending() {
        let mut book = OrderBook::new();
        let a = book.next_id();
        let b = book.next_id();
        assert!(a < b);
    }

    #[test]
    fn partial_then_full_fill() {
        let mut book = OrderBook::new();
        let o = market(&mut book, 100.0);
        let id = book.insert(o, 0).unwrap();

        assert_eq!(book.record_fill(id, 40.0, 0).unwrap(), OrderStatus::PartiallyFilled);
        assert_eq!(book.record_fill(id, 60.0, 1).unwrap(), OrderStatus::Filled);
        assert!(book.matchable_ids().is_empty());

        let trail: Vec<_> = book.audit_trail().iter().map(|e| e.to_status.label()).collect();
        assert_eq!(trail, vec!["NEW", "PARTIALLY_FILLED", "FILLED"]);
    }

    #[test]
    fn overfill_is_refused_without_mutation() {
        let mut book = OrderBook::new();
        let o = market(&mut book, 10.0);
        let id = book.insert(o, 0).unwrap();
        assert!(matches!(
            book.record_fill(id, 11.0, 0),
            Err(OrderBookError::Overfill { .. })
        ));
        assert_eq!(book.get_order(id).unwrap().filled_quantity, 0.0);
    }

    #[test]
    fn terminal_orders_cannot_transition() {
        let mut book = OrderBook::new();
        let o = market(&mut book, 10.0);
        let id = book.insert(o, 0).unwrap();
        book.cancel(id, 0, "user").unwrap();
        assert!(matches!(book.expire(id, 1, "tif"), Err(OrderBookError::OrderNotActive(..))));
        assert!(matches!(book.record_fill(id, 1.0, 1), Err(OrderBookError::OrderNotActive(..))));
    }

    #[test]
    fn rejected_orders_are_stored_and_audited() {
        let mut book = OrderBook::new();
        let o = market(&mut book, -5.0);
        let id = book.reject(o, 0, "non-positive quantity");
        assert!(matches!(
            book.get_order(id).unwrap().status,
            OrderStatus::Rejected { .. }
        ));
        assert_eq!(book.audit_trail()[0].from_status, None);
        assert_eq!(book.active_count(), 0);
    }

    #[test]
    fn child_fills_roll_up_to_parent() {
        let mut book = OrderBook::new();
        let mut parent = market(&mut book, 100.0);
        parent.order_type = OrderType::Algo {
            spec: AlgoSpec::Twap { horizon: 2 },
        };
        let pid = book.insert(parent, 0).unwrap();
        let child = market(&mut book, 50.0).with_parent(pid);
        let cid = book.insert(child, 0).unwrap();

        assert_eq!(book.matchable_ids(), vec![cid]);
        book.record_fill(cid, 50.0, 0).unwrap();
        assert_eq!(book.get_order(pid).unwrap().status, OrderStatus::PartiallyFilled);

        let child = market(&mut book, 50.0).with_parent(pid);
        let cid2 = book.insert(child, 1).unwrap();
        book.record_fill(cid2, 50.0, 1).unwrap();
        assert_eq!(book.get_order(pid).unwrap().status, OrderStatus::Filled);
    }
}
