//! Risk circuit breaker: `Closed → Triggered → Cooldown → Closed`.
//!
//! Time is measured in evaluations, one per tick, so the breaker is as
//! deterministic as the clock driving it. A breach while `Closed` triggers it.
//! The evaluation after a trigger starts the cooldown, which counts down one
//! evaluation at a time and then closes. Each evaluation makes at most one
//! transition; a breach that persists past the cooldown triggers again on the
//! following evaluation. New orders are allowed only while `Closed`.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    /// Tripped at tick `at`.
    Triggered { at: usize },
    /// Evaluations left before closing.
    Cooldown { remaining: usize },
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "CLOSED"),
            BreakerState::Triggered { at } => write!(f, "TRIGGERED@{at}"),
            BreakerState::Cooldown { remaining } => write!(f, "COOLDOWN({remaining})"),
        }
    }
}

/// One recorded state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerTransition {
    pub tick: usize,
    pub from: BreakerState,
    pub to: BreakerState,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: BreakerState,
    cooldown_ticks: usize,
    transitions: Vec<BreakerTransition>,
}

impl CircuitBreaker {
    pub fn new(cooldown_ticks: usize) -> Self {
        Self {
            state: BreakerState::Closed,
            cooldown_ticks,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn cooldown_ticks(&self) -> usize {
        self.cooldown_ticks
    }

    pub fn allows_new_orders(&self) -> bool {
        self.state == BreakerState::Closed
    }

    pub fn transitions(&self) -> &[BreakerTransition] {
        &self.transitions
    }

    /// Advance one evaluation. `breach` names the metric that crossed its
    /// threshold this tick, if any. Returns the transition made, if any.
    pub fn evaluate(&mut self, tick: usize, breach: Option<&str>) -> Option<BreakerTransition> {
        let (next, reason) = match (self.state, breach) {
            (BreakerState::Closed, None) => return None,
            (BreakerState::Closed, Some(metric)) => {
                (BreakerState::Triggered { at: tick }, format!("{metric} breach"))
            }
            (BreakerState::Triggered { .. }, _) if self.cooldown_ticks == 0 => {
                (BreakerState::Closed, "no cooldown configured".to_string())
            }
            (BreakerState::Triggered { .. }, _) => (
                BreakerState::Cooldown {
                    remaining: self.cooldown_ticks,
                },
                "cooldown started".to_string(),
            ),
            (BreakerState::Cooldown { remaining }, _) if remaining > 1 => (
                BreakerState::Cooldown {
                    remaining: remaining - 1,
                },
                "cooldown".to_string(),
            ),
            (BreakerState::Cooldown { .. }, _) => (BreakerState::Closed, "cooldown elapsed".to_string()),
        };
        Some(self.transition(tick, next, reason))
    }

    /// Back to `Closed` for a fresh run.
    pub fn reset(&mut self) {
        self.state = BreakerState::Closed;
        self.transitions.clear();
    }

    fn transition(&mut self, tick: usize, to: BreakerState, reason: String) -> BreakerTransition {
        let t = BreakerTransition {
            tick,
            from: self.state,
            to,
            reason,
        };
        match to {
            BreakerState::Triggered { .. } => warn!(tick, reason = %t.reason, "circuit breaker triggered"),
            BreakerState::Closed => info!(tick, "circuit breaker closed"),
            BreakerState::Cooldown { .. } => {}
        }
        self.state = to;
        self.transitions.push(t.clone());
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed_and_stays_closed_without_breach() {
        let mut cb = CircuitBreaker::new(3);
        assert!(cb.allows_new_orders());
        assert!(cb.evaluate(0, None).is_none());
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn full_cycle_counts_evaluations() {
        let mut cb = CircuitBreaker::new(2);
        cb.evaluate(5, Some("drawdown"));
        assert_eq!(cb.state(), BreakerState::Triggered { at: 5 });
        assert!(!cb.allows_new_orders());

        cb.evaluate(6, None);
        assert_eq!(cb.state(), BreakerState::Cooldown { remaining: 2 });
        cb.evaluate(7, Some("drawdown"));
        assert_eq!(cb.state(), BreakerState::Cooldown { remaining: 1 });
        assert!(!cb.allows_new_orders());
        cb.evaluate(8, None);
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.allows_new_orders());

        let ticks: Vec<usize> = cb.transitions().iter().map(|t| t.tick).collect();
        assert_eq!(ticks, vec![5, 6, 7, 8]);
    }

    #[test]
    fn zero_cooldown_closes_on_next_evaluation() {
        let mut cb = CircuitBreaker::new(0);
        cb.evaluate(1, Some("var"));
        cb.evaluate(2, None);
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn persistent_breach_retriggers_after_close() {
        let mut cb = CircuitBreaker::new(1);
        cb.evaluate(0, Some("loss"));
        cb.evaluate(1, Some("loss"));
        cb.evaluate(2, Some("loss"));
        assert_eq!(cb.state(), BreakerState::Closed);
        cb.evaluate(3, Some("loss"));
        assert_eq!(cb.state(), BreakerState::Triggered { at: 3 });
    }

    #[test]
    fn reset_clears_history() {
        let mut cb = CircuitBreaker::new(1);
        cb.evaluate(0, Some("loss"));
        cb.reset();
        assert!(cb.allows_new_orders());
        assert!(cb.transitions().is_empty());
    }
}
