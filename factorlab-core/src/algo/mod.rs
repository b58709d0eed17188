//! Execution algorithms: slice a parent order into child orders over time.
//!
//! A `ParentExecution` wraps one algo parent and owns its schedule state across
//! ticks: the unsliced remainder, what has been emitted as children, and what
//! has filled. The slicing rule itself sits behind `SlicingAlgorithm`, with
//! TWAP, VWAP and POV implementations. Child quantity never exceeds the parent:
//! every slice is clipped to the unsliced remainder before it is emitted.

pub mod pov;
pub mod twap;
pub mod vwap;

pub use pov::Pov;
pub use twap::Twap;
pub use vwap::{VolumeCurve, Vwap};

use crate::domain::{OrderId, OrderSide};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const QTY_EPSILON: f64 = 1e-9;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AlgoError {
    #[error("invalid {algo} parameters: {reason}")]
    InvalidSpec { algo: &'static str, reason: String },

    #[error("lot size must be positive, got {0}")]
    InvalidLotSize(f64),
}

/// Which schedule works a parent order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlgoSpec {
    /// Even slices over `horizon` ticks.
    Twap { horizon: usize },
    /// Slices proportional to a volume curve over `horizon` ticks. A flat curve
    /// is used when none is given.
    Vwap {
        horizon: usize,
        #[serde(default)]
        curve: Option<Vec<f64>>,
    },
    /// `rate` of each tick's traded volume, for at most `max_ticks` ticks.
    Pov { rate: f64, max_ticks: usize },
}

impl AlgoSpec {
    pub fn name(&self) -> &'static str {
        match self {
            AlgoSpec::Twap { .. } => "TWAP",
            AlgoSpec::Vwap { .. } => "VWAP",
            AlgoSpec::Pov { .. } => "POV",
        }
    }

    pub fn validate(&self) -> Result<(), AlgoError> {
        self.build().map(|_| ())
    }

    /// Instantiate the slicing rule.
    pub fn build(&self) -> Result<Box<dyn SlicingAlgorithm>, AlgoError> {
        Ok(match self {
            AlgoSpec::Twap { horizon } => Box::new(Twap::new(*horizon)?),
            AlgoSpec::Vwap { horizon, curve } => {
                let curve = match curve {
                    Some(weights) => VolumeCurve::new(weights.clone())?,
                    None => VolumeCurve::flat(*horizon)?,
                };
                Box::new(Vwap::new(*horizon, curve)?)
            }
            AlgoSpec::Pov { rate, max_ticks } => Box::new(Pov::new(*rate, *max_ticks)?),
        })
    }
}

/// What happens to unsliced quantity when the horizon runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpiryPolicy {
    /// Emit the whole remainder as a final child.
    #[default]
    ForceSubmit,
    /// Drop the remainder and expire the parent.
    Expire,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlgoConfig {
    #[serde(default = "default_lot_size")]
    pub lot_size: f64,
    #[serde(default)]
    pub expiry: ExpiryPolicy,
}

fn default_lot_size() -> f64 {
    1.0
}

impl Default for AlgoConfig {
    fn default() -> Self {
        Self {
            lot_size: default_lot_size(),
            expiry: ExpiryPolicy::default(),
        }
    }
}

impl AlgoConfig {
    pub fn validate(&self) -> Result<(), AlgoError> {
        if !(self.lot_size.is_finite() && self.lot_size > 0.0) {
            return Err(AlgoError::InvalidLotSize(self.lot_size));
        }
        Ok(())
    }
}

/// What a slicing rule sees on one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliceContext {
    /// Slots already worked, 0 on the first.
    pub elapsed: usize,
    /// Unsliced quantity before this slice.
    pub remaining: f64,
    /// This tick's traded volume, if the instrument has a bar.
    pub tick_volume: Option<f64>,
}

/// A slicing rule. Returns the desired child quantity for one tick; the caller
/// clips it to the remainder and rounds it to the lot size.
pub trait SlicingAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of ticks the schedule runs for.
    fn horizon(&self) -> usize;

    fn target(&self, ctx: &SliceContext) -> f64;

    /// Whether the final slot sweeps the remainder without lot rounding.
    fn sweeps_on_last_slot(&self) -> bool {
        true
    }
}

/// Round down to a whole number of lots.
pub fn round_to_lot(quantity: f64, lot_size: f64) -> f64 {
    if quantity <= 0.0 {
        return 0.0;
    }
    ((quantity + QTY_EPSILON) / lot_size).floor() * lot_size
}

/// Outcome of one schedule step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SliceDecision {
    /// Quantity to submit as a child this tick; zero means no child.
    pub child_quantity: f64,
    /// Remainder dropped at horizon expiry.
    pub expired_quantity: f64,
    /// No further slices will be emitted.
    pub finished: bool,
}

/// Schedule state for one algo parent.
///
/// The horizon counts calls to [`ParentExecution::step`], not engine ticks.
/// The engine skips stepping while the circuit breaker blocks new orders, so a
/// suppressed schedule pauses and resumes at the slot it stopped on.
pub struct ParentExecution {
    parent_id: OrderId,
    instrument: String,
    side: OrderSide,
    quantity: f64,
    remaining: f64,
    emitted: f64,
    filled: f64,
    elapsed: usize,
    finished: bool,
    config: AlgoConfig,
    algo: Box<dyn SlicingAlgorithm>,
}

impl std::fmt::Debug for ParentExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParentExecution")
            .field("parent_id", &self.parent_id)
            .field("algo", &self.algo.name())
            .field("remaining", &self.remaining)
            .field("emitted", &self.emitted)
            .field("filled", &self.filled)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

impl ParentExecution {
    pub fn new(
        parent_id: OrderId,
        instrument: impl Into<String>,
        side: OrderSide,
        quantity: f64,
        spec: &AlgoSpec,
        config: AlgoConfig,
    ) -> Result<Self, AlgoError> {
        config.validate()?;
        Ok(Self {
            parent_id,
            instrument: instrument.into(),
            side,
            quantity,
            remaining: quantity,
            emitted: 0.0,
            filled: 0.0,
            elapsed: 0,
            finished: quantity <= 0.0,
            config,
            algo: spec.build()?,
        })
    }

    pub fn parent_id(&self) -> OrderId {
        self.parent_id
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    /// Quantity not yet emitted as children.
    pub fn remaining(&self) -> f64 {
        self.remaining
    }

    pub fn emitted(&self) -> f64 {
        self.emitted
    }

    pub fn filled(&self) -> f64 {
        self.filled
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn algo_name(&self) -> &'static str {
        self.algo.name()
    }

    /// Work one tick of the schedule.
    pub fn step(&mut self, tick_volume: Option<f64>) -> SliceDecision {
        if self.finished {
            return SliceDecision {
                finished: true,
                ..SliceDecision::default()
            };
        }
        let ctx = SliceContext {
            elapsed: self.elapsed,
            remaining: self.remaining,
            tick_volume,
        };
        let last_slot = self.elapsed + 1 >= self.algo.horizon();

        let mut child = if last_slot && self.algo.sweeps_on_last_slot() {
            self.remaining
        } else {
            round_to_lot(self.algo.target(&ctx).min(self.remaining), self.config.lot_size)
        };
        child = child.clamp(0.0, self.remaining);

        let mut expired = 0.0;
        if last_slot {
            let leftover = self.remaining - child;
            if leftover > QTY_EPSILON {
                match self.config.expiry {
                    ExpiryPolicy::ForceSubmit => child += leftover,
                    ExpiryPolicy::Expire => expired = leftover,
                }
            }
        }

        self.remaining -= child + expired;
        if self.remaining < QTY_EPSILON {
            self.remaining = 0.0;
        }
        self.emitted += child;
        self.elapsed += 1;
        self.finished = last_slot || self.remaining == 0.0;

        SliceDecision {
            child_quantity: child,
            expired_quantity: expired,
            finished: self.finished,
        }
    }

    /// Record fill progress of a child.
    pub fn on_fill(&mut self, quantity: f64) {
        self.filled = (self.filled + quantity).min(self.emitted);
    }

    /// Stop slicing; the unsliced remainder is abandoned.
    pub fn cancel(&mut self) -> f64 {
        let abandoned = self.remaining;
        self.remaining = 0.0;
        self.finished = true;
        abandoned
    }
}
