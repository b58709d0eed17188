//! Execution cost models: reference price, slippage and commission.
//!
//! Slippage is quoted in basis points of the reference price and always works
//! against the trader: buys pay up, sells receive less. Limit fills are passive
//! and carry no slippage.

use crate::domain::{Bar, OrderSide};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

const BPS: f64 = 10_000.0;
/// Sells never give up the whole reference price.
const MAX_SELL_BPS: f64 = 9_999.0;

/// Which bar price a market order executes against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillPrice {
    #[default]
    Open,
    Close,
    /// (high + low + close) / 3.
    Typical,
}

impl FillPrice {
    pub fn reference(self, bar: &Bar) -> f64 {
        match self {
            FillPrice::Open => bar.open,
            FillPrice::Close => bar.close,
            FillPrice::Typical => bar.typical_price(),
        }
    }
}

/// Market impact as a function of participation (fill quantity / bar volume).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpactModel {
    #[default]
    None,
    /// `bps_per_unit × participation`.
    Linear { bps_per_unit: f64 },
    /// `coefficient_bps × √participation`.
    SquareRoot { coefficient_bps: f64 },
}

impl ImpactModel {
    pub fn bps(&self, participation: f64) -> f64 {
        let p = participation.max(0.0);
        match *self {
            ImpactModel::None => 0.0,
            ImpactModel::Linear { bps_per_unit } => bps_per_unit * p,
            ImpactModel::SquareRoot { coefficient_bps } => coefficient_bps * p.sqrt(),
        }
    }
}

/// `fixed_bps + impact(participation) + noise`, floored at zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SlippageModel {
    #[serde(default)]
    pub fixed_bps: f64,
    #[serde(default)]
    pub impact: ImpactModel,
    /// Standard deviation of the seeded noise term, in bps.
    #[serde(default)]
    pub noise_bps: f64,
}

/// Slipped execution price plus the monetary cost of the slip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlippedPrice {
    pub price: f64,
    pub cost: f64,
}

impl SlippageModel {
    /// Zero-cost model.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn fixed(bps: f64) -> Self {
        Self {
            fixed_bps: bps,
            ..Self::default()
        }
    }

    pub fn bps(&self, participation: f64, rng: &mut StdRng) -> f64 {
        let noise = if self.noise_bps > 0.0 {
            Normal::new(0.0, self.noise_bps)
                .map(|n| n.sample(rng))
                .unwrap_or(0.0)
        } else {
            0.0
        };
        (self.fixed_bps + self.impact.bps(participation) + noise).max(0.0)
    }

    pub fn apply(
        &self,
        side: OrderSide,
        reference: f64,
        quantity: f64,
        volume: f64,
        rng: &mut StdRng,
    ) -> SlippedPrice {
        let participation = if volume > 0.0 { quantity / volume } else { 0.0 };
        let bps = self.bps(participation, rng);
        let bps = match side {
            OrderSide::Buy => bps,
            OrderSide::Sell => bps.min(MAX_SELL_BPS),
        };
        let price = reference * (1.0 + side.sign() * bps / BPS);
        SlippedPrice {
            price,
            cost: (price - reference).abs() * quantity,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(self.fixed_bps.is_finite() && self.fixed_bps >= 0.0) {
            return Err(format!("fixed_bps must be >= 0, got {}", self.fixed_bps));
        }
        if !(self.noise_bps.is_finite() && self.noise_bps >= 0.0) {
            return Err(format!("noise_bps must be >= 0, got {}", self.noise_bps));
        }
        let coefficient = match self.impact {
            ImpactModel::None => 0.0,
            ImpactModel::Linear { bps_per_unit } => bps_per_unit,
            ImpactModel::SquareRoot { coefficient_bps } => coefficient_bps,
        };
        if !(coefficient.is_finite() && coefficient >= 0.0) {
            return Err(format!("impact coefficient must be >= 0, got {coefficient}"));
        }
        Ok(())
    }
}

/// `max(minimum, bps·notional + per_share·qty)` for non-zero fills.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CommissionModel {
    #[serde(default)]
    pub bps: f64,
    #[serde(default)]
    pub per_share: f64,
    #[serde(default)]
    pub minimum: f64,
}

impl CommissionModel {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn compute(&self, notional: f64, quantity: f64) -> f64 {
        if quantity <= 0.0 {
            return 0.0;
        }
        (self.bps / BPS * notional.abs() + self.per_share * quantity).max(self.minimum)
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, v) in [("bps", self.bps), ("per_share", self.per_share), ("minimum", self.minimum)] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(format!("commission {name} must be >= 0, got {v}"));
            }
        }
        Ok(())
    }
}
